//! Parsing of the tabular format's six time encodings (§4.2), and their
//! resolution to absolute ticks given a recording's clock context.

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use luna_core::error::LunaError;
use luna_core::tick::{seconds_to_ticks, Tick};

/// A parsed (but not yet resolved) time token.
#[derive(Clone, Debug, PartialEq)]
pub enum TimeToken {
    /// Plain seconds offset from recording start.
    SecondsOffset(f64),
    /// `HH:MM:SS[.fff]` clock time.
    Clock(NaiveTime),
    /// `0+HH:MM:SS[.fff]`: elapsed seconds from recording start, rendered
    /// as a duration rather than a seconds float.
    Elapsed(f64),
    /// `dN-HH:MM:SS`: start date plus `N-1` days, at the given clock time.
    DatePlusDays { day_index: u32, time: NaiveTime },
    /// `e:N[:len[:inc]]`: epoch reference, optionally with an explicit
    /// epoch length/increment overriding the recording defaults.
    EpochRef {
        n: u64,
        len_sec: Option<f64>,
        inc_sec: Option<f64>,
    },
    /// `+duration`: only legal in the stop column; duration in seconds
    /// added to the row's resolved start.
    PlusDuration(f64),
    /// `...`: "until the next row's start, or recording end if last".
    Ellipsis,
}

/// Recording-level context needed to resolve a [`TimeToken`] to ticks.
#[derive(Clone, Debug)]
pub struct TimeContext {
    pub start_clock: Option<NaiveDateTime>,
    pub epoch_len_sec: f64,
    pub epoch_inc_sec: f64,
    pub recording_end: Option<Tick>,
}

impl TimeToken {
    /// Parse a single time-column token.
    pub fn parse(tok: &str, is_stop_column: bool) -> Result<Self, LunaError> {
        let bad = |detail: String| LunaError::malformed(format!("time token '{tok}'"), detail);

        if tok == "..." {
            return Ok(Self::Ellipsis);
        }
        if is_stop_column && tok.starts_with('+') {
            let secs: f64 = tok[1..]
                .parse()
                .map_err(|e| bad(format!("bad +duration: {e}")))?;
            return Ok(Self::PlusDuration(secs));
        }
        if let Some(rest) = tok.strip_prefix("e:") {
            return Self::parse_epoch_ref(rest).map_err(bad);
        }
        if let Some(rest) = tok.strip_prefix("0+") {
            let t = parse_clock(rest).map_err(bad)?;
            let secs = f64::from(t.num_seconds_from_midnight()) + f64::from(t.nanosecond()) / 1e9;
            return Ok(Self::Elapsed(secs));
        }
        if let Some(rest) = tok.strip_prefix('d') {
            if let Some(dash) = rest.find('-') {
                let (day_str, time_str) = rest.split_at(dash);
                let time_str = &time_str[1..];
                if let Ok(day_index) = day_str.parse::<u32>() {
                    let time = parse_clock(time_str).map_err(bad)?;
                    return Ok(Self::DatePlusDays { day_index, time });
                }
            }
        }
        if tok.contains(':') {
            let t = parse_clock(tok).map_err(bad)?;
            return Ok(Self::Clock(t));
        }
        let secs: f64 = tok
            .parse()
            .map_err(|e| bad(format!("not a recognized time encoding: {e}")))?;
        Ok(Self::SecondsOffset(secs))
    }

    fn parse_epoch_ref(rest: &str) -> Result<Self, String> {
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.is_empty() || parts[0].is_empty() {
            return Err("empty epoch reference".into());
        }
        let n: u64 = parts[0].parse().map_err(|e| format!("{e}"))?;
        let len_sec = parts
            .get(1)
            .map(|s| s.parse::<f64>())
            .transpose()
            .map_err(|e| format!("{e}"))?;
        let inc_sec = parts
            .get(2)
            .map(|s| s.parse::<f64>())
            .transpose()
            .map_err(|e| format!("{e}"))?;
        Ok(Self::EpochRef {
            n,
            len_sec,
            inc_sec,
        })
    }

    /// Resolve to absolute ticks from recording start.
    ///
    /// `row_start` is the already-resolved start tick of the same row
    /// (needed for `+duration` in the stop column). `next_row_start` is the
    /// next data row's resolved start tick (needed for `...`); per the
    /// documented (ambiguous-in-source) behavior, the next *physical* row is
    /// used regardless of its class.
    pub fn resolve(
        &self,
        ctx: &TimeContext,
        row_start: Option<Tick>,
        next_row_start: Option<Tick>,
    ) -> Result<Tick, LunaError> {
        match self {
            Self::SecondsOffset(s) => Ok(seconds_to_ticks(*s)),
            Self::Elapsed(s) => Ok(seconds_to_ticks(*s)),
            Self::PlusDuration(d) => {
                let base = row_start.ok_or_else(|| {
                    LunaError::malformed("+duration", "no row start to add duration to")
                })?;
                Ok(base + seconds_to_ticks(*d))
            }
            Self::Ellipsis => next_row_start.or(ctx.recording_end).ok_or_else(|| {
                LunaError::malformed("...", "no next row and no recording end to fall back on")
            }),
            Self::Clock(t) => {
                let base = ctx.start_clock.ok_or_else(|| {
                    LunaError::malformed("clock time", "no recording start date-time known")
                })?;
                let base_time = base.time();
                let mut day_offset = 0i64;
                if *t < base_time {
                    // "assume next occurrence after start"
                    day_offset = 1;
                }
                let secs_of_day =
                    f64::from(t.num_seconds_from_midnight()) + f64::from(t.nanosecond()) / 1e9;
                let base_secs_of_day = f64::from(base_time.num_seconds_from_midnight())
                    + f64::from(base_time.nanosecond()) / 1e9;
                let elapsed = day_offset as f64 * 86400.0 + secs_of_day - base_secs_of_day;
                Ok(seconds_to_ticks(elapsed))
            }
            Self::DatePlusDays { day_index, time } => {
                let base = ctx.start_clock.ok_or_else(|| {
                    LunaError::malformed("dN-HH:MM:SS", "no recording start date-time known")
                })?;
                let base_time = base.time();
                let secs_of_day =
                    f64::from(time.num_seconds_from_midnight()) + f64::from(time.nanosecond()) / 1e9;
                let base_secs_of_day = f64::from(base_time.num_seconds_from_midnight())
                    + f64::from(base_time.nanosecond()) / 1e9;
                let elapsed =
                    f64::from(day_index.saturating_sub(1)) * 86400.0 + secs_of_day - base_secs_of_day;
                Ok(seconds_to_ticks(elapsed.max(0.0)))
            }
            Self::EpochRef { n, len_sec: _, inc_sec } => {
                // epoch n is 1-based for user-facing display; resolves to
                // the epoch's start tick (callers needing the epoch's stop
                // use `len_sec`/`epoch_len_sec` against this start).
                let inc = inc_sec.unwrap_or(ctx.epoch_inc_sec);
                let start = (*n as f64 - 1.0) * inc;
                Ok(seconds_to_ticks(start))
            }
        }
    }
}

fn parse_clock(s: &str) -> Result<NaiveTime, String> {
    let fmts = ["%H:%M:%S%.f", "%H:%M:%S"];
    for f in fmts {
        if let Ok(t) = NaiveTime::parse_from_str(s, f) {
            return Ok(t);
        }
    }
    Err(format!("not a clock time: '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_offset() {
        assert_eq!(
            TimeToken::parse("12.5", false).unwrap(),
            TimeToken::SecondsOffset(12.5)
        );
    }

    #[test]
    fn ellipsis_in_stop() {
        assert_eq!(TimeToken::parse("...", true).unwrap(), TimeToken::Ellipsis);
    }

    #[test]
    fn plus_duration_only_meaningful_in_stop() {
        let tok = TimeToken::parse("+30", true).unwrap();
        assert_eq!(tok, TimeToken::PlusDuration(30.0));
    }

    #[test]
    fn epoch_ref() {
        let tok = TimeToken::parse("e:4", false).unwrap();
        assert_eq!(
            tok,
            TimeToken::EpochRef {
                n: 4,
                len_sec: None,
                inc_sec: None
            }
        );
        let ctx = TimeContext {
            start_clock: None,
            epoch_len_sec: 30.0,
            epoch_inc_sec: 30.0,
            recording_end: None,
        };
        // epoch 4 (1-based) starts at 3*30 = 90s
        let resolved = tok.resolve(&ctx, None, None).unwrap();
        assert_eq!(resolved, seconds_to_ticks(90.0));
    }
}
