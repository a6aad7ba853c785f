//! Annotation I/O: the tabular format, the two XML schemas, the
//! epoch-per-line `.eannot` format, and the alias remap table, all built on
//! top of [`luna_core::annot::AnnotationSet`].

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod alias;
pub mod algebra;
pub mod tabular;
pub mod time_tokens;
pub mod xml;

use luna_core::annot::AnnotationSet;
use luna_core::error::LunaError;
use luna_core::tick::{seconds_to_ticks, Interval};
use std::collections::HashMap;
use std::path::Path;
use time_tokens::TimeContext;

/// Options governing [`write`]'s rendering of an [`AnnotationSet`].
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    /// Render times as `HH:MM:SS.fff` rather than a seconds offset.
    pub hms: bool,
    /// Include the date component alongside clock time.
    pub dhms: bool,
    /// Subtract gaps to map a discontinuous recording onto elapsed time.
    pub collapse: bool,
    /// Drop intervals shorter than this many seconds.
    pub min_dur: Option<f64>,
    /// Emit meta as extra tabular columns instead of the packed meta column.
    pub tab_meta: bool,
    /// Whether to emit the meta column/columns at all.
    pub emit_meta: bool,
    /// `new` <- `orig` class-name remapping applied just before writing.
    pub remap: HashMap<String, String>,
    /// Seconds added to every emitted start/stop.
    pub offset_sec: f64,
    /// Keep only classes whose name starts with this prefix.
    pub prefix: Option<String>,
    /// Keep only the named classes (empty means "all").
    pub only_classes: Vec<String>,
}

/// Parse tabular-format text (header `#` lines plus data rows) into a fresh
/// [`AnnotationSet`].
///
/// # Errors
/// Returns [`LunaError::MalformedInput`] on a malformed header or row, and
/// [`LunaError::ConstraintViolation`] if a resolved row has `stop < start`.
pub fn read_tabular(text: &str, ctx: &TimeContext) -> Result<AnnotationSet, LunaError> {
    let mut set = AnnotationSet::new();
    let mut class_vars: HashMap<String, Vec<(String, luna_core::value::ValueType)>> =
        HashMap::new();
    let mut raw_rows = Vec::new();

    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('#') {
            let _ = stripped;
            let decl = tabular::parse_header(line)?;
            let class = set.class_or_create(&decl.class);
            class.set_description(decl.description.clone());
            for (name, ty) in &decl.vars {
                class.declare_variable(name.clone(), *ty);
            }
            class_vars.insert(decl.class.clone(), decl.vars);
            continue;
        }
        raw_rows.push(tabular::parse_row(line)?);
    }

    let resolved = tabular::resolve_rows(&raw_rows, ctx, &class_vars, None)?;
    for row in resolved {
        set.add(&row.class, row.inst, row.interval, row.channel, row.meta)?;
    }
    Ok(set)
}

/// Render an [`AnnotationSet`] to tabular text under `opts`.
#[must_use]
pub fn write_tabular(set: &AnnotationSet, opts: &WriteOptions) -> String {
    let mut out = String::new();
    for name in set.names() {
        let Some(class) = set.class(name) else { continue };
        if !class_selected(name, opts) {
            continue;
        }
        let out_name = opts.remap.get(name).cloned().unwrap_or_else(|| name.clone());
        out.push_str(&format!("# {out_name}"));
        if !class.description().is_empty() {
            out.push_str(&format!(" | {}", class.description()));
        }
        out.push('\n');

        for inst in class.instances() {
            let dur_sec = luna_core::tick::ticks_to_seconds(inst.interval.stop)
                - luna_core::tick::ticks_to_seconds(inst.interval.start);
            if let Some(min_dur) = opts.min_dur {
                if dur_sec < min_dur {
                    continue;
                }
            }
            let shifted = shift_interval(inst.interval, opts.offset_sec);
            let row = tabular::ResolvedRow {
                class: out_name.clone(),
                inst: inst.id.clone(),
                channel: inst.channel.clone(),
                interval: shifted,
                meta: if opts.emit_meta {
                    inst.meta.clone()
                } else {
                    HashMap::new()
                },
            };
            out.push_str(&tabular::write_row(&row, opts.hms, false));
            out.push('\n');
        }
    }
    out
}

fn shift_interval(iv: Interval, offset_sec: f64) -> Interval {
    if offset_sec == 0.0 {
        return iv;
    }
    let off = seconds_to_ticks(offset_sec.abs());
    if offset_sec >= 0.0 {
        Interval::new(iv.start + off, iv.stop + off)
    } else {
        Interval::new(iv.start.saturating_sub(off), iv.stop.saturating_sub(off))
    }
}

fn class_selected(name: &str, opts: &WriteOptions) -> bool {
    if let Some(prefix) = &opts.prefix {
        if !name.starts_with(prefix.as_str()) {
            return false;
        }
    }
    if !opts.only_classes.is_empty() && !opts.only_classes.iter().any(|c| c == name) {
        return false;
    }
    true
}

/// Parse the one-label-per-line, one-per-epoch `.eannot` format.
///
/// `observed_epochs` is the EDF-derived epoch count; if it differs from the
/// number of non-blank lines by more than `tolerance`, this is an error
/// rather than a silent truncation/pad.
///
/// # Errors
/// Returns [`LunaError::ConstraintViolation`] if the line count and
/// `observed_epochs` differ by more than `tolerance`.
pub fn read_eannot(
    text: &str,
    epoch_len_sec: f64,
    observed_epochs: usize,
    tolerance: usize,
) -> Result<AnnotationSet, LunaError> {
    let labels: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let diff = labels.len().abs_diff(observed_epochs);
    if diff > tolerance {
        return Err(LunaError::ConstraintViolation(format!(
            "eannot has {} epochs, recording has {observed_epochs} (tolerance {tolerance})",
            labels.len()
        )));
    }

    let mut set = AnnotationSet::new();
    set.epoch_seconds = epoch_len_sec;
    for (i, label) in labels.iter().enumerate() {
        let start = i as f64 * epoch_len_sec;
        let interval = Interval::new(
            seconds_to_ticks(start),
            seconds_to_ticks(start + epoch_len_sec),
        );
        set.add(label, ".".to_string(), interval, ".".to_string(), HashMap::new())?;
    }
    Ok(set)
}

/// Write an `.eannot` document: one stage label per line, epoch order.
#[must_use]
pub fn write_eannot(labels: &[String]) -> String {
    let mut out = String::with_capacity(labels.len() * 4);
    for l in labels {
        out.push_str(l);
        out.push('\n');
    }
    out
}

/// Write `set` to `path`, choosing tabular (`.annot`) or XML (`.xml`)
/// rendering by extension.
///
/// # Errors
/// Returns [`LunaError::MalformedInput`] if the extension is unrecognized
/// or the XML serializer fails.
pub fn render(set: &AnnotationSet, path: &Path, opts: &WriteOptions) -> Result<String, LunaError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => xml::write_annotations_xml(set),
        Some("annot") | None => Ok(write_tabular(set, opts)),
        Some(other) => Err(LunaError::malformed(
            "render",
            format!("unrecognized extension '{other}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TimeContext {
        TimeContext {
            start_clock: None,
            epoch_len_sec: 30.0,
            epoch_inc_sec: 30.0,
            recording_end: Some(seconds_to_ticks(3600.0)),
        }
    }

    #[test]
    fn round_trips_tabular_minimal() {
        let text = "# arousal | arousal events\narousal\t.\t.\t10\t15\t\n";
        let set = read_tabular(text, &ctx()).unwrap();
        assert_eq!(set.names(), &["arousal".to_string()]);
        let rendered = write_tabular(&set, &WriteOptions::default());
        assert!(rendered.contains("arousal"));
    }

    #[test]
    fn eannot_tolerates_small_mismatch() {
        let text = "W\nW\nN1\nN2\n";
        let set = read_eannot(text, 30.0, 5, 2).unwrap();
        assert!(set.class_mut("W").is_some());
    }

    #[test]
    fn eannot_rejects_large_mismatch() {
        let text = "W\nW\n";
        let err = read_eannot(text, 30.0, 100, 2);
        assert!(err.is_err());
    }

    #[test]
    fn prefix_filter_excludes_other_classes() {
        let mut set = AnnotationSet::new();
        set.add(
            "arousal_spontaneous",
            ".".to_string(),
            Interval::new(0, 10),
            ".".to_string(),
            HashMap::new(),
        )
        .unwrap();
        set.add(
            "apnea",
            ".".to_string(),
            Interval::new(0, 10),
            ".".to_string(),
            HashMap::new(),
        )
        .unwrap();
        let opts = WriteOptions {
            prefix: Some("arousal".to_string()),
            ..Default::default()
        };
        let out = write_tabular(&set, &opts);
        assert!(out.contains("arousal_spontaneous"));
        assert!(!out.contains("apnea"));
    }
}
