//! The line-oriented tabular annotation format: header class declarations,
//! 3/4/6(+)-column data rows, and the writer's mirror image.

use crate::time_tokens::{TimeContext, TimeToken};
use luna_core::error::LunaError;
use luna_core::tick::Interval;
use luna_core::value::{Value, ValueType};
use std::collections::HashMap;

/// A `# class [| description] [| var1[type1] var2[type2] ...]` header line.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassDecl {
    pub class: String,
    pub description: String,
    pub vars: Vec<(String, ValueType)>,
}

/// One parsed data row, with times still as raw [`TimeToken`]s (resolution
/// happens in a second pass so `...` can look at the next physical row).
#[derive(Clone, Debug)]
pub struct RawRow {
    pub class: String,
    pub inst: Option<String>,
    pub channel: Option<String>,
    pub start: TimeToken,
    pub stop: TimeToken,
    pub meta_raw: Option<String>,
    pub extra_cols: Vec<String>,
}

/// A fully-resolved annotation row, ready to feed `AnnotationSet::add`.
#[derive(Clone, Debug)]
pub struct ResolvedRow {
    pub class: String,
    pub inst: String,
    pub channel: String,
    pub interval: Interval,
    pub meta: HashMap<String, Value>,
}

/// Parse a `#`-prefixed class header line.
///
/// # Errors
/// Returns [`LunaError::MalformedInput`] if the line has no class name, or
/// a declared variable's type token is not recognized.
pub fn parse_header(line: &str) -> Result<ClassDecl, LunaError> {
    let body = line.trim_start_matches('#').trim();
    let parts: Vec<&str> = body.split('|').map(str::trim).collect();
    if parts.is_empty() || parts[0].is_empty() {
        return Err(LunaError::malformed("header", "missing class name"));
    }
    let class = parts[0].to_string();
    let description = parts.get(1).map(|s| (*s).to_string()).unwrap_or_default();
    let mut vars = Vec::new();
    if let Some(var_section) = parts.get(2) {
        for token in var_section.split_whitespace() {
            let (name, ty) = split_var_token(token)?;
            vars.push((name, ty));
        }
    }
    Ok(ClassDecl {
        class,
        description,
        vars,
    })
}

fn split_var_token(token: &str) -> Result<(String, ValueType), LunaError> {
    if let Some(open) = token.find('[') {
        let close = token
            .find(']')
            .ok_or_else(|| LunaError::malformed(format!("variable '{token}'"), "missing ']'"))?;
        let name = token[..open].to_string();
        let ty = ValueType::parse(&token[open + 1..close])?;
        Ok((name, ty))
    } else {
        Ok((token.to_string(), ValueType::Text))
    }
}

/// Parse one non-blank, non-`#` data line into a [`RawRow`].
///
/// Accepts 3 columns (`class start stop`), 4 columns
/// (`class instance start stop`), or 6+ columns
/// (`class instance channel start stop meta [extra...]`). A class label may
/// be suffixed `class:inst` to imply splitting; when split, a non-missing
/// original instance id is preserved as meta field `_inst`.
pub fn parse_row(line: &str) -> Result<RawRow, LunaError> {
    let cols: Vec<&str> = line.split('\t').collect();
    let (mut class_tok, mut inst, mut channel, start_tok, stop_tok, meta_raw, extra_cols) =
        match cols.len() {
            0 | 1 | 2 => {
                return Err(LunaError::malformed(
                    format!("row '{line}'"),
                    "fewer than 3 columns",
                ))
            }
            3 => (
                cols[0].to_string(),
                None,
                None,
                cols[1].to_string(),
                cols[2].to_string(),
                None,
                Vec::new(),
            ),
            4 => (
                cols[0].to_string(),
                Some(cols[1].to_string()),
                None,
                cols[2].to_string(),
                cols[3].to_string(),
                None,
                Vec::new(),
            ),
            _ => (
                cols[0].to_string(),
                Some(cols[1].to_string()),
                Some(cols[2].to_string()),
                cols[3].to_string(),
                cols[4].to_string(),
                cols.get(5).map(|s| (*s).to_string()),
                cols[6..].iter().map(|s| (*s).to_string()).collect(),
            ),
        };

    let mut split_inst_meta = None;
    if let Some((base, suffix)) = class_tok.split_once(':') {
        if !suffix.is_empty() {
            split_inst_meta = Some(suffix.to_string());
            class_tok = base.to_string();
        }
    }
    if let Some(suffix) = split_inst_meta {
        if inst.as_deref().map_or(true, |i| i.is_empty() || i == ".") {
            inst = Some(suffix);
        }
        // Original instance id (if non-missing) is preserved as `_inst`.
        // The caller folds this into `meta` during resolution.
        channel = channel.or(None);
    }

    let start = TimeToken::parse(start_tok.trim(), false)?;
    let stop = TimeToken::parse(stop_tok.trim(), true)?;

    Ok(RawRow {
        class: class_tok,
        inst,
        channel,
        start,
        stop,
        meta_raw,
        extra_cols,
    })
}

/// Parse the `|`/`;`-delimited meta column into `key=value` pairs, or
/// positional values mapped onto `declared` if every element lacks `=`.
pub fn parse_meta(
    meta_raw: Option<&str>,
    extra_cols: &[String],
    header_row: Option<&[String]>,
    declared: &[(String, ValueType)],
) -> Result<HashMap<String, Value>, LunaError> {
    let mut meta = HashMap::new();
    let type_of = |name: &str| -> ValueType {
        declared
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
            .unwrap_or(ValueType::Text)
    };

    if let Some(raw) = meta_raw {
        let elems: Vec<&str> = raw
            .split(|c| c == '|' || c == ';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let all_keyed = elems.iter().all(|e| e.contains('='));
        if all_keyed {
            for e in elems {
                let (k, v) = e
                    .split_once('=')
                    .expect("all_keyed checked contains '='");
                meta.insert(k.to_string(), Value::parse(type_of(k), v)?);
            }
        } else if !declared.is_empty() {
            for (e, (name, ty)) in elems.iter().zip(declared.iter()) {
                meta.insert(name.clone(), Value::parse(*ty, e)?);
            }
        } else {
            for (i, e) in elems.iter().enumerate() {
                meta.insert(format!("v{}", i + 1), Value::Text((*e).to_string()));
            }
        }
    }

    if let Some(header) = header_row {
        for (col, name) in extra_cols.iter().zip(header.iter()) {
            meta.insert(name.clone(), Value::parse(type_of(name), col)?);
        }
    }

    Ok(meta)
}

/// Resolve every [`RawRow`] in declaration order to [`ResolvedRow`]s,
/// looking ahead one row at a time for `...` stop tokens.
pub fn resolve_rows(
    rows: &[RawRow],
    ctx: &TimeContext,
    class_vars: &HashMap<String, Vec<(String, ValueType)>>,
    header_row: Option<&[String]>,
) -> Result<Vec<ResolvedRow>, LunaError> {
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let empty_vars = Vec::new();
        let declared = class_vars.get(&row.class).unwrap_or(&empty_vars);
        let start = row.start.resolve(ctx, None, None)?;

        let next_start = if matches!(row.stop, TimeToken::Ellipsis) {
            rows.get(i + 1)
                .map(|next| next.start.resolve(ctx, None, None))
                .transpose()?
        } else {
            None
        };
        let stop = row.stop.resolve(ctx, Some(start), next_start)?;
        if stop < start {
            return Err(LunaError::ConstraintViolation(format!(
                "row {}: stop precedes start",
                i + 1
            )));
        }

        let mut meta = parse_meta(
            row.meta_raw.as_deref(),
            &row.extra_cols,
            header_row,
            declared,
        )?;

        let inst = row.inst.clone().unwrap_or_else(|| ".".to_string());
        if inst != "." {
            meta.entry("_inst".to_string())
                .or_insert_with(|| Value::Text(inst.clone()));
        }

        out.push(ResolvedRow {
            class: row.class.clone(),
            inst,
            channel: row.channel.clone().unwrap_or_else(|| ".".to_string()),
            interval: Interval::new(start, stop),
            meta,
        });
    }
    Ok(out)
}

/// Render one resolved row back to the canonical 6-column tabular form.
#[must_use]
pub fn write_row(row: &ResolvedRow, use_hms: bool, set_0dur_ellipsis: bool) -> String {
    use luna_core::tick::ticks_to_seconds;

    let start_s = ticks_to_seconds(row.interval.start);
    let stop_s = ticks_to_seconds(row.interval.stop);

    let start_col = if use_hms {
        render_hms(start_s)
    } else {
        format!("{start_s}")
    };
    let stop_col = if row.interval.is_point() && set_0dur_ellipsis {
        "...".to_string()
    } else if use_hms {
        render_hms(stop_s)
    } else {
        format!("{stop_s}")
    };

    let meta_col = if row.meta.is_empty() {
        String::new()
    } else {
        let mut keys: Vec<&String> = row.meta.keys().collect();
        keys.sort();
        keys.iter()
            .map(|k| format!("{k}={}", row.meta[*k].to_tabular()))
            .collect::<Vec<_>>()
            .join(";")
    };

    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        row.class, row.inst, row.channel, start_col, stop_col, meta_col
    )
}

fn render_hms(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as i64;
    let ms = total_ms.rem_euclid(1000);
    let total_s = total_ms.div_euclid(1000);
    let s = total_s.rem_euclid(60);
    let total_m = total_s.div_euclid(60);
    let m = total_m.rem_euclid(60);
    let h = total_m.div_euclid(60);
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}
