//! Feature-range gate (§4.8): masks a feature column to `NaN` for a target
//! individual's epochs when too many of that individual's values fall
//! outside the training cohort's `mean ± th*SD` band.

use std::collections::HashMap;

/// One feature's training-cohort `(mean, sd)`, as loaded from a ranges file
/// (`name mean sd`, one per line).
#[derive(Clone, Debug, Default)]
pub struct RangeTable {
    pub entries: HashMap<String, (f64, f64)>,
}

impl RangeTable {
    /// Parse `name mean sd` lines; blank lines and `#`-comments ignored.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(name), Some(mean), Some(sd)) = (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            if let (Ok(mean), Ok(sd)) = (mean.parse::<f64>(), sd.parse::<f64>()) {
                entries.insert(name.to_string(), (mean, sd));
            }
        }
        Self { entries }
    }
}

/// Apply the range gate to a `rows x names.len()` matrix in place: a
/// feature entirely missing from `ranges` is left untouched (ignored by
/// the gate, per the external-interface contract).
pub fn apply_gate(
    rows: &mut [Vec<f64>],
    names: &[String],
    ranges: &RangeTable,
    th: f64,
    prop: f64,
) {
    for (col, name) in names.iter().enumerate() {
        let Some(&(mean, sd)) = ranges.entries.get(name) else {
            continue;
        };
        if sd.abs() < f64::EPSILON || rows.is_empty() {
            continue;
        }
        let n_outside = rows
            .iter()
            .filter(|r| (r[col] - mean).abs() > th * sd)
            .count();
        let frac = n_outside as f64 / rows.len() as f64;
        if frac > prop {
            for row in rows.iter_mut() {
                row[col] = f64::NAN;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_column_when_majority_out_of_range() {
        let mut rows = vec![vec![100.0], vec![101.0], vec![102.0], vec![0.0]];
        let mut ranges = RangeTable::default();
        ranges.entries.insert("f".to_string(), (100.0, 1.0));
        apply_gate(&mut rows, &["f".to_string()], &ranges, 4.0, 0.33);
        assert!(rows.iter().all(|r| r[0].is_nan()));
    }

    #[test]
    fn leaves_unlisted_feature_alone() {
        let mut rows = vec![vec![999.0]];
        let ranges = RangeTable::default();
        apply_gate(&mut rows, &["missing".to_string()], &ranges, 4.0, 0.33);
        assert_eq!(rows[0][0], 999.0);
    }
}
