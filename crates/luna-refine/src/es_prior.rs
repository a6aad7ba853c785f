//! Elapsed-sleep priors (§4.8): walk epochs in temporal order, bin running
//! elapsed-sleep and recent-NREM minutes, and reweight each epoch's
//! posterior by the table row for its bin.

use luna_core::error::LunaError;
use std::collections::HashMap;

/// A loaded `ES RECENT_NR PP(N1) PP(N2) PP(N3) PP(R) PP(W)` table.
#[derive(Clone, Debug, Default)]
pub struct EsPriorTable {
    /// Keyed by `(es_bin, recent_nr_bin)`, values in `[N1, N2, N3, R, W]`
    /// column order (matching the 5-class canonical ordering's non-wake
    /// stages followed by wake).
    rows: HashMap<(u32, u32), [f64; 5]>,
}

impl EsPriorTable {
    /// Parse the header + data rows.
    ///
    /// # Errors
    /// [`LunaError::MalformedInput`] on a malformed numeric field.
    pub fn parse(text: &str) -> Result<Self, LunaError> {
        let mut rows = HashMap::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || i == 0 {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 7 {
                return Err(LunaError::malformed(
                    format!("es-prior row {}", i + 1),
                    "fewer than 7 columns",
                ));
            }
            let es: u32 = parts[0]
                .parse()
                .map_err(|e| LunaError::malformed("es-prior ES column", format!("{e}")))?;
            let nr: u32 = parts[1]
                .parse()
                .map_err(|e| LunaError::malformed("es-prior RECENT_NR column", format!("{e}")))?;
            let mut vals = [0.0; 5];
            for (k, v) in vals.iter_mut().enumerate() {
                *v = parts[2 + k]
                    .parse()
                    .map_err(|e| LunaError::malformed("es-prior PP column", format!("{e}")))?;
            }
            rows.insert((es, nr), vals);
        }
        Ok(Self { rows })
    }

    #[must_use]
    pub fn row(&self, es_bin: u32, nr_bin: u32) -> Option<[f64; 5]> {
        self.rows.get(&(es_bin, nr_bin)).copied()
    }
}

/// Options governing elapsed-sleep/recent-NREM accounting.
#[derive(Clone, Copy, Debug)]
pub struct EsPriorConfig {
    pub epoch_len_min: f64,
    pub non_nrem_tolerance_min: f64,
    pub bin_width_min: f64,
    /// Recompute bins from the running *refined* stage instead of the
    /// original posterior argmax.
    pub rolling: bool,
    /// Count elapsed sleep by posterior non-wake mass instead of hard argmax.
    pub fractional_count: bool,
}

impl Default for EsPriorConfig {
    fn default() -> Self {
        Self {
            epoch_len_min: 0.5,
            non_nrem_tolerance_min: 5.0,
            bin_width_min: 10.0,
            rolling: false,
            fractional_count: false,
        }
    }
}

/// Five-class posterior row in canonical `[W, R, N1, N2, N3]` order.
pub type Posterior = [f64; 5];

fn argmax5(p: &Posterior) -> usize {
    let mut best = 0;
    for i in 1..5 {
        if p[i] > p[best] {
            best = i;
        }
    }
    best
}

/// Reweight every epoch's posterior in temporal order by the ES-prior
/// table row for its running bin, renormalizing after each multiply.
///
/// # Errors
/// [`LunaError::MissingResource`] if a computed bin has no table row.
pub fn apply_es_priors(
    posteriors: &mut [Posterior],
    table: &EsPriorTable,
    config: &EsPriorConfig,
) -> Result<(), LunaError> {
    let mut elapsed_sleep_min = 0.0;
    let mut since_nrem: Vec<bool> = Vec::new();

    for i in 0..posteriors.len() {
        let source = posteriors[i];
        let es_bin = (elapsed_sleep_min / config.bin_width_min).floor() as u32;
        let recent_nrem_min = recent_nrem_minutes(&since_nrem, config);
        let nr_bin = (recent_nrem_min / config.bin_width_min).floor() as u32;

        let row = table.row(es_bin, nr_bin).ok_or_else(|| {
            LunaError::MissingResource(format!(
                "no ES-prior row for bin (ES={es_bin}, RECENT_NR={nr_bin})"
            ))
        })?;
        // row is [N1, N2, N3, R, W]; posterior canonical order is [W,R,N1,N2,N3].
        let reordered = [row[4], row[3], row[0], row[1], row[2]];

        let mut p = posteriors[i];
        for (pv, rv) in p.iter_mut().zip(reordered.iter()) {
            *pv *= rv;
        }
        let sum: f64 = p.iter().sum();
        if sum < 1e-10 {
            p = [0.2; 5];
        } else {
            for v in &mut p {
                *v /= sum;
            }
        }
        posteriors[i] = p;

        let reference = if config.rolling { p } else { source };
        let is_sleep_epoch = argmax5(&reference) != 0;
        let is_nrem_epoch = matches!(argmax5(&reference), 2 | 3 | 4);

        if config.fractional_count {
            elapsed_sleep_min += (1.0 - reference[0]) * config.epoch_len_min;
        } else if is_sleep_epoch {
            elapsed_sleep_min += config.epoch_len_min;
        }
        since_nrem.push(is_nrem_epoch);
    }
    Ok(())
}

fn recent_nrem_minutes(history: &[bool], config: &EsPriorConfig) -> f64 {
    let mut minutes = 0.0;
    let mut non_nrem_run = 0.0;
    for &is_nrem in history.iter().rev() {
        if is_nrem {
            minutes += config.epoch_len_min;
            non_nrem_run = 0.0;
        } else {
            non_nrem_run += config.epoch_len_min;
            if non_nrem_run > config.non_nrem_tolerance_min {
                break;
            }
        }
    }
    minutes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_table() -> EsPriorTable {
        let mut rows = HashMap::new();
        for es in 0..20u32 {
            for nr in 0..20u32 {
                rows.insert((es, nr), [0.2; 5]);
            }
        }
        EsPriorTable { rows }
    }

    #[test]
    fn uniform_table_leaves_posterior_unchanged_in_proportion() {
        let table = flat_table();
        let mut posts = vec![[0.1, 0.1, 0.1, 0.1, 0.6]];
        apply_es_priors(&mut posts, &table, &EsPriorConfig::default()).unwrap();
        let sum: f64 = posts[0].iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_bin_is_missing_resource() {
        let table = EsPriorTable::default();
        let mut posts = vec![[0.2; 5]];
        let err = apply_es_priors(&mut posts, &table, &EsPriorConfig::default());
        assert!(err.is_err());
    }
}
