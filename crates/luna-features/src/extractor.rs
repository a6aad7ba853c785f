//! Per-epoch feature extraction (§4.5): pulls samples from an
//! [`EdfSource`], computes the declared level-1 metrics, and applies
//! cumulative epoch-outlier rules.

use crate::signal::EdfSource;
use crate::spec::{ColumnLayout, ColumnMeta, FeatureKind, FeatureLine};
use crate::spectral::{self, Averaging, Psd};
use crate::timedomain;
use luna_core::error::LunaError;
use luna_core::stage::Stage;
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Welch segmentation parameters; fixed defaults per the feature spec.
#[derive(Clone, Copy, Debug)]
pub struct WelchParams {
    pub seg_sec: f64,
    pub overlap_frac: f64,
    pub avg: Averaging,
}

impl Default for WelchParams {
    fn default() -> Self {
        Self {
            seg_sec: 4.0,
            overlap_frac: 0.5,
            avg: Averaging::Mean,
        }
    }
}

/// The product of level-1 extraction: a dense epochs×columns matrix, the
/// column layout, original epoch indices, and a stage label per row (dummy
/// `None` when no annotation set was supplied).
pub struct ExtractResult {
    pub x1: DMatrix<f64>,
    pub layout: ColumnLayout,
    pub epoch_index: Vec<usize>,
    pub stage: Vec<Option<Stage>>,
    /// Rows whose Welch PSD had a non-positive bin in `[0.5, 45]` Hz.
    pub unknown: Vec<bool>,
}

/// Run level-1 extraction across every retained epoch of `source`, using
/// `lines` (level-1 kinds only — level-2 lines are ignored here and
/// consumed later by `crate::post`).
///
/// `stage_of` supplies a known stage label per epoch index (training/eval),
/// or returns `None` for a bare predict run.
///
/// `covariates` supplies individual-level values (e.g. `age`, `bmi`) for
/// `COVAR` blocks, keyed by the argument name on the block's spec line; the
/// same value is written into every epoch's row for that individual.
///
/// # Errors
/// [`LunaError::MissingResource`] if a line names a channel `source` lacks,
/// or a `COVAR` block names a key absent from `covariates`.
pub fn extract(
    source: &dyn EdfSource,
    lines: &[FeatureLine],
    welch: WelchParams,
    stage_of: impl Fn(usize) -> Option<Stage>,
    covariates: &HashMap<String, f64>,
) -> Result<ExtractResult, LunaError> {
    let level1: Vec<&FeatureLine> = lines.iter().filter(|l| !l.kind.is_level2()).collect();

    for line in &level1 {
        if let Some(ch) = &line.channel {
            if !source.has_signal(ch) {
                return Err(LunaError::MissingResource(format!(
                    "channel '{ch}' required by block '{}' not present",
                    line.block
                )));
            }
        }
    }

    let layout = build_layout(source, &level1)?;
    let ncols = layout.columns.len();

    let mut epoch_index = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut unknown = Vec::new();
    let mut stage = Vec::new();

    let Some(first) = source.first_epoch() else {
        return Ok(ExtractResult {
            x1: DMatrix::zeros(0, ncols),
            layout,
            epoch_index,
            stage,
            unknown,
        });
    };

    let mut cur = Some(first);
    while let Some(e) = cur {
        let mut row = vec![f64::NAN; ncols];
        let mut col = 0usize;
        let mut is_unknown = false;

        for line in &level1 {
            let width = block_width(line);
            if matches!(
                line.kind,
                FeatureKind::LogPsd
                    | FeatureKind::RelPsd
                    | FeatureKind::CvPsd
                    | FeatureKind::Bands
                    | FeatureKind::RBands
                    | FeatureKind::VBands
                    | FeatureKind::Slope
            ) {
                let channel = line.channel.as_deref().expect("spectral block needs sig");
                let interval = source.epoch(e);
                let fs = source
                    .sampling_freq(channel)
                    .ok_or_else(|| LunaError::MissingResource(channel.to_string()))?;
                let samples = source.read(channel, interval).unwrap_or_default();
                match spectral::welch(&samples, fs, welch.seg_sec, welch.overlap_frac, welch.avg) {
                    Ok(psd) => {
                        if spectral::has_nonpositive_bin(&psd, 0.5, 45.0) {
                            is_unknown = true;
                        }
                        fill_spectral(&mut row, col, line, &psd);
                    }
                    Err(_) => is_unknown = true,
                }
            } else if let Some(channel) = &line.channel {
                let interval = source.epoch(e);
                let samples = source.read(channel, interval).unwrap_or_default();
                if let Err(_e) = fill_timedomain(&mut row, col, line, &samples) {
                    is_unknown = true;
                }
            } else if line.kind == FeatureKind::Covar {
                if let Err(_e) = fill_covar(&mut row, col, line, covariates) {
                    is_unknown = true;
                }
            }
            col += width;
        }

        rows.push(row);
        unknown.push(is_unknown);
        epoch_index.push(e);
        stage.push(stage_of(e));
        cur = source.next_epoch(e);
    }

    let nrows = rows.len();
    let mut x1 = DMatrix::zeros(nrows, ncols);
    for (r, row) in rows.into_iter().enumerate() {
        for (c, v) in row.into_iter().enumerate() {
            x1[(r, c)] = v;
        }
    }

    Ok(ExtractResult {
        x1,
        layout,
        epoch_index,
        stage,
        unknown,
    })
}

fn block_width(line: &FeatureLine) -> usize {
    match line.kind {
        FeatureKind::LogPsd | FeatureKind::RelPsd | FeatureKind::CvPsd => {
            let lwr = line.arg_f64("lwr").unwrap_or(0.5);
            let upr = line.arg_f64("upr").unwrap_or(45.0);
            (((upr - lwr) / spectral::DELTA_F).round() as usize) + 1
        }
        FeatureKind::Bands | FeatureKind::RBands | FeatureKind::VBands => 6,
        FeatureKind::Slope
        | FeatureKind::Skew
        | FeatureKind::Kurtosis
        | FeatureKind::Mean
        | FeatureKind::Fd => 1,
        FeatureKind::Hjorth => 3,
        FeatureKind::Pe => {
            let from = line.arg_usize("from").unwrap_or(3);
            let to = line.arg_usize("to").unwrap_or(from);
            to.saturating_sub(from) + 1
        }
        FeatureKind::Covar => line.args.keys().filter(|k| k.as_str() != "sig").count().max(1),
        FeatureKind::Smooth | FeatureKind::Denoise | FeatureKind::Norm | FeatureKind::Svd => 0,
        FeatureKind::EpochOutlier => 0,
    }
}

fn build_layout(_source: &dyn EdfSource, level1: &[&FeatureLine]) -> Result<ColumnLayout, LunaError> {
    let mut columns = Vec::new();
    for line in level1 {
        let width = block_width(line);
        match line.kind {
            FeatureKind::Bands | FeatureKind::RBands | FeatureKind::VBands => {
                for band in spectral::BANDS {
                    columns.push(ColumnMeta {
                        name: format!("{}_{}", line.block, band.name),
                        block: line.block.clone(),
                    });
                }
            }
            FeatureKind::Hjorth => {
                for suffix in ["activity", "mobility", "complexity"] {
                    columns.push(ColumnMeta {
                        name: format!("{}_{suffix}", line.block),
                        block: line.block.clone(),
                    });
                }
            }
            _ => {
                for i in 0..width {
                    columns.push(ColumnMeta {
                        name: if width == 1 {
                            line.block.clone()
                        } else {
                            format!("{}_{i}", line.block)
                        },
                        block: line.block.clone(),
                    });
                }
            }
        }
    }
    Ok(ColumnLayout { columns })
}

fn fill_spectral(row: &mut [f64], col: usize, line: &FeatureLine, psd: &Psd) {
    let lwr = line.arg_f64("lwr").unwrap_or(0.5);
    let upr = line.arg_f64("upr").unwrap_or(45.0);
    let values = match line.kind {
        FeatureKind::LogPsd => spectral::log_psd(psd, lwr, upr),
        FeatureKind::RelPsd => {
            let z_lwr = line.arg_f64("z-lwr").unwrap_or(0.5);
            let z_upr = line.arg_f64("z-upr").unwrap_or(25.0);
            spectral::rel_psd(psd, lwr, upr, z_lwr, z_upr)
        }
        FeatureKind::CvPsd => spectral::cv_psd(psd, lwr, upr),
        FeatureKind::Bands => spectral::BANDS.iter().map(|b| spectral::band_log_power(psd, *b)).collect(),
        FeatureKind::RBands => spectral::BANDS.iter().map(|b| spectral::band_rel_power(psd, *b)).collect(),
        FeatureKind::VBands => spectral::BANDS.iter().map(|b| spectral::band_cv(psd, *b)).collect(),
        FeatureKind::Slope => vec![spectral::spectral_slope(psd)],
        _ => return,
    };
    for (i, v) in values.into_iter().enumerate() {
        if col + i < row.len() {
            row[col + i] = v;
        }
    }
}

fn fill_timedomain(
    row: &mut [f64],
    col: usize,
    line: &FeatureLine,
    samples: &[f64],
) -> Result<(), LunaError> {
    match line.kind {
        FeatureKind::Skew => row[col] = timedomain::skewness(samples)?,
        FeatureKind::Kurtosis => row[col] = timedomain::kurtosis(samples)?,
        FeatureKind::Mean => row[col] = timedomain::mean(samples),
        FeatureKind::Fd => row[col] = timedomain::petrosian_fd(samples),
        FeatureKind::Hjorth => {
            let (a, m, c) = timedomain::hjorth(samples)?;
            row[col] = a;
            row[col + 1] = m;
            row[col + 2] = c;
        }
        FeatureKind::Pe => {
            let from = line.arg_usize("from").unwrap_or(3);
            let to = line.arg_usize("to").unwrap_or(from);
            for (i, m) in (from..=to).enumerate() {
                row[col + i] = timedomain::permutation_entropy(samples, m)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Deterministic column order for a `COVAR` block's argument keys, since
/// `FeatureLine::args` is a `HashMap` and column layout must be stable.
fn covar_keys(line: &FeatureLine) -> Vec<&str> {
    let mut keys: Vec<&str> = line.args.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

fn fill_covar(
    row: &mut [f64],
    col: usize,
    line: &FeatureLine,
    covariates: &HashMap<String, f64>,
) -> Result<(), LunaError> {
    for (i, key) in covar_keys(line).into_iter().enumerate() {
        let value = covariates
            .get(key)
            .ok_or_else(|| LunaError::MissingResource(format!("covariate '{key}' not supplied")))?;
        row[col + i] = *value;
    }
    Ok(())
}

/// Apply cumulative mean±th·SD epoch-outlier rules for named blocks,
/// marking additional rows unknown; rules apply in the order given and each
/// recomputes mean/SD over currently-non-unknown rows.
pub fn apply_outlier_rules(
    x1: &DMatrix<f64>,
    layout: &ColumnLayout,
    unknown: &mut [bool],
    rules: &[(String, f64)],
) {
    for (block, th) in rules {
        let cols = layout.indices_of_block(block);
        if cols.is_empty() {
            continue;
        }
        for &c in &cols {
            let vals: Vec<f64> = (0..x1.nrows())
                .filter(|&r| !unknown[r])
                .map(|r| x1[(r, c)])
                .collect();
            if vals.len() < 2 {
                continue;
            }
            let n = vals.len() as f64;
            let mean = vals.iter().sum::<f64>() / n;
            let var = vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let sd = var.sqrt();
            if sd.abs() < f64::EPSILON {
                continue;
            }
            for r in 0..x1.nrows() {
                if unknown[r] {
                    continue;
                }
                if (x1[(r, c)] - mean).abs() > th * sd {
                    unknown[r] = true;
                }
            }
        }
    }
}

/// Drop rows marked `unknown`, compacting `x1`, `epoch_index`, and `stage`.
#[must_use]
pub fn compact_unknown(result: ExtractResult) -> ExtractResult {
    let keep: Vec<usize> = (0..result.unknown.len())
        .filter(|&i| !result.unknown[i])
        .collect();
    let ncols = result.x1.ncols();
    let mut x1 = DMatrix::zeros(keep.len(), ncols);
    for (new_r, &old_r) in keep.iter().enumerate() {
        for c in 0..ncols {
            x1[(new_r, c)] = result.x1[(old_r, c)];
        }
    }
    let epoch_index = keep.iter().map(|&i| result.epoch_index[i]).collect();
    let stage = keep.iter().map(|&i| result.stage[i]).collect();
    ExtractResult {
        x1,
        layout: result.layout,
        epoch_index,
        stage,
        unknown: vec![false; keep.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::MemorySource;
    use crate::spec::parse_spec;

    #[test]
    fn covar_block_is_filled_from_individual_level_values() {
        let source = MemorySource::new(30.0, 3);
        let lines = parse_spec("ind COVAR sig=. age bmi\n").unwrap();
        let mut covariates = HashMap::new();
        covariates.insert("age".to_string(), 54.0);
        covariates.insert("bmi".to_string(), 27.5);

        let result = extract(&source, &lines, WelchParams::default(), |_| None, &covariates).unwrap();
        assert_eq!(result.x1.ncols(), 2);
        for r in 0..result.x1.nrows() {
            assert_eq!(result.x1[(r, 0)], 54.0);
            assert_eq!(result.x1[(r, 1)], 27.5);
        }
    }

    #[test]
    fn covar_block_missing_value_marks_epoch_unknown() {
        let source = MemorySource::new(30.0, 1);
        let lines = parse_spec("ind COVAR sig=. age\n").unwrap();
        let covariates = HashMap::new();

        let result = extract(&source, &lines, WelchParams::default(), |_| None, &covariates).unwrap();
        assert!(result.unknown[0]);
    }
}
