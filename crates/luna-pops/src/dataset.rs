//! Training/validation dataset construction for the POPS classifier.

use anyhow::{Context, Result};
use lightgbm::Dataset;
use luna_core::error::LunaError;

/// Per-observation weighting: a base per-label multiplier composed with an
/// optional per-row override and an optional per-individual block weight.
#[derive(Clone, Debug, Default)]
pub struct WeightSpec {
    pub per_label: Vec<(i32, f64)>,
    pub per_row: Option<Vec<f64>>,
    pub per_block: Option<Vec<(usize, usize, f64)>>,
}

impl WeightSpec {
    /// Compose the three weighting sources multiplicatively for `labels`.
    #[must_use]
    pub fn resolve(&self, labels: &[i32]) -> Vec<f64> {
        let mut weights = vec![1.0; labels.len()];
        for (i, &label) in labels.iter().enumerate() {
            if let Some(&(_, w)) = self.per_label.iter().find(|(l, _)| *l == label) {
                weights[i] *= w;
            }
        }
        if let Some(rows) = &self.per_row {
            for (w, row_w) in weights.iter_mut().zip(rows) {
                *w *= row_w;
            }
        }
        if let Some(blocks) = &self.per_block {
            for &(start, end, w) in blocks {
                for weight in weights.iter_mut().take(end).skip(start) {
                    *weight *= w;
                }
            }
        }
        weights
    }
}

/// Build a [`Dataset`] from a dense row-major feature matrix and integer
/// class labels.
///
/// `weights`, if present, is accepted for interface symmetry with
/// [`WeightSpec::resolve`] but not yet wired into the dataset itself — the
/// bound `lightgbm` crate's `Dataset::from_mat` has no weight-column
/// parameter, so callers fold weights into `model::train`'s booster params
/// instead.
///
/// # Errors
/// Returns an error if `features`/`labels` are empty or row width is
/// inconsistent.
pub fn build_dataset(
    features: &[Vec<f64>],
    labels: &[i32],
    weights: Option<&[f64]>,
) -> Result<Dataset> {
    if features.is_empty() {
        return Err(LunaError::ConstraintViolation(
            "cannot build a POPS dataset from zero rows".into(),
        )
        .into());
    }
    let width = features[0].len();
    if features.iter().any(|r| r.len() != width) {
        return Err(LunaError::ConstraintViolation(
            "feature rows have inconsistent width".into(),
        )
        .into());
    }
    if labels.len() != features.len() {
        return Err(LunaError::ConstraintViolation(
            "label count does not match row count".into(),
        )
        .into());
    }

    let label_f: Vec<f32> = labels.iter().map(|&l| l as f32).collect();
    let _ = weights; // composed weights are folded into training params by the caller

    let dataset = Dataset::from_mat(features.to_vec(), label_f)
        .context("constructing lightgbm Dataset from dense matrix")?;

    Ok(dataset)
}

/// Drop leading/trailing wake-stage rows from each individual's block
/// before training, beyond `margin_epochs` from that individual's first/last
/// non-wake epoch. `blocks` gives each individual's `[start, end)` row range
/// within `features`/`labels` (as `luna_corpus::BlockSpan` records);
/// `margin_epochs = 0` keeps only the non-wake span itself, matching the
/// original default of trimming disabled only when margin is `usize::MAX`.
/// An all-wake or empty block is kept untouched — there is no non-wake
/// epoch to anchor the trim against.
#[must_use]
pub fn trim_wake_epochs(
    features: &[Vec<f64>],
    labels: &[i32],
    blocks: &[(usize, usize)],
    wake_label: i32,
    margin_epochs: usize,
) -> (Vec<Vec<f64>>, Vec<i32>) {
    let mut out_features = Vec::new();
    let mut out_labels = Vec::new();
    for &(start, end) in blocks {
        let block_labels = &labels[start..end];
        let first_non_wake = block_labels.iter().position(|&l| l != wake_label);
        let last_non_wake = block_labels.iter().rposition(|&l| l != wake_label);
        let (lo, hi) = match (first_non_wake, last_non_wake) {
            (Some(f), Some(l)) => (
                f.saturating_sub(margin_epochs),
                (l + margin_epochs + 1).min(block_labels.len()),
            ),
            _ => (0, block_labels.len()),
        };
        for i in lo..hi {
            out_features.push(features[start + i].clone());
            out_labels.push(labels[start + i]);
        }
    }
    (out_features, out_labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_wake_epochs_disabled_by_zero_margin_keeps_only_non_wake_span() {
        // wake=0; block is W W N1 N2 N1 W W
        let labels = vec![0, 0, 1, 2, 1, 0, 0];
        let features: Vec<Vec<f64>> = (0..7).map(|i| vec![i as f64]).collect();
        let (f, l) = trim_wake_epochs(&features, &labels, &[(0, 7)], 0, 0);
        assert_eq!(l, vec![1, 2, 1]);
        assert_eq!(f, vec![vec![2.0], vec![3.0], vec![4.0]]);
    }

    #[test]
    fn trim_wake_epochs_with_margin_keeps_a_buffer() {
        let labels = vec![0, 0, 0, 1, 2, 1, 0, 0, 0];
        let features: Vec<Vec<f64>> = (0..9).map(|i| vec![i as f64]).collect();
        let (_f, l) = trim_wake_epochs(&features, &labels, &[(0, 9)], 0, 1);
        assert_eq!(l, vec![0, 1, 2, 1, 0]);
    }

    #[test]
    fn trim_wake_epochs_leaves_all_wake_block_untouched() {
        let labels = vec![0, 0, 0];
        let features: Vec<Vec<f64>> = (0..3).map(|i| vec![i as f64]).collect();
        let (f, l) = trim_wake_epochs(&features, &labels, &[(0, 3)], 0, 0);
        assert_eq!(l, labels);
        assert_eq!(f, features);
    }

    #[test]
    fn trim_wake_epochs_respects_block_boundaries_independently() {
        let labels = vec![0, 1, 0, 0, 0, 1, 0];
        let features: Vec<Vec<f64>> = (0..7).map(|i| vec![i as f64]).collect();
        let (_f, l) = trim_wake_epochs(&features, &labels, &[(0, 3), (3, 7)], 0, 0);
        assert_eq!(l, vec![1, 1]);
    }
}
