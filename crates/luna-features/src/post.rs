//! Level-2 feature post-processing (§4.6): temporal smoothing, TV
//! denoising, per-individual robust normalization, and cohort-level SVD.
//! Processed in declaration order so each block sees upstream output.

use luna_core::error::LunaError;
use nalgebra::{DMatrix, DVector};

/// Centered moving average, window `2*half_window + 1`, edges truncated to
/// the available neighbours.
#[must_use]
pub fn smooth_column(x: &[f64], half_window: usize) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half_window);
            let hi = (i + half_window + 1).min(n);
            let slice = &x[lo..hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Total-variation 1D denoising via proximal gradient: minimizes
/// `0.5*sum((y-x)^2) + lambda*sd(x)*sum(|y[i+1]-y[i]|)`.
#[must_use]
pub fn denoise_column(x: &[f64], lambda: f64) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return x.to_vec();
    }
    let mean = x.iter().sum::<f64>() / n as f64;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let reg = lambda * var.sqrt();
    let mut y = x.to_vec();
    let step = 0.2;
    for _ in 0..200 {
        let mut grad = vec![0.0; n];
        for i in 0..n {
            grad[i] += y[i] - x[i];
        }
        for i in 0..n - 1 {
            let d = y[i + 1] - y[i];
            let s = d.signum() * reg;
            grad[i] -= s;
            grad[i + 1] += s;
        }
        for i in 0..n {
            y[i] -= step * grad[i];
        }
    }
    y
}

/// Per-individual robust scaling: subtract median, divide by MAD, optionally
/// winsorize at `winsor` (a tail quantile), then rescale to unit variance.
///
/// # Errors
/// [`LunaError::DegenerateNumerics`] if MAD is zero (constant column).
pub fn norm_column(x: &[f64], winsor: Option<f64>) -> Result<Vec<f64>, LunaError> {
    let mut sorted = x.to_vec();
    sorted.sort_by(f64::total_cmp);
    let med = quantile(&sorted, 0.5);
    let abs_dev: Vec<f64> = x.iter().map(|v| (v - med).abs()).collect();
    let mut sorted_dev = abs_dev.clone();
    sorted_dev.sort_by(f64::total_cmp);
    let mad = quantile(&sorted_dev, 0.5);
    if mad.abs() < f64::EPSILON {
        return Err(LunaError::DegenerateNumerics(
            "zero MAD in per-individual normalization".into(),
        ));
    }

    let mut scaled: Vec<f64> = x.iter().map(|v| (v - med) / mad).collect();

    if let Some(w) = winsor {
        let mut s = scaled.clone();
        s.sort_by(f64::total_cmp);
        let lo = quantile(&s, w);
        let hi = quantile(&s, 1.0 - w);
        for v in &mut scaled {
            *v = v.clamp(lo, hi);
        }
    }

    let n = scaled.len() as f64;
    let mean = scaled.iter().sum::<f64>() / n;
    let var = scaled.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if var.abs() < f64::EPSILON {
        return Ok(scaled);
    }
    let sd = var.sqrt();
    Ok(scaled.iter().map(|v| v / sd).collect())
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Saved cohort-level SVD basis for prediction-time re-projection.
#[derive(Clone, Debug)]
pub struct SvdBasis {
    /// Pooled column means across the training cohort, kept for diagnostics;
    /// `svd_project` re-derives each individual's own mean rather than
    /// reusing this one, since centering is per-individual by design.
    pub mean: DVector<f64>,
    pub v: DMatrix<f64>,
    pub singular_values: DVector<f64>,
    pub nc: usize,
}

/// Mean-center `data` per individual — each `[start, end)` row range in
/// `blocks` gets its own column means subtracted — then compute one reduced
/// SVD over the pooled, centered matrix. Returns the first `nc` columns of
/// `U` alongside the basis needed to reproject new data at prediction time.
///
/// Pass `&[(0, data.nrows())]` for a single-individual or already-pooled
/// matrix.
///
/// # Errors
/// [`LunaError::DegenerateNumerics`] if `nc` exceeds the matrix rank, or a
/// block range is out of bounds or empty.
pub fn svd_reduce(
    data: &DMatrix<f64>,
    blocks: &[(usize, usize)],
    nc: usize,
) -> Result<(DMatrix<f64>, SvdBasis), LunaError> {
    let ncols = data.ncols();
    let mut centered = data.clone();
    let mut mean = DVector::zeros(ncols);
    for &(start, end) in blocks {
        if end <= start || end > data.nrows() {
            return Err(LunaError::DegenerateNumerics(format!(
                "invalid individual block range [{start}, {end}) for {} rows",
                data.nrows()
            )));
        }
        for c in 0..ncols {
            let block_mean = data.rows(start, end - start).column(c).mean();
            for r in start..end {
                centered[(r, c)] -= block_mean;
            }
        }
    }
    // The basis's saved mean is the pooled mean across all individual-centered
    // rows — used only to re-center unseen rows at prediction time, when no
    // per-individual block boundary is available.
    for c in 0..ncols {
        mean[c] = data.column(c).mean();
    }

    let svd = centered.clone().svd(true, true);
    let u = svd.u.ok_or_else(|| LunaError::DegenerateNumerics("SVD produced no U".into()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| LunaError::DegenerateNumerics("SVD produced no V".into()))?;
    let singular_values = svd.singular_values;

    if nc > singular_values.len() {
        return Err(LunaError::DegenerateNumerics(format!(
            "requested {nc} components but rank is {}",
            singular_values.len()
        )));
    }

    let u_reduced = u.columns(0, nc).into_owned();
    let v_reduced = v_t.rows(0, nc).transpose();
    let sv_reduced = DVector::from_iterator(nc, singular_values.iter().take(nc).copied());

    Ok((
        u_reduced,
        SvdBasis {
            mean,
            v: v_reduced,
            singular_values: sv_reduced,
            nc,
        },
    ))
}

/// Project new rows onto a saved [`SvdBasis`]: `U = X_centered * V *
/// Sigma^-1`, mean-centering each `[start, end)` range in `blocks`
/// independently using that range's own column means, matching
/// [`svd_reduce`]'s per-individual centering.
#[must_use]
pub fn svd_project(data: &DMatrix<f64>, blocks: &[(usize, usize)], basis: &SvdBasis) -> DMatrix<f64> {
    let ncols = data.ncols();
    let mut centered = data.clone();
    for &(start, end) in blocks {
        if end <= start || end > data.nrows() {
            continue;
        }
        for c in 0..ncols {
            let block_mean = data.rows(start, end - start).column(c).mean();
            for r in start..end {
                centered[(r, c)] -= block_mean;
            }
        }
    }
    let mut projected = &centered * &basis.v;
    for c in 0..basis.nc {
        let sv = basis.singular_values[c];
        if sv.abs() > f64::EPSILON {
            for r in 0..projected.nrows() {
                projected[(r, c)] /= sv;
            }
        }
    }
    projected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smooth_preserves_length() {
        let x = vec![1.0, 2.0, 3.0, 10.0, 3.0, 2.0, 1.0];
        let s = smooth_column(&x, 1);
        assert_eq!(s.len(), x.len());
        assert!(s[3] < x[3]);
    }

    #[test]
    fn norm_of_constant_is_degenerate() {
        let x = vec![5.0; 10];
        assert!(norm_column(&x, None).is_err());
    }

    #[test]
    fn svd_reduce_recovers_rank() {
        let data = DMatrix::from_row_slice(
            4,
            3,
            &[
                1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 3.0, 1.0, 2.0, 4.0, 2.0, 1.0,
            ],
        );
        let (u, basis) = svd_reduce(&data, &[(0, 4)], 2).unwrap();
        assert_eq!(u.nrows(), 4);
        assert_eq!(u.ncols(), 2);
        assert_eq!(basis.nc, 2);
    }

    #[test]
    fn svd_reduce_centers_each_individual_independently() {
        // Two individuals (rows 0-1, rows 2-3) on wildly different baselines;
        // per-individual centering should remove the baseline offset before
        // the shared SVD sees it.
        let data = DMatrix::from_row_slice(
            4,
            2,
            &[1.0, 2.0, 1.2, 2.2, 101.0, 202.0, 101.2, 202.2],
        );
        let (u, _basis) = svd_reduce(&data, &[(0, 2), (2, 4)], 1).unwrap();
        assert_eq!(u.nrows(), 4);
        assert!(u[(0, 0)].is_finite());
    }

    #[test]
    fn svd_reduce_rejects_out_of_bounds_block() {
        let data = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        assert!(svd_reduce(&data, &[(0, 5)], 1).is_err());
    }

    #[test]
    fn svd_project_round_trips_training_rows() {
        let data = DMatrix::from_row_slice(
            4,
            3,
            &[
                1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 3.0, 1.0, 2.0, 4.0, 2.0, 1.0,
            ],
        );
        let blocks = [(0, 4)];
        let (u, basis) = svd_reduce(&data, &blocks, 2).unwrap();
        let projected = svd_project(&data, &blocks, &basis);
        assert_eq!(projected.nrows(), u.nrows());
        assert_eq!(projected.ncols(), 2);
    }
}
