//! SOAP: SVD-compacted, confident-epoch discriminant refinement (§4.8).
//!
//! Fits an LDA/QDA classifier on the epochs the base model is already
//! confident about, then re-predicts the rest and only adopts the new
//! posterior where it raises that epoch's confidence — SOAP never lowers a
//! per-epoch confidence score.

use luna_core::error::LunaError;
use nalgebra::{DMatrix, DVector};

/// Discriminant variant SOAP fits on the confident training rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Discriminant {
    /// Pooled within-class covariance (linear boundary).
    #[default]
    Lda,
    /// Per-class covariance (quadratic boundary); requires at least `p + 2`
    /// confident rows for every class present, where `p` is the number of
    /// SVD components.
    Qda,
}

/// How SOAP handles stages with too few confident rows to estimate a
/// reliable per-class covariance or likelihood-rescaling factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RareStagePolicy {
    /// Keep the stage in the discriminant fit as-is.
    #[default]
    LeaveAsIs,
    /// Drop the stage from the confident training set entirely.
    Drop,
    /// Keep the stage, but grid-search a per-class likelihood rescaling
    /// factor that maximizes agreement (Cohen's kappa) between SOAP's hard
    /// calls and the base model's hard calls across all epochs.
    Rescale,
}

#[derive(Clone, Debug)]
pub struct SoapConfig {
    pub n_components: usize,
    pub confidence_threshold: f64,
    pub min_confident_per_class: usize,
    pub discriminant: Discriminant,
    pub rare_stage_policy: RareStagePolicy,
}

impl Default for SoapConfig {
    fn default() -> Self {
        Self {
            n_components: 8,
            confidence_threshold: 0.8,
            min_confident_per_class: 10,
            discriminant: Discriminant::Lda,
            rare_stage_policy: RareStagePolicy::LeaveAsIs,
        }
    }
}

fn argmax(row: &[f64]) -> (usize, f64) {
    let mut best = 0;
    for i in 1..row.len() {
        if row[i] > row[best] {
            best = i;
        }
    }
    (best, row[best])
}

struct ClassGaussian {
    mean: DVector<f64>,
    cov_inv: DMatrix<f64>,
    log_det: f64,
    log_prior: f64,
}

fn fit_gaussian(rows: &[DVector<f64>], log_prior: f64) -> Result<ClassGaussian, LunaError> {
    let p = rows[0].len();
    let n = rows.len() as f64;
    let mut mean = DVector::zeros(p);
    for r in rows {
        mean += r;
    }
    mean /= n;

    let mut cov = DMatrix::zeros(p, p);
    for r in rows {
        let d = r - &mean;
        cov += &d * d.transpose();
    }
    cov /= (n - 1.0).max(1.0);
    // Ridge regularization guards against singular covariance on small classes.
    for i in 0..p {
        cov[(i, i)] += 1e-6;
    }

    let cov_inv = cov
        .clone()
        .try_inverse()
        .ok_or_else(|| LunaError::DegenerateNumerics("singular class covariance".into()))?;
    let log_det = cov
        .determinant()
        .max(f64::MIN_POSITIVE)
        .ln();

    Ok(ClassGaussian {
        mean,
        cov_inv,
        log_det,
        log_prior,
    })
}

fn pooled_cov(
    by_class: &[Vec<DVector<f64>>],
) -> Result<DMatrix<f64>, LunaError> {
    let p = by_class
        .iter()
        .find(|c| !c.is_empty())
        .ok_or_else(|| LunaError::DegenerateNumerics("no confident rows for any class".into()))?[0]
        .len();
    let mut pooled = DMatrix::zeros(p, p);
    let mut total_n = 0.0;
    for rows in by_class {
        if rows.len() < 2 {
            continue;
        }
        let n = rows.len() as f64;
        let mut mean = DVector::zeros(p);
        for r in rows {
            mean += r;
        }
        mean /= n;
        let mut cov = DMatrix::zeros(p, p);
        for r in rows {
            let d = r - &mean;
            cov += &d * d.transpose();
        }
        pooled += cov;
        total_n += n - 1.0;
    }
    if total_n < 1.0 {
        return Err(LunaError::DegenerateNumerics(
            "insufficient confident rows to pool covariance".into(),
        ));
    }
    pooled /= total_n;
    for i in 0..p {
        pooled[(i, i)] += 1e-6;
    }
    Ok(pooled)
}

/// Fit per-class Gaussians from confident rows: LDA shares one pooled
/// covariance across classes, QDA fits one per class.
fn fit_discriminant(
    by_class: &[Vec<DVector<f64>>],
    discriminant: Discriminant,
) -> Result<Vec<Option<ClassGaussian>>, LunaError> {
    let total: usize = by_class.iter().map(Vec::len).sum();
    match discriminant {
        Discriminant::Lda => {
            let pooled_inv = pooled_cov(by_class)?
                .try_inverse()
                .ok_or_else(|| LunaError::DegenerateNumerics("singular pooled covariance".into()))?;
            let log_det = 0.0; // shared across classes, cancels in comparison.
            Ok(by_class
                .iter()
                .map(|rows| {
                    if rows.is_empty() {
                        None
                    } else {
                        let n = rows.len() as f64;
                        let p = rows[0].len();
                        let mut mean = DVector::zeros(p);
                        for r in rows {
                            mean += r;
                        }
                        mean /= n;
                        Some(ClassGaussian {
                            mean,
                            cov_inv: pooled_inv.clone(),
                            log_det,
                            log_prior: (n / total as f64).ln(),
                        })
                    }
                })
                .collect())
        }
        Discriminant::Qda => by_class
            .iter()
            .map(|rows| {
                if rows.is_empty() {
                    Ok(None)
                } else {
                    let log_prior = (rows.len() as f64 / total as f64).ln();
                    fit_gaussian(rows, log_prior).map(Some)
                }
            })
            .collect(),
    }
}

fn discriminant_score(g: &ClassGaussian, x: &DVector<f64>) -> f64 {
    let d = x - &g.mean;
    let quad = (d.transpose() * &g.cov_inv * &d)[(0, 0)];
    g.log_prior - 0.5 * g.log_det - 0.5 * quad
}

/// Grid of multiplicative prior-rescaling factors tried for each
/// under-represented stage.
const RESCALE_GRID: &[f64] = &[0.1, 0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0];

/// Cohen's kappa between two hard-call label sequences over `n_classes`.
fn cohens_kappa(a: &[usize], b: &[usize], n_classes: usize) -> f64 {
    let n = a.len() as f64;
    if n == 0.0 {
        return 1.0;
    }
    let mut confusion = vec![0.0; n_classes * n_classes];
    let mut agree = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        confusion[x * n_classes + y] += 1.0;
        if x == y {
            agree += 1.0;
        }
    }
    let po = agree / n;
    let mut row_sum = vec![0.0; n_classes];
    let mut col_sum = vec![0.0; n_classes];
    for i in 0..n_classes {
        for j in 0..n_classes {
            row_sum[i] += confusion[i * n_classes + j];
            col_sum[j] += confusion[i * n_classes + j];
        }
    }
    let pe: f64 = (0..n_classes).map(|i| (row_sum[i] / n) * (col_sum[i] / n)).sum();
    if (1.0 - pe).abs() < f64::EPSILON {
        return 1.0;
    }
    (po - pe) / (1.0 - pe)
}

/// SOAP's hard call for every row: the original posterior's argmax for
/// confident rows, the discriminant's argmax (under `gaussians`) otherwise.
fn soap_hard_calls(
    posteriors: &[Vec<f64>],
    svd_scores: &DMatrix<f64>,
    confident: &[bool],
    gaussians: &[Option<ClassGaussian>],
) -> Vec<usize> {
    (0..posteriors.len())
        .map(|i| {
            if confident[i] {
                argmax(&posteriors[i]).0
            } else {
                let x = svd_scores.row(i).transpose().into_owned();
                let scores: Vec<f64> = gaussians
                    .iter()
                    .map(|g| g.as_ref().map_or(f64::MIN, |g| discriminant_score(g, &x)))
                    .collect();
                argmax(&scores).0
            }
        })
        .collect()
}

/// For every under-represented class (non-empty, fewer than
/// `min_confident_per_class` confident rows), grid-search a multiplicative
/// prior-rescaling factor that maximizes kappa between SOAP's hard calls
/// (using the rescaled prior) and the base model's hard calls (the
/// posteriors' own argmax), applying the best factor found in place.
fn rescale_rare_classes(
    gaussians: &mut [Option<ClassGaussian>],
    by_class: &[Vec<DVector<f64>>],
    posteriors: &[Vec<f64>],
    svd_scores: &DMatrix<f64>,
    confident: &[bool],
    min_confident_per_class: usize,
) {
    let k = posteriors[0].len();
    let original_hard: Vec<usize> = posteriors.iter().map(|p| argmax(p).0).collect();

    for cls in 0..k {
        let n_rows = by_class[cls].len();
        if n_rows == 0 || n_rows >= min_confident_per_class {
            continue;
        }
        let Some(base_log_prior) = gaussians[cls].as_ref().map(|g| g.log_prior) else {
            continue;
        };

        let mut best_factor = 1.0;
        let mut best_kappa = f64::MIN;
        for &factor in RESCALE_GRID {
            if let Some(g) = &mut gaussians[cls] {
                g.log_prior = base_log_prior + factor.ln();
            }
            let calls = soap_hard_calls(posteriors, svd_scores, confident, gaussians);
            let kappa = cohens_kappa(&original_hard, &calls, k);
            if kappa > best_kappa {
                best_kappa = kappa;
                best_factor = factor;
            }
        }
        if let Some(g) = &mut gaussians[cls] {
            g.log_prior = base_log_prior + best_factor.ln();
        }
    }
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().cloned().fold(f64::MIN, f64::max);
    let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    if sum.abs() < f64::EPSILON {
        vec![1.0 / scores.len() as f64; scores.len()]
    } else {
        exp.iter().map(|e| e / sum).collect()
    }
}

/// Refine `posteriors` (rows = epochs, columns = classes) using the
/// SVD-compacted `svd_scores` (rows = epochs, columns = components) as the
/// discriminant's feature space.
///
/// # Errors
/// [`LunaError::DegenerateNumerics`] if QDA is requested but a present
/// class has too few confident rows, or if no class has enough confident
/// rows to fit at all.
pub fn refine(
    posteriors: &mut [Vec<f64>],
    svd_scores: &DMatrix<f64>,
    config: &SoapConfig,
) -> Result<usize, LunaError> {
    let n = posteriors.len();
    let k = posteriors[0].len();

    let mut by_class: Vec<Vec<DVector<f64>>> = vec![Vec::new(); k];
    let mut confident = vec![false; n];
    for i in 0..n {
        let (cls, conf) = argmax(&posteriors[i]);
        if conf >= config.confidence_threshold {
            confident[i] = true;
            by_class[cls].push(svd_scores.row(i).transpose().into_owned());
        }
    }

    if config.discriminant == Discriminant::Qda {
        let p = config.n_components;
        for (cls, rows) in by_class.iter_mut().enumerate() {
            if !rows.is_empty() && rows.len() < p + 2 {
                match config.rare_stage_policy {
                    RareStagePolicy::Drop => rows.clear(),
                    // Rescaling adjusts the class's prior after the fit, not
                    // the covariance estimate itself — a singular per-class
                    // covariance is still fatal for QDA under this policy.
                    RareStagePolicy::LeaveAsIs | RareStagePolicy::Rescale => {
                        return Err(LunaError::DegenerateNumerics(format!(
                            "class {cls} has {} confident rows, fewer than p+2={} required for QDA",
                            rows.len(),
                            p + 2
                        )));
                    }
                }
            }
        }
    }

    let mut gaussians = fit_discriminant(&by_class, config.discriminant)?;

    if config.rare_stage_policy == RareStagePolicy::Rescale {
        rescale_rare_classes(
            &mut gaussians,
            &by_class,
            posteriors,
            svd_scores,
            &confident,
            config.min_confident_per_class,
        );
    }

    let mut n_improved = 0;
    for i in 0..n {
        if confident[i] {
            continue;
        }
        let x = svd_scores.row(i).transpose().into_owned();
        let scores: Vec<f64> = gaussians
            .iter()
            .map(|g| g.as_ref().map_or(f64::MIN, |g| discriminant_score(g, &x)))
            .collect();
        let refined = softmax(&scores);
        let (_, refined_conf) = argmax(&refined);
        let (_, original_conf) = argmax(&posteriors[i]);
        if refined_conf > original_conf {
            posteriors[i] = refined;
            n_improved += 1;
        }
    }

    Ok(n_improved)
}

/// Run the full SOAP pipeline end to end: SVD-compact `features` (centered
/// per individual using `blocks`, the same `[start, end)` row ranges
/// `luna_corpus::BlockSpan` records) down to `config.n_components`, then
/// [`refine`] `posteriors` using the compacted scores.
///
/// # Errors
/// Propagates [`luna_features::post::svd_reduce`]'s or [`refine`]'s failure.
pub fn refine_from_features(
    posteriors: &mut [Vec<f64>],
    features: &DMatrix<f64>,
    blocks: &[(usize, usize)],
    config: &SoapConfig,
) -> Result<usize, LunaError> {
    let (scores, _basis) = luna_features::post::svd_reduce(features, blocks, config.n_components)?;
    refine(posteriors, &scores, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separated_scores() -> DMatrix<f64> {
        // Two well-separated clusters plus one ambiguous point near cluster 0.
        DMatrix::from_row_slice(
            5,
            2,
            &[
                0.0, 0.0, 0.1, 0.1, -0.1, 0.0, 10.0, 10.0, 0.2, 0.15,
            ],
        )
    }

    #[test]
    fn refine_improves_ambiguous_epoch_confidence() {
        let scores = separated_scores();
        let mut posts = vec![
            vec![0.9, 0.1],
            vec![0.85, 0.15],
            vec![0.8, 0.2],
            vec![0.1, 0.9],
            vec![0.55, 0.45],
        ];
        let cfg = SoapConfig {
            n_components: 2,
            confidence_threshold: 0.8,
            min_confident_per_class: 1,
            discriminant: Discriminant::Lda,
            rare_stage_policy: RareStagePolicy::LeaveAsIs,
        };
        let improved = refine(&mut posts, &scores, &cfg).unwrap();
        assert_eq!(improved, 1);
        assert!(posts[4][0] > 0.55);
    }

    #[test]
    fn qda_rejects_insufficient_rows_by_default() {
        let scores = separated_scores();
        let mut posts = vec![
            vec![0.9, 0.1],
            vec![0.85, 0.15],
            vec![0.8, 0.2],
            vec![0.1, 0.9],
            vec![0.55, 0.45],
        ];
        let cfg = SoapConfig {
            n_components: 2,
            confidence_threshold: 0.8,
            min_confident_per_class: 1,
            discriminant: Discriminant::Qda,
            rare_stage_policy: RareStagePolicy::LeaveAsIs,
        };
        assert!(refine(&mut posts, &scores, &cfg).is_err());
    }

    #[test]
    fn rescale_policy_keeps_rare_class_and_adjusts_its_prior() {
        let scores = separated_scores();
        let mut posts = vec![
            vec![0.9, 0.1],
            vec![0.85, 0.15],
            vec![0.8, 0.2],
            vec![0.1, 0.9],
            vec![0.55, 0.45],
        ];
        let cfg = SoapConfig {
            n_components: 2,
            confidence_threshold: 0.8,
            // class 1 has only one confident row (row 3): rare under this
            // threshold, so the rescale grid search engages for it.
            min_confident_per_class: 2,
            discriminant: Discriminant::Lda,
            rare_stage_policy: RareStagePolicy::Rescale,
        };
        // Rescale keeps every class in the fit (unlike Drop) and must not
        // error out the way LeaveAsIs-under-QDA would for a singular class.
        assert!(refine(&mut posts, &scores, &cfg).is_ok());
    }

    #[test]
    fn cohens_kappa_is_one_for_identical_sequences() {
        let a = vec![0, 1, 1, 0, 2];
        assert!((cohens_kappa(&a, &a, 3) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn refine_from_features_runs_svd_then_refine() {
        let features = DMatrix::from_row_slice(
            5,
            3,
            &[
                0.0, 0.0, 0.0, 0.1, 0.1, 0.05, -0.1, 0.0, 0.0, 10.0, 10.0, 9.5, 0.2, 0.15, 0.1,
            ],
        );
        let mut posts = vec![
            vec![0.9, 0.1],
            vec![0.85, 0.15],
            vec![0.8, 0.2],
            vec![0.1, 0.9],
            vec![0.55, 0.45],
        ];
        let cfg = SoapConfig {
            n_components: 2,
            confidence_threshold: 0.8,
            min_confident_per_class: 1,
            discriminant: Discriminant::Lda,
            rare_stage_policy: RareStagePolicy::LeaveAsIs,
        };
        let result = refine_from_features(&mut posts, &features, &[(0, 5)], &cfg);
        assert!(result.is_ok());
    }
}
