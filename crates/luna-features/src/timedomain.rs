//! Scalar time-domain features: Hjorth parameters, permutation entropy,
//! skewness, kurtosis, mean, and fractal dimension.

use luna_core::error::LunaError;

/// Hjorth activity (log variance), mobility, and complexity.
///
/// # Errors
/// [`LunaError::DegenerateNumerics`] if `x` has fewer than 3 samples or zero
/// variance (mobility/complexity undefined).
pub fn hjorth(x: &[f64]) -> Result<(f64, f64, f64), LunaError> {
    if x.len() < 3 {
        return Err(LunaError::DegenerateNumerics(
            "hjorth needs at least 3 samples".into(),
        ));
    }
    let d1 = diff(x);
    let d2 = diff(&d1);

    let var0 = variance(x);
    let var1 = variance(&d1);
    let var2 = variance(&d2);

    if var0.abs() < f64::EPSILON || var1.abs() < f64::EPSILON {
        return Err(LunaError::DegenerateNumerics(
            "zero-variance signal in hjorth".into(),
        ));
    }

    let activity = var0.max(f64::MIN_POSITIVE).ln();
    let mobility = (var1 / var0).sqrt();
    let mobility_d1 = (var2 / var1).sqrt();
    let complexity = mobility_d1 / mobility;
    Ok((activity, mobility, complexity))
}

fn diff(x: &[f64]) -> Vec<f64> {
    x.windows(2).map(|w| w[1] - w[0]).collect()
}

fn variance(x: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Sample mean, third standardized moment, and fourth standardized moment
/// minus 3 (excess kurtosis).
#[must_use]
pub fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

/// # Errors
/// [`LunaError::DegenerateNumerics`] if variance is zero.
pub fn skewness(x: &[f64]) -> Result<f64, LunaError> {
    let m = mean(x);
    let var = variance(x);
    if var.abs() < f64::EPSILON {
        return Err(LunaError::DegenerateNumerics("zero-variance skewness".into()));
    }
    let sd = var.sqrt();
    let n = x.len() as f64;
    Ok(x.iter().map(|v| ((v - m) / sd).powi(3)).sum::<f64>() / n)
}

/// # Errors
/// [`LunaError::DegenerateNumerics`] if variance is zero.
pub fn kurtosis(x: &[f64]) -> Result<f64, LunaError> {
    let m = mean(x);
    let var = variance(x);
    if var.abs() < f64::EPSILON {
        return Err(LunaError::DegenerateNumerics("zero-variance kurtosis".into()));
    }
    let sd = var.sqrt();
    let n = x.len() as f64;
    Ok(x.iter().map(|v| ((v - m) / sd).powi(4)).sum::<f64>() / n - 3.0)
}

/// Petrosian fractal dimension, a cheap proxy for signal complexity based on
/// sign changes in the first difference.
#[must_use]
pub fn petrosian_fd(x: &[f64]) -> f64 {
    let n = x.len() as f64;
    let d = diff(x);
    let sign_changes = d.windows(2).filter(|w| (w[0] * w[1]) < 0.0).count() as f64;
    if sign_changes == 0.0 {
        return 0.0;
    }
    n.ln() / (n.ln() + (n / (n + 0.4 * sign_changes)).ln())
}

/// Permutation entropy of order `m` (Bandt-Pompe), normalized to `[0, 1]` by
/// dividing by `ln(m!)`.
///
/// # Errors
/// [`LunaError::DegenerateNumerics`] if `x` is too short for the requested
/// order (`len < m`).
pub fn permutation_entropy(x: &[f64], m: usize) -> Result<f64, LunaError> {
    if x.len() < m || m < 2 {
        return Err(LunaError::DegenerateNumerics(format!(
            "permutation entropy order {m} needs at least {m} samples"
        )));
    }
    let mut counts: std::collections::HashMap<Vec<usize>, u64> = std::collections::HashMap::new();
    for w in x.windows(m) {
        let mut idx: Vec<usize> = (0..m).collect();
        idx.sort_by(|&a, &b| w[a].total_cmp(&w[b]));
        let mut rank = vec![0usize; m];
        for (r, &i) in idx.iter().enumerate() {
            rank[i] = r;
        }
        *counts.entry(rank).or_insert(0) += 1;
    }
    let total: u64 = counts.values().sum();
    let entropy: f64 = counts
        .values()
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.ln()
        })
        .sum();
    let max_entropy = factorial(m).ln();
    Ok(if max_entropy > 0.0 {
        entropy / max_entropy
    } else {
        0.0
    })
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, i| acc * i as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hjorth_on_constant_signal_is_degenerate() {
        let x = vec![1.0; 10];
        assert!(hjorth(&x).is_err());
    }

    #[test]
    fn permutation_entropy_of_monotone_is_zero() {
        let x: Vec<f64> = (0..20).map(f64::from).collect();
        let pe = permutation_entropy(&x, 3).unwrap();
        assert!(pe < 1e-9, "pe = {pe}");
    }

    #[test]
    fn skewness_of_symmetric_signal_near_zero() {
        let x = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        let sk = skewness(&x).unwrap();
        assert!(sk.abs() < 1e-9);
    }
}
