//! Channel-equivalence combining (§4.8): combine independent per-channel
//! `(epochs, posteriors)` solutions for equivalent channels (e.g. `C3`,
//! `C4`) into one consensus solution without mutating any input mid-combine.

/// One channel's solution: epoch index plus its posterior row.
#[derive(Clone, Debug)]
pub struct ChannelSolution {
    pub channel: String,
    pub epochs: Vec<u32>,
    pub posteriors: Vec<Vec<f64>>,
}

/// Consensus rule across equivalent channels' solutions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CombineRule {
    /// Take the row with the single highest max-class posterior.
    MostConfident,
    /// Geometric mean of rows whose own confidence clears `min_confidence`.
    GeometricMean,
    /// Arithmetic mean weighted by each row's own max-class confidence.
    ConfidenceWeightedMean,
}

fn confidence(row: &[f64]) -> f64 {
    row.iter().cloned().fold(f64::MIN, f64::max)
}

fn normalize(row: &mut [f64]) {
    let sum: f64 = row.iter().sum();
    if sum.abs() > f64::EPSILON {
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}

fn combine_rows(rows: &[&Vec<f64>], rule: CombineRule, min_confidence: f64) -> Vec<f64> {
    let k = rows[0].len();
    match rule {
        CombineRule::MostConfident => rows
            .iter()
            .max_by(|a, b| confidence(a).total_cmp(&confidence(b)))
            .map(|r| (*r).clone())
            .unwrap_or_else(|| vec![1.0 / k as f64; k]),
        CombineRule::GeometricMean => {
            let eligible: Vec<&&Vec<f64>> = rows
                .iter()
                .filter(|r| confidence(r) >= min_confidence)
                .collect();
            let pool: Vec<&Vec<f64>> = if eligible.is_empty() {
                rows.to_vec()
            } else {
                eligible.into_iter().map(|r| *r).collect()
            };
            let mut out = vec![1.0; k];
            for row in &pool {
                for c in 0..k {
                    out[c] *= row[c].max(1e-12);
                }
            }
            for v in &mut out {
                *v = v.powf(1.0 / pool.len() as f64);
            }
            normalize(&mut out);
            out
        }
        CombineRule::ConfidenceWeightedMean => {
            let weights: Vec<f64> = rows.iter().map(|r| confidence(r)).collect();
            let total: f64 = weights.iter().sum();
            let mut out = vec![0.0; k];
            if total.abs() < f64::EPSILON {
                for r in rows {
                    for c in 0..k {
                        out[c] += r[c];
                    }
                }
                for v in &mut out {
                    *v /= rows.len() as f64;
                }
            } else {
                for (row, w) in rows.iter().zip(weights.iter()) {
                    for c in 0..k {
                        out[c] += row[c] * w;
                    }
                }
                for v in &mut out {
                    *v /= total;
                }
            }
            normalize(&mut out);
            out
        }
    }
}

/// Combine several channels' solutions into one, keyed by epoch index.
/// Epochs present in only one solution pass through unchanged; epochs
/// present in more than one are combined per `rule`.
#[must_use]
pub fn combine(
    solutions: &[ChannelSolution],
    rule: CombineRule,
    min_confidence: f64,
) -> ChannelSolution {
    use std::collections::BTreeMap;
    let mut by_epoch: BTreeMap<u32, Vec<&Vec<f64>>> = BTreeMap::new();
    for sol in solutions {
        for (epoch, row) in sol.epochs.iter().zip(sol.posteriors.iter()) {
            by_epoch.entry(*epoch).or_default().push(row);
        }
    }

    let mut epochs = Vec::with_capacity(by_epoch.len());
    let mut posteriors = Vec::with_capacity(by_epoch.len());
    for (epoch, rows) in by_epoch {
        epochs.push(epoch);
        if rows.len() == 1 {
            posteriors.push(rows[0].clone());
        } else {
            posteriors.push(combine_rows(&rows, rule, min_confidence));
        }
    }

    ChannelSolution {
        channel: "combined".to_string(),
        epochs,
        posteriors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sol(channel: &str, epochs: &[u32], rows: &[[f64; 2]]) -> ChannelSolution {
        ChannelSolution {
            channel: channel.to_string(),
            epochs: epochs.to_vec(),
            posteriors: rows.iter().map(|r| r.to_vec()).collect(),
        }
    }

    #[test]
    fn passthrough_epoch_present_in_one_channel_only() {
        let a = sol("C3", &[0, 1], &[[0.9, 0.1], [0.5, 0.5]]);
        let b = sol("C4", &[0], &[[0.8, 0.2]]);
        let combined = combine(&[a, b], CombineRule::MostConfident, 0.7);
        assert_eq!(combined.epochs, vec![0, 1]);
        // epoch 1 only in C3, passes through unchanged.
        assert_eq!(combined.posteriors[1], vec![0.5, 0.5]);
    }

    #[test]
    fn most_confident_picks_higher_confidence_row() {
        let a = sol("C3", &[0], &[[0.9, 0.1]]);
        let b = sol("C4", &[0], &[[0.6, 0.4]]);
        let combined = combine(&[a, b], CombineRule::MostConfident, 0.7);
        assert_eq!(combined.posteriors[0], vec![0.9, 0.1]);
    }

    #[test]
    fn confidence_weighted_mean_sums_to_one() {
        let a = sol("C3", &[0], &[[0.9, 0.1]]);
        let b = sol("C4", &[0], &[[0.6, 0.4]]);
        let combined = combine(&[a, b], CombineRule::ConfidenceWeightedMean, 0.7);
        let sum: f64 = combined.posteriors[0].iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
