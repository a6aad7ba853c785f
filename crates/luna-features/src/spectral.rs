//! Welch power spectral density estimation and the canonical sleep-EEG
//! frequency bands.

use luna_core::error::LunaError;
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

/// A canonical sleep-EEG band, in Hz, half-open `[lo, hi)`.
#[derive(Clone, Copy, Debug)]
pub struct Band {
    pub name: &'static str,
    pub lo: f64,
    pub hi: f64,
}

/// The six bands `4.6`/`4.6` (BANDS/RBANDS/VBANDS) iterate over, in order.
pub const BANDS: [Band; 6] = [
    Band { name: "slow", lo: 0.5, hi: 1.0 },
    Band { name: "delta", lo: 1.0, hi: 4.0 },
    Band { name: "theta", lo: 4.0, hi: 8.0 },
    Band { name: "alpha", lo: 8.0, hi: 12.0 },
    Band { name: "sigma", lo: 12.0, hi: 15.0 },
    Band { name: "beta", lo: 15.0, hi: 30.0 },
];

/// Hz spacing of Welch output bins, fixed by the feature specification.
pub const DELTA_F: f64 = 0.25;

/// One Welch-estimated power spectrum: bin frequencies and power values.
#[derive(Clone, Debug)]
pub struct Psd {
    pub freqs: Vec<f64>,
    pub power: Vec<f64>,
    /// Per-segment power, for [`crate::spectral::cv_in_range`].
    pub per_segment: Vec<Vec<f64>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Averaging {
    Mean,
    Median,
}

/// Compute a Welch PSD over `samples` at `fs` Hz: segment length and overlap
/// in seconds, a Tukey(0.5) taper by default, averaged across segments by
/// `avg`.
///
/// # Errors
/// [`LunaError::DegenerateNumerics`] if `samples` is too short for even one
/// segment.
pub fn welch(
    samples: &[f64],
    fs: f64,
    seg_sec: f64,
    overlap_frac: f64,
    avg: Averaging,
) -> Result<Psd, LunaError> {
    let seg_len = (seg_sec * fs).round() as usize;
    if seg_len < 4 || samples.len() < seg_len {
        return Err(LunaError::DegenerateNumerics(
            "epoch too short for requested Welch segment length".into(),
        ));
    }
    let step = ((1.0 - overlap_frac) * seg_len as f64).round().max(1.0) as usize;
    let window = tukey_window(seg_len, 0.5);
    let win_power: f64 = window.iter().map(|w| w * w).sum();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(seg_len);

    let n_bins = seg_len / 2 + 1;
    let mut per_segment: Vec<Vec<f64>> = Vec::new();

    let mean: f64 = samples.iter().sum::<f64>() / samples.len() as f64;

    let mut start = 0;
    while start + seg_len <= samples.len() {
        let mut buf: Vec<Complex64> = (0..seg_len)
            .map(|i| Complex64::new((samples[start + i] - mean) * window[i], 0.0))
            .collect();
        fft.process(&mut buf);
        let mut seg_power = Vec::with_capacity(n_bins);
        for bin in buf.iter().take(n_bins) {
            let p = (bin.re * bin.re + bin.im * bin.im) / (fs * win_power);
            seg_power.push(p);
        }
        per_segment.push(seg_power);
        start += step;
    }

    if per_segment.is_empty() {
        return Err(LunaError::DegenerateNumerics(
            "no complete Welch segments fit in the epoch".into(),
        ));
    }

    let power = average_segments(&per_segment, avg);
    let freqs: Vec<f64> = (0..n_bins).map(|k| k as f64 * fs / seg_len as f64).collect();

    Ok(Psd {
        freqs,
        power,
        per_segment,
    })
}

fn average_segments(segments: &[Vec<f64>], avg: Averaging) -> Vec<f64> {
    let n_bins = segments[0].len();
    let mut out = vec![0.0; n_bins];
    match avg {
        Averaging::Mean => {
            for seg in segments {
                for (o, s) in out.iter_mut().zip(seg) {
                    *o += s;
                }
            }
            for o in &mut out {
                *o /= segments.len() as f64;
            }
        }
        Averaging::Median => {
            for bin in 0..n_bins {
                let mut vals: Vec<f64> = segments.iter().map(|s| s[bin]).collect();
                vals.sort_by(f64::total_cmp);
                out[bin] = median_sorted(&vals);
            }
        }
    }
    out
}

fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn tukey_window(n: usize, alpha: f64) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let mut w = vec![1.0; n];
    let taper = (alpha * (n as f64 - 1.0) / 2.0).floor() as usize;
    for i in 0..=taper.min(n - 1) {
        let x = std::f64::consts::PI * (2.0 * i as f64 / (alpha * (n as f64 - 1.0)) - 1.0);
        let v = 0.5 * (1.0 + x.cos());
        w[i] = v;
        w[n - 1 - i] = v;
    }
    w
}

/// Indices of `psd.freqs` within half-open `[lo, hi)`.
#[must_use]
pub fn bin_range(psd: &Psd, lo: f64, hi: f64) -> std::ops::Range<usize> {
    let start = psd.freqs.partition_point(|&f| f < lo);
    let end = psd.freqs.partition_point(|&f| f < hi);
    start..end
}

/// `true` if any bin in `[lo, hi)` is non-positive (degenerate Welch output).
#[must_use]
pub fn has_nonpositive_bin(psd: &Psd, lo: f64, hi: f64) -> bool {
    bin_range(psd, lo, hi).any(|i| psd.power[i] <= 0.0)
}

/// Log power of each bin in `[lwr, upr)`.
#[must_use]
pub fn log_psd(psd: &Psd, lwr: f64, upr: f64) -> Vec<f64> {
    bin_range(psd, lwr, upr)
        .map(|i| psd.power[i].max(f64::MIN_POSITIVE).ln())
        .collect()
}

/// Log of each `[lwr,upr)` bin relative to the sum of bins in `[z_lwr,z_upr)`.
#[must_use]
pub fn rel_psd(psd: &Psd, lwr: f64, upr: f64, z_lwr: f64, z_upr: f64) -> Vec<f64> {
    let denom: f64 = bin_range(psd, z_lwr, z_upr).map(|i| psd.power[i]).sum();
    let denom = denom.max(f64::MIN_POSITIVE);
    bin_range(psd, lwr, upr)
        .map(|i| (psd.power[i].max(f64::MIN_POSITIVE) / denom).ln())
        .collect()
}

/// Coefficient of variation (SD/mean) of each `[lwr,upr)` bin across Welch
/// segments.
#[must_use]
pub fn cv_psd(psd: &Psd, lwr: f64, upr: f64) -> Vec<f64> {
    bin_range(psd, lwr, upr)
        .map(|bin| {
            let vals: Vec<f64> = psd.per_segment.iter().map(|s| s[bin]).collect();
            cv(&vals)
        })
        .collect()
}

fn cv(vals: &[f64]) -> f64 {
    let n = vals.len() as f64;
    let mean = vals.iter().sum::<f64>() / n;
    if mean.abs() < f64::EPSILON {
        return 0.0;
    }
    let var = vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    var.sqrt() / mean
}

/// Total log power within a band (sum of linear power in range, then log).
#[must_use]
pub fn band_log_power(psd: &Psd, band: Band) -> f64 {
    let sum: f64 = bin_range(psd, band.lo, band.hi).map(|i| psd.power[i]).sum();
    sum.max(f64::MIN_POSITIVE).ln()
}

/// Relative band power: band sum over total `[0.5, 30)` sum.
#[must_use]
pub fn band_rel_power(psd: &Psd, band: Band) -> f64 {
    let total: f64 = bin_range(psd, 0.5, 30.0).map(|i| psd.power[i]).sum();
    let band_sum: f64 = bin_range(psd, band.lo, band.hi).map(|i| psd.power[i]).sum();
    (band_sum.max(f64::MIN_POSITIVE) / total.max(f64::MIN_POSITIVE)).ln()
}

/// CV of total band power across Welch segments.
#[must_use]
pub fn band_cv(psd: &Psd, band: Band) -> f64 {
    let range = bin_range(psd, band.lo, band.hi);
    let vals: Vec<f64> = psd
        .per_segment
        .iter()
        .map(|seg| range.clone().map(|i| seg[i]).sum())
        .collect();
    cv(&vals)
}

/// Linear regression slope of `log(power)` against `log(frequency)` over
/// 30-45 Hz, the spectral edge used to flag muscle/EMG contamination.
#[must_use]
pub fn spectral_slope(psd: &Psd) -> f64 {
    let range = bin_range(psd, 30.0, 45.0);
    let xs: Vec<f64> = range
        .clone()
        .map(|i| psd.freqs[i].max(f64::MIN_POSITIVE).ln())
        .collect();
    let ys: Vec<f64> = range
        .map(|i| psd.power[i].max(f64::MIN_POSITIVE).ln())
        .collect();
    if xs.len() < 2 {
        return 0.0;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let cov: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let var: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    if var.abs() < f64::EPSILON {
        0.0
    } else {
        cov / var
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn welch_peaks_near_input_frequency() {
        let fs = 128.0;
        let samples = sine(10.0, fs, (fs * 30.0) as usize);
        let psd = welch(&samples, fs, 4.0, 0.5, Averaging::Mean).unwrap();
        let peak_idx = psd
            .power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let peak_freq = psd.freqs[peak_idx];
        assert!((peak_freq - 10.0).abs() < 1.0, "peak at {peak_freq}");
    }

    #[test]
    fn too_short_epoch_is_degenerate() {
        let samples = vec![0.0; 10];
        let err = welch(&samples, 128.0, 4.0, 0.5, Averaging::Mean);
        assert!(err.is_err());
    }

    #[test]
    fn log_psd_bin_count_matches_spec() {
        let fs = 128.0;
        let samples = sine(5.0, fs, (fs * 30.0) as usize);
        let psd = welch(&samples, fs, 4.0, 0.5, Averaging::Mean).unwrap();
        let cols = log_psd(&psd, 0.5, 45.0);
        // Δf = fs/seg_len = 128/512 = 0.25 as required by the spec.
        assert_eq!(cols.len(), ((45.0 - 0.5) / DELTA_F).round() as usize + 1);
    }
}
