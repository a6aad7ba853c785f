//! The EDF collaborator API the extractor consumes: a source of epochs and
//! per-channel samples. Luna doesn't parse EDF itself here — callers supply
//! an implementation over whatever reader they have.

use luna_core::tick::Interval;

/// Source of epoch boundaries and per-channel samples for one recording.
pub trait EdfSource {
    /// Index of the first epoch, or `None` if the recording has no epochs.
    fn first_epoch(&self) -> Option<usize>;

    /// Index of the epoch after `current`, or `None` at the end.
    fn next_epoch(&self, current: usize) -> Option<usize>;

    /// The clock interval an epoch index spans.
    fn epoch(&self, index: usize) -> Interval;

    /// Sampling frequency of `signal`, in Hz.
    fn sampling_freq(&self, signal: &str) -> Option<f64>;

    /// Samples per epoch for `signal`, given the recording's epoch length.
    fn n_samples_per_epoch(&self, signal: &str) -> Option<usize>;

    /// Read raw samples of `signal` over `interval`.
    fn read(&self, signal: &str, interval: Interval) -> Option<Vec<f64>>;

    /// Resample `signal` in place to `target_hz` (mutates future reads).
    fn resample(&mut self, signal: &str, target_hz: f64);

    /// Rescale `signal`'s values to `unit` (e.g. uV -> mV).
    fn rescale(&mut self, signal: &str, unit: &str);

    /// Whether `signal` exists in this recording.
    fn has_signal(&self, name: &str) -> bool;

    /// The canonical label of the `i`-th signal.
    fn signal_label(&self, i: usize) -> Option<String>;
}

/// In-memory [`EdfSource`] used by tests and small batch tools: fixed epoch
/// length, one flat sample vector per channel.
pub struct MemorySource {
    epoch_len_sec: f64,
    n_epochs: usize,
    channels: std::collections::HashMap<String, (f64, Vec<f64>)>,
}

impl MemorySource {
    #[must_use]
    pub fn new(epoch_len_sec: f64, n_epochs: usize) -> Self {
        Self {
            epoch_len_sec,
            n_epochs,
            channels: std::collections::HashMap::new(),
        }
    }

    pub fn add_channel(&mut self, name: impl Into<String>, hz: f64, samples: Vec<f64>) {
        self.channels.insert(name.into(), (hz, samples));
    }
}

impl EdfSource for MemorySource {
    fn first_epoch(&self) -> Option<usize> {
        if self.n_epochs == 0 {
            None
        } else {
            Some(0)
        }
    }

    fn next_epoch(&self, current: usize) -> Option<usize> {
        let n = current + 1;
        if n < self.n_epochs {
            Some(n)
        } else {
            None
        }
    }

    fn epoch(&self, index: usize) -> Interval {
        let start = index as f64 * self.epoch_len_sec;
        Interval::new(
            luna_core::tick::seconds_to_ticks(start),
            luna_core::tick::seconds_to_ticks(start + self.epoch_len_sec),
        )
    }

    fn sampling_freq(&self, signal: &str) -> Option<f64> {
        self.channels.get(signal).map(|(hz, _)| *hz)
    }

    fn n_samples_per_epoch(&self, signal: &str) -> Option<usize> {
        self.sampling_freq(signal)
            .map(|hz| (hz * self.epoch_len_sec).round() as usize)
    }

    fn read(&self, signal: &str, interval: Interval) -> Option<Vec<f64>> {
        let (hz, samples) = self.channels.get(signal)?;
        let start_s = luna_core::tick::ticks_to_seconds(interval.start);
        let stop_s = luna_core::tick::ticks_to_seconds(interval.stop);
        let from = (start_s * hz).round() as usize;
        let to = ((stop_s * hz).round() as usize).min(samples.len());
        if from >= to {
            return Some(Vec::new());
        }
        Some(samples[from..to].to_vec())
    }

    fn resample(&mut self, signal: &str, target_hz: f64) {
        if let Some((hz, samples)) = self.channels.get_mut(signal) {
            if (*hz - target_hz).abs() < f64::EPSILON {
                return;
            }
            let ratio = target_hz / *hz;
            let new_len = (samples.len() as f64 * ratio).round() as usize;
            let mut out = Vec::with_capacity(new_len);
            for i in 0..new_len {
                let src_pos = i as f64 / ratio;
                let lo = src_pos.floor() as usize;
                let hi = (lo + 1).min(samples.len().saturating_sub(1));
                let frac = src_pos - lo as f64;
                let lo_v = samples.get(lo).copied().unwrap_or(0.0);
                let hi_v = samples.get(hi).copied().unwrap_or(lo_v);
                out.push(lo_v + (hi_v - lo_v) * frac);
            }
            *samples = out;
            *hz = target_hz;
        }
    }

    fn rescale(&mut self, signal: &str, unit: &str) {
        let factor = match unit {
            "mV" => 0.001,
            "uV" => 1.0,
            _ => 1.0,
        };
        if let Some((_, samples)) = self.channels.get_mut(signal) {
            for s in samples.iter_mut() {
                *s *= factor;
            }
        }
    }

    fn has_signal(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    fn signal_label(&self, i: usize) -> Option<String> {
        let mut names: Vec<&String> = self.channels.keys().collect();
        names.sort();
        names.get(i).map(|s| (*s).clone())
    }
}
