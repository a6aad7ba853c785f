//! Monotonic tick clock and half-open intervals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 64-bit tick, 10^9 ticks per second.
pub type Tick = u64;

/// Ticks per second of the tick clock.
pub const TICKS_PER_SECOND: Tick = 1_000_000_000;

/// Convert a floating-point seconds offset to ticks, truncating.
#[must_use]
pub fn seconds_to_ticks(seconds: f64) -> Tick {
    (seconds * TICKS_PER_SECOND as f64).round() as Tick
}

/// Convert ticks to floating-point seconds.
#[must_use]
pub fn ticks_to_seconds(ticks: Tick) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// A half-open interval `[start, stop)` in ticks.
///
/// `start == stop` is a legal zero-duration point, distinct from a
/// one-tick interval `[t, t+1)`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    /// Inclusive start tick.
    pub start: Tick,
    /// Exclusive stop tick.
    pub stop: Tick,
}

impl Interval {
    /// Construct an interval, asserting `start <= stop`.
    ///
    /// # Panics
    /// Panics if `start > stop` — callers that accept untrusted input should
    /// validate before constructing (see `luna-annot`'s parsers, which
    /// return `LunaError::ConstraintViolation` instead of panicking).
    #[must_use]
    pub fn new(start: Tick, stop: Tick) -> Self {
        assert!(start <= stop, "interval start must not exceed stop");
        Self { start, stop }
    }

    /// A zero-duration point interval `[t, t)`.
    #[must_use]
    pub fn point(t: Tick) -> Self {
        Self { start: t, stop: t }
    }

    /// Duration in ticks (`stop - start`).
    #[must_use]
    pub fn duration(&self) -> Tick {
        self.stop - self.start
    }

    /// `true` if this is a zero-duration point.
    #[must_use]
    pub fn is_point(&self) -> bool {
        self.start == self.stop
    }

    /// Half-open overlap test: `self` and `other` overlap iff
    /// `self.start < other.stop && self.stop > other.start`.
    ///
    /// A zero-duration interval `[t, t)` never overlaps anything, including
    /// another point at the same tick, by this half-open definition — it is
    /// kept as a distinguishable point rather than treated as occupying `t`.
    #[must_use]
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.stop && self.stop > other.start
    }

    /// `true` if `other` is fully contained within `self` (`self` spans `other`).
    #[must_use]
    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.stop <= self.stop
    }

    /// Midpoint tick, rounding down.
    #[must_use]
    pub fn midpoint(&self) -> Tick {
        self.start + (self.stop - self.start) / 2
    }

    /// Expand the interval by `left`/`right` ticks on each side (saturating at 0).
    #[must_use]
    pub fn window(&self, left: Tick, right: Tick) -> Self {
        Self {
            start: self.start.saturating_sub(left),
            stop: self.stop.saturating_add(right),
        }
    }

    /// Union of two overlapping or touching intervals.
    #[must_use]
    pub fn union(&self, other: &Interval) -> Self {
        Self {
            start: self.start.min(other.start),
            stop: self.stop.max(other.stop),
        }
    }

    /// Intersection of two overlapping intervals. Returns `None` if disjoint.
    #[must_use]
    pub fn intersect(&self, other: &Interval) -> Option<Self> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Self {
            start: self.start.max(other.start),
            stop: self.stop.min(other.stop),
        })
    }

    /// `true` if `self` and `other` touch or overlap (mergeable by `flatten`).
    #[must_use]
    pub fn touches(&self, other: &Interval) -> bool {
        self.start <= other.stop && other.start <= self.stop
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_open_boundary() {
        let a = Interval::new(0, 30 * TICKS_PER_SECOND);
        let window = Interval::new(30 * TICKS_PER_SECOND, 60 * TICKS_PER_SECOND);
        // a = [a, b); window starts exactly at b -> not included.
        assert!(!a.overlaps(&window));
    }

    #[test]
    fn zero_duration_is_a_point() {
        let p = Interval::point(10);
        assert!(p.is_point());
        assert_eq!(p.duration(), 0);
        assert!(!p.overlaps(&p));
    }

    #[test]
    fn touches_merges_adjacent() {
        let a = Interval::new(0, 10);
        let b = Interval::new(10, 20);
        assert!(a.touches(&b));
        assert!(!a.overlaps(&b));
        assert_eq!(a.union(&b), Interval::new(0, 20));
    }
}
