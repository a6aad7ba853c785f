//! Interval-set algebra: union, intersection, difference, flatten,
//! complement, windowing, reduction, epoch splitting, and pooling.
//!
//! Every operation here works on plain `Vec<Interval>` rather than on
//! [`luna_core::AnnotationClass`] directly, so callers flatten a class's
//! instances into a set, combine sets, and re-materialize instances from
//! the result as needed.

use luna_core::tick::{Interval, Tick};

/// Merge touching/overlapping intervals within `set`. Idempotent:
/// `flatten(flatten(s)) == flatten(s)`.
#[must_use]
pub fn flatten(set: &[Interval]) -> Vec<Interval> {
    if set.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<Interval> = set.to_vec();
    sorted.sort_by_key(|iv| (iv.start, iv.stop));

    let mut out: Vec<Interval> = Vec::with_capacity(sorted.len());
    let mut cur = sorted[0];
    for iv in &sorted[1..] {
        if cur.touches(iv) {
            cur = cur.union(iv);
        } else {
            out.push(cur);
            cur = *iv;
        }
    }
    out.push(cur);
    out
}

/// Union of two already-flattened sets: pairwise union of overlapping
/// members plus the non-overlapping members of each.
#[must_use]
pub fn union(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut all = Vec::with_capacity(a.len() + b.len());
    all.extend_from_slice(a);
    all.extend_from_slice(b);
    flatten(&all)
}

/// Pairwise intersection of overlapping pairs between two flattened sets.
#[must_use]
pub fn intersect(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    for x in a {
        for y in b {
            if let Some(iv) = x.intersect(y) {
                out.push(iv);
            }
        }
    }
    flatten(&out)
}

/// Members of `a` that overlap at least one member of flattened `b`.
#[must_use]
pub fn keep_if_overlaps(a: &[Interval], b_flat: &[Interval]) -> Vec<Interval> {
    a.iter()
        .filter(|x| b_flat.iter().any(|y| x.overlaps(y)))
        .copied()
        .collect()
}

/// Members of `a` that overlap no member of flattened `b`.
///
/// Guaranteed not to return any interval overlapping a member of `b_flat`.
#[must_use]
pub fn drop_if_overlaps(a: &[Interval], b_flat: &[Interval]) -> Vec<Interval> {
    a.iter()
        .filter(|x| !b_flat.iter().any(|y| x.overlaps(y)))
        .copied()
        .collect()
}

/// Complement of a flattened set within `[0, rec_end)`.
#[must_use]
pub fn complement(set: &[Interval], rec_end: Tick) -> Vec<Interval> {
    let flat = flatten(set);
    let mut out = Vec::new();
    let mut cursor = 0u64;
    for iv in &flat {
        if iv.start > cursor {
            out.push(Interval::new(cursor, iv.start));
        }
        cursor = cursor.max(iv.stop);
    }
    if cursor < rec_end {
        out.push(Interval::new(cursor, rec_end));
    }
    out
}

/// Expand each member by `left`/`right` ticks.
#[must_use]
pub fn window(set: &[Interval], left: Tick, right: Tick) -> Vec<Interval> {
    set.iter().map(|iv| iv.window(left, right)).collect()
}

/// How [`reduce`] degenerates each interval to a zero-duration point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceMode {
    Midpoint,
    Start,
    Stop,
}

/// Replace each interval with its zero-duration degenerate point.
#[must_use]
pub fn reduce(set: &[Interval], mode: ReduceMode) -> Vec<Interval> {
    set.iter()
        .map(|iv| {
            let t = match mode {
                ReduceMode::Midpoint => iv.midpoint(),
                ReduceMode::Start => iv.start,
                ReduceMode::Stop => iv.stop,
            };
            Interval::point(t)
        })
        .collect()
}

/// Intersect each member of `set` with each of `epochs`, dropping empty
/// results. `epochs` need not be sorted or non-overlapping.
#[must_use]
pub fn split_by_epoch(set: &[Interval], epochs: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    for s in set {
        for e in epochs {
            if let Some(iv) = s.intersect(e) {
                out.push(iv);
            }
        }
    }
    out
}

/// Union across many classes' flattened sets.
#[must_use]
pub fn pool(classes: &[Vec<Interval>]) -> Vec<Interval> {
    let mut all = Vec::new();
    for c in classes {
        all.extend_from_slice(c);
    }
    flatten(&all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn iv(a: u64, b: u64) -> Interval {
        Interval::new(a, b)
    }

    #[test]
    fn flatten_is_idempotent() {
        let s = vec![iv(0, 10), iv(5, 15), iv(20, 30)];
        let once = flatten(&s);
        let twice = flatten(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn difference_never_overlaps_b() {
        let a = vec![iv(0, 10), iv(5, 20), iv(30, 40)];
        let b = vec![iv(8, 12)];
        let b_flat = flatten(&b);
        let result = drop_if_overlaps(&a, &b_flat);
        for r in &result {
            assert!(!b_flat.iter().any(|y| r.overlaps(y)));
        }
    }

    #[test]
    fn complement_covers_gaps() {
        let s = vec![iv(10, 20), iv(30, 40)];
        let c = complement(&s, 50);
        assert_eq!(c, vec![iv(0, 10), iv(20, 30), iv(40, 50)]);
    }

    proptest! {
        #[test]
        fn flatten_idempotent_prop(starts in proptest::collection::vec(0u64..1000, 0..30)) {
            let set: Vec<Interval> = starts.iter().map(|&s| iv(s, s + 5)).collect();
            let once = flatten(&set);
            let twice = flatten(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn difference_excludes_b_prop(
            a_starts in proptest::collection::vec(0u64..200, 1..10),
            b_starts in proptest::collection::vec(0u64..200, 1..10),
        ) {
            let a: Vec<Interval> = a_starts.iter().map(|&s| iv(s, s + 10)).collect();
            let b: Vec<Interval> = b_starts.iter().map(|&s| iv(s, s + 10)).collect();
            let b_flat = flatten(&b);
            let result = drop_if_overlaps(&a, &b_flat);
            for r in &result {
                prop_assert!(!b_flat.iter().any(|y| r.overlaps(y)));
            }
        }
    }
}
