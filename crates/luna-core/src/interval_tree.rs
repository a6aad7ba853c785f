//! A lazily-built, augmented static interval tree.
//!
//! Built once from a snapshot of `(Interval, index)` pairs; queries are
//! `O(log n + k)` amortised. The owning [`crate::annot::AnnotationClass`]
//! seals itself on first query: any mutation afterward is a
//! [`crate::error::LunaError::StateError`], matching the documented
//! "sealed" invariant.

use crate::tick::Interval;

struct Node {
    interval: Interval,
    idx: usize,
    max_stop: u64,
    left: Option<usize>,
    right: Option<usize>,
}

/// A static interval index over a fixed set of `(Interval, index)` entries.
pub struct IntervalTree {
    nodes: Vec<Node>,
    root: Option<usize>,
    len: usize,
}

impl IntervalTree {
    /// Build a tree over `entries` (typically `(instance.interval, i)` for
    /// `i` the instance's position in its owning class).
    #[must_use]
    pub fn build(mut entries: Vec<(Interval, usize)>) -> Self {
        entries.sort_by_key(|(iv, _)| (iv.start, iv.stop));
        let len = entries.len();
        let mut nodes = Vec::with_capacity(len);
        let root = Self::build_rec(&entries, &mut nodes);
        Self { nodes, root, len }
    }

    /// Number of entries the tree was built over. Callers use this to
    /// assert the "index size equals instance count" invariant.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn build_rec(slice: &[(Interval, usize)], nodes: &mut Vec<Node>) -> Option<usize> {
        if slice.is_empty() {
            return None;
        }
        let mid = slice.len() / 2;
        let (left_slice, rest) = slice.split_at(mid);
        let ((interval, idx), right_slice) = rest.split_first().expect("mid in range");

        // Reserve this node's slot before recursing so child indices are stable.
        let my_index = nodes.len();
        nodes.push(Node {
            interval: *interval,
            idx: *idx,
            max_stop: interval.stop,
            left: None,
            right: None,
        });

        let left = Self::build_rec(left_slice, nodes);
        let right = Self::build_rec(right_slice, nodes);

        let mut max_stop = nodes[my_index].interval.stop;
        if let Some(l) = left {
            max_stop = max_stop.max(nodes[l].max_stop);
        }
        if let Some(r) = right {
            max_stop = max_stop.max(nodes[r].max_stop);
        }
        nodes[my_index].left = left;
        nodes[my_index].right = right;
        nodes[my_index].max_stop = max_stop;
        Some(my_index)
    }

    /// Indices of every entry whose interval overlaps `window`
    /// (half-open semantics, via [`Interval::overlaps`]).
    #[must_use]
    pub fn query_overlaps(&self, window: Interval) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect(self.root, window, &mut out, false);
        out
    }

    /// Indices of every entry whose interval is fully spanned by `window`.
    #[must_use]
    pub fn query_contained(&self, window: Interval) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect(self.root, window, &mut out, true);
        out
    }

    fn collect(
        &self,
        node: Option<usize>,
        window: Interval,
        out: &mut Vec<usize>,
        contained_only: bool,
    ) {
        let Some(n) = node else { return };
        let node_ref = &self.nodes[n];

        // Nothing in this subtree can reach past max_stop; if window starts
        // at or after it, prune (half-open: window.start >= max_stop means
        // no interval ending at max_stop can overlap window).
        if window.start >= node_ref.max_stop {
            return;
        }

        if let Some(left) = node_ref.left {
            self.collect(Some(left), window, out, contained_only);
        }

        let matches = if contained_only {
            window.contains(&node_ref.interval)
        } else {
            node_ref.interval.overlaps(&window)
        };
        if matches {
            out.push(node_ref.idx);
        }

        // Entries sorted by start: once the node's own start is >= window's
        // stop, nothing to its right can overlap either.
        if node_ref.interval.start < window.stop {
            if let Some(right) = node_ref.right {
                self.collect(Some(right), window, out, contained_only);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(a: u64, b: u64) -> Interval {
        Interval::new(a, b)
    }

    #[test]
    fn overlap_query_matches_brute_force() {
        let entries = vec![
            (iv(0, 30), 0),
            (iv(30, 60), 1),
            (iv(10, 20), 2),
            (iv(100, 200), 3),
            (iv(5, 5), 4), // zero-duration point
        ];
        let tree = IntervalTree::build(entries.clone());
        assert_eq!(tree.len(), 5);

        for (start, stop) in [(0u64, 40u64), (20, 40), (0, 1000), (60, 60), (5, 6)] {
            let window = iv(start, stop);
            let mut expected: Vec<usize> = entries
                .iter()
                .filter(|(iv, _)| iv.overlaps(&window))
                .map(|(_, idx)| *idx)
                .collect();
            let mut got = tree.query_overlaps(window);
            expected.sort_unstable();
            got.sort_unstable();
            assert_eq!(got, expected, "window {start}..{stop}");
        }
    }

    #[test]
    fn half_open_window_excludes_instance_at_its_stop() {
        let entries = vec![(iv(0, 30), 0)];
        let tree = IntervalTree::build(entries);
        // extract([30, 40)) must NOT include [0,30)
        assert!(tree.query_overlaps(iv(30, 40)).is_empty());
    }

    #[test]
    fn contained_query() {
        let entries = vec![(iv(10, 20), 0), (iv(5, 25), 1)];
        let tree = IntervalTree::build(entries);
        let got = tree.query_contained(iv(0, 30));
        let mut got = got;
        got.sort_unstable();
        assert_eq!(got, vec![0, 1]);
        assert_eq!(tree.query_contained(iv(12, 18)), Vec::<usize>::new());
    }
}
