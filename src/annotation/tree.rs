//! Implicit augmented interval tree over a sorted array.
//!
//! Features are sorted by start and laid out as an in-order binary tree:
//! leaves sit at even indices and a node at level `k` has its `k` lowest bits
//! set to one. Each node also records the largest end coordinate in its
//! subtree, which lets an overlap query prune whole subtrees. Building is
//! `O(n log n)` and a query costs `O(log n + hits)`.

use super::feature::Feature;

/// Subtrees at or below this level are scanned linearly.
const SCAN_LEVEL: u32 = 3;

#[derive(Debug, Clone)]
struct Node {
    feature: Feature,
    max: u64,
}

#[derive(Debug, Clone, Default)]
pub struct IntervalTree {
    nodes: Vec<Node>,
    max_level: u32,
}

impl IntervalTree {
    pub fn build(mut features: Vec<Feature>) -> Self {
        features.sort_by_key(|f| (f.start(), f.end()));
        let mut nodes: Vec<Node> = features
            .into_iter()
            .map(|feature| Node {
                max: feature.end(),
                feature,
            })
            .collect();
        let max_level = augment(&mut nodes);
        Self { nodes, max_level }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Features in start order.
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.nodes.iter().map(|n| &n.feature)
    }

    /// Call `visit` for every feature overlapping `[start, end)`. Visiting
    /// order is unspecified.
    pub fn for_each_overlap<'a, F>(&'a self, start: u64, end: u64, mut visit: F)
    where
        F: FnMut(&'a Feature),
    {
        self.overlap_indices(start, end, |i| visit(&self.nodes[i].feature));
    }

    /// All features overlapping `[start, end)`, in start order.
    pub fn range_query(&self, start: u64, end: u64) -> Vec<&Feature> {
        self.query_with(start, end, |_| true)
    }

    /// Overlapping features carrying the given label.
    pub fn range_query_by_element(&self, start: u64, end: u64, element: &str) -> Vec<&Feature> {
        self.query_with(start, end, |f| f.element() == element)
    }

    /// Overlapping features accepted by `keep`, in start order.
    pub fn query_with<P>(&self, start: u64, end: u64, keep: P) -> Vec<&Feature>
    where
        P: Fn(&Feature) -> bool,
    {
        let mut hits = Vec::new();
        self.overlap_indices(start, end, |i| {
            if keep(&self.nodes[i].feature) {
                hits.push(i);
            }
        });
        hits.sort_unstable();
        hits.into_iter().map(|i| &self.nodes[i].feature).collect()
    }

    fn overlap_indices<F>(&self, start: u64, end: u64, mut hit: F)
    where
        F: FnMut(usize),
    {
        let n = self.nodes.len();
        if n == 0 || start >= end {
            return;
        }
        let a = &self.nodes;

        // (node, level, left subtree done)
        let mut stack: Vec<(usize, u32, bool)> = Vec::with_capacity(64);
        stack.push(((1usize << self.max_level) - 1, self.max_level, false));

        while let Some((x, k, left_done)) = stack.pop() {
            if k <= SCAN_LEVEL {
                let i0 = x >> k << k;
                let i1 = (i0 + (1usize << (k + 1)) - 1).min(n);
                for i in i0..i1 {
                    if a[i].feature.start() >= end {
                        break;
                    }
                    if start < a[i].feature.end() {
                        hit(i);
                    }
                }
            } else if !left_done {
                stack.push((x, k, true));
                let y = x - (1usize << (k - 1));
                // y may lie past the end; its subtree can still hold real nodes
                if y >= n || a[y].max > start {
                    stack.push((y, k - 1, false));
                }
            } else if x < n && a[x].feature.start() < end {
                if start < a[x].feature.end() {
                    hit(x);
                }
                stack.push((x + (1usize << (k - 1)), k - 1, false));
            }
        }
    }
}

/// Fill in subtree maxima bottom-up and return the root level.
fn augment(a: &mut [Node]) -> u32 {
    let n = a.len();
    if n == 0 {
        return 0;
    }

    let mut last_i = 0usize;
    let mut last = 0u64;
    for i in (0..n).step_by(2) {
        last_i = i;
        a[i].max = a[i].feature.end();
        last = a[i].max;
    }

    let mut k = 1u32;
    while (1usize << k) <= n {
        let x = 1usize << (k - 1);
        let i0 = (x << 1) - 1;
        let step = x << 2;
        for i in (i0..n).step_by(step) {
            let left = a[i - x].max;
            let right = if i + x < n { a[i + x].max } else { last };
            a[i].max = a[i].feature.end().max(left).max(right);
        }
        last_i = if (last_i >> k) & 1 == 1 { last_i - x } else { last_i + x };
        if last_i < n && a[last_i].max > last {
            last = a[last_i].max;
        }
        k += 1;
    }
    k - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute(features: &[Feature], start: u64, end: u64) -> Vec<(u64, u64)> {
        let mut hits: Vec<(u64, u64)> = features
            .iter()
            .filter(|f| f.overlap_len(start, end) > 0)
            .map(|f| (f.start(), f.end()))
            .collect();
        hits.sort();
        hits
    }

    fn spans(hits: &[&Feature]) -> Vec<(u64, u64)> {
        hits.iter().map(|f| (f.start(), f.end())).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = IntervalTree::build(Vec::new());
        assert!(tree.is_empty());
        assert!(tree.range_query(0, 100).is_empty());
    }

    #[test]
    fn test_half_open_boundaries() {
        let tree = IntervalTree::build(vec![
            Feature::new("chr1", "exon", 100, 200),
            Feature::new("chr1", "intron", 200, 300),
        ]);
        assert_eq!(spans(&tree.range_query(199, 200)), vec![(100, 200)]);
        assert_eq!(spans(&tree.range_query(200, 201)), vec![(200, 300)]);
        assert!(tree.range_query(300, 400).is_empty());
        assert!(tree.range_query(150, 150).is_empty());
    }

    #[test]
    fn test_matches_linear_scan() {
        // deterministic pseudo-random layout with nested and long intervals
        let mut features = Vec::new();
        let mut seed = 17u64;
        for _ in 0..531 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let start = (seed >> 33) % 100_000;
            let width = 1 + (seed >> 13) % if seed % 7 == 0 { 20_000 } else { 300 };
            features.push(Feature::new("chr1", "exon", start, start + width));
        }
        let tree = IntervalTree::build(features.clone());
        assert_eq!(tree.len(), features.len());

        for (start, end) in [(0, 1), (5_000, 5_100), (42_000, 60_000), (99_990, 200_000), (0, 200_000)] {
            assert_eq!(spans(&tree.range_query(start, end)), brute(&features, start, end));
        }
    }

    #[test]
    fn test_query_by_element() {
        let tree = IntervalTree::build(vec![
            Feature::new("chr1", "gene", 0, 1000),
            Feature::new("chr1", "exon", 10, 20),
            Feature::new("chr1", "exon", 50, 80),
            Feature::new("chr1", "intron", 20, 50),
        ]);
        let exons = tree.range_query_by_element(15, 60, "exon");
        assert_eq!(spans(&exons), vec![(10, 20), (50, 80)]);
        let long = tree.query_with(0, 1000, |f| f.len() > 100);
        assert_eq!(spans(&long), vec![(0, 1000)]);
    }
}
