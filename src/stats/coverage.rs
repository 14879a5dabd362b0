use super::Stats;
use crate::alignment::Alignment;
use crate::annotation::AnnotationIndex;
use crate::classify::{Category, classify, tally_blocks};
use serde::Serialize;
use std::collections::BTreeMap;

/// Category counts. The standard categories are always present so the
/// output shape does not depend on the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ElementStats(BTreeMap<String, u64>);

impl ElementStats {
    pub const TOTAL: &'static str = "total";

    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    fn count(&mut self, category: &Category) {
        *self.0.entry(category.as_str().to_string()).or_default() += 1;
        *self.0.entry(Self::TOTAL.to_string()).or_default() += 1;
    }

    fn update(&mut self, other: &ElementStats) {
        for (key, &count) in &other.0 {
            *self.0.entry(key.clone()).or_default() += count;
        }
    }
}

impl Default for ElementStats {
    fn default() -> Self {
        let keys = [
            Category::Exon,
            Category::Intron,
            Category::ExonicIntronic,
            Category::Intergenic,
            Category::Other,
        ];
        let mut counts: BTreeMap<String, u64> =
            keys.iter().map(|c| (c.as_str().to_string(), 0)).collect();
        counts.insert(Self::TOTAL.to_string(), 0);
        Self(counts)
    }
}

/// Per-category read counts for continuous and split alignments.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageStats {
    pub total: ElementStats,
    pub continuous: ElementStats,
    pub split: ElementStats,
    #[serde(skip)]
    uniq: bool,
}

impl CoverageStats {
    /// Only count records with `NH == 1`.
    pub fn unique_only() -> Self {
        Self {
            uniq: true,
            ..Self::default()
        }
    }

    pub fn is_unique_only(&self) -> bool {
        self.uniq
    }
}

impl Stats for CoverageStats {
    fn collect(&mut self, record: &Alignment, index: Option<&AnnotationIndex>) {
        let Some(index) = index else {
            return;
        };
        if !record.is_primary() || record.is_unmapped() || (self.uniq && !record.is_unique()) {
            return;
        }
        let Some(chrom) = record.reference() else {
            return;
        };
        let tally = tally_blocks(index, chrom, &record.blocks());
        let Some(category) = classify(&tally) else {
            return;
        };
        if record.is_split() {
            self.split.count(&category);
        } else {
            self.continuous.count(&category);
        }
    }

    fn update(&mut self, other: &CoverageStats) {
        self.continuous.update(&other.continuous);
        self.split.update(&other.split);
    }

    fn finalize(&mut self) {
        let mut total = self.continuous.clone();
        total.update(&self.split);
        self.total = total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{ChromosomeLengths, Feature, IndexOptions};
    use noodles::sam::alignment::record::Flags;
    use noodles::sam::alignment::record::cigar::Op;
    use noodles::sam::alignment::record::cigar::op::Kind;

    fn index() -> AnnotationIndex {
        let features = vec![
            Feature::new("chr1", "gene", 1000, 5000),
            Feature::new("chr1", "exon", 1000, 1200),
            Feature::new("chr1", "exon", 3000, 3300),
            Feature::new("chr1", "exon", 4800, 5000),
        ];
        let lengths: ChromosomeLengths = [("chr1".to_string(), 10_000)].into_iter().collect();
        AnnotationIndex::build(features.into_iter().map(Ok), &lengths, &IndexOptions::default()).unwrap()
    }

    fn read(start: u64, cigar: &[(Kind, usize)]) -> Alignment {
        Alignment::new("chr1", start, cigar.iter().map(|&(k, l)| Op::new(k, l)).collect()).with_hit_count(1)
    }

    fn records() -> Vec<Alignment> {
        vec![
            read(1050, &[(Kind::Match, 100)]),
            read(1150, &[(Kind::Match, 100)]),
            read(2000, &[(Kind::Match, 100)]),
            read(7000, &[(Kind::Match, 100)]),
            read(4950, &[(Kind::Match, 100)]),
            read(1150, &[(Kind::Match, 50), (Kind::Skip, 1800), (Kind::Match, 50)]),
            read(9990, &[(Kind::Match, 5)]).with_hit_count(3),
            read(1050, &[(Kind::Match, 100)]).with_flags(Flags::SECONDARY),
            Alignment::new("chrUn", 10, vec![Op::new(Kind::Match, 10)]),
        ]
    }

    fn collect(stats: &mut CoverageStats, index: &AnnotationIndex) {
        for r in records() {
            stats.collect(&r, Some(index));
        }
        stats.finalize();
    }

    #[test]
    fn test_categories() {
        let index = index();
        let mut stats = CoverageStats::default();
        collect(&mut stats, &index);

        assert_eq!(stats.continuous.get("exon"), 1);
        assert_eq!(stats.continuous.get("exonic_intronic"), 1);
        assert_eq!(stats.continuous.get("intron"), 1);
        assert_eq!(stats.continuous.get("intergenic"), 2);
        assert_eq!(stats.continuous.get("other"), 1);
        assert_eq!(stats.split.get("exon"), 1);
        assert_eq!(stats.total.get("total"), 7);
        assert_eq!(stats.total.get("intergenic"), 2);
    }

    #[test]
    fn test_unique_only() {
        let index = index();
        let mut stats = CoverageStats::unique_only();
        collect(&mut stats, &index);
        assert_eq!(stats.total.get("total"), 6);
        assert_eq!(stats.total.get("intergenic"), 1);
    }

    #[test]
    fn test_without_index_nothing_is_counted() {
        let mut stats = CoverageStats::default();
        for r in records() {
            stats.collect(&r, None);
        }
        stats.finalize();
        assert_eq!(stats, CoverageStats::default());
    }

    #[test]
    fn test_update_matches_single_pass() {
        let index = index();
        let all = records();
        let mut whole = CoverageStats::default();
        collect(&mut whole, &index);

        let mut left = CoverageStats::default();
        let mut right = CoverageStats::default();
        for (i, r) in all.iter().enumerate() {
            let target = if i % 2 == 0 { &mut left } else { &mut right };
            target.collect(r, Some(&index));
        }
        let mut a = left.clone();
        a.update(&right);
        a.finalize();
        let mut b = right;
        b.update(&left);
        b.finalize();
        assert_eq!(a, whole);
        assert_eq!(b, whole);
    }
}
