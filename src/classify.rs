//! Assigning an alignment to a coverage category from the annotation
//! features its blocks overlap.

use crate::alignment::Block;
use crate::annotation::{AnnotationIndex, Feature, labels};
use std::collections::BTreeMap;
use std::fmt;

/// Per-label count of features overlapping an alignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally<'a> {
    counts: BTreeMap<&'a str, u32>,
}

impl<'a> Tally<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `feature` if it overlaps `block` by at least one base. Gene
    /// features only describe spans and are never counted.
    pub fn add(&mut self, feature: &'a Feature, block: &Block) {
        if feature.element() == labels::GENE || feature.overlap_len(block.start, block.end) == 0 {
            return;
        }
        *self.counts.entry(feature.element()).or_default() += 1;
    }

    pub fn get(&self, label: &str) -> u32 {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Labels present, in sorted order.
    pub fn labels(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.counts.keys().copied()
    }
}

/// Tally every feature of `chrom` overlapping any of `blocks`.
pub fn tally_blocks<'a>(index: &'a AnnotationIndex, chrom: &str, blocks: &[Block]) -> Tally<'a> {
    let mut tally = Tally::new();
    let Some(chromosome) = index.get(chrom) else {
        return tally;
    };
    for block in blocks {
        chromosome
            .tree()
            .for_each_overlap(block.start, block.end, |feature| tally.add(feature, block));
    }
    tally
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Exon,
    Intron,
    ExonicIntronic,
    Intergenic,
    /// Intergenic together with anything else.
    Other,
    /// Any other mix, named by its sorted labels joined with `_`.
    Composite(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Exon => labels::EXON,
            Category::Intron => labels::INTRON,
            Category::ExonicIntronic => "exonic_intronic",
            Category::Intergenic => labels::INTERGENIC,
            Category::Other => "other",
            Category::Composite(name) => name,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category for a tally, or `None` when nothing overlapped.
pub fn classify(tally: &Tally<'_>) -> Option<Category> {
    if tally.is_empty() {
        return None;
    }
    let exon = tally.get(labels::EXON) > 0;
    let intron = tally.get(labels::INTRON) > 0;
    let distinct = tally.counts.len();

    let category = if tally.get(labels::INTERGENIC) > 0 {
        if distinct == 1 {
            Category::Intergenic
        } else {
            Category::Other
        }
    } else if exon && distinct == 1 {
        Category::Exon
    } else if intron && distinct == 1 {
        Category::Intron
    } else if exon && intron && distinct == 2 {
        Category::ExonicIntronic
    } else {
        Category::Composite(tally.labels().collect::<Vec<_>>().join("_"))
    };
    Some(category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{ChromosomeLengths, FeatureReader, IndexOptions};

    fn tally_of(features: &[Feature], block: Block) -> Tally<'_> {
        let mut tally = Tally::new();
        for f in features {
            tally.add(f, &block);
        }
        tally
    }

    fn category(features: &[Feature], start: u64, end: u64) -> Option<String> {
        classify(&tally_of(features, Block { start, end })).map(|c| c.to_string())
    }

    #[test]
    fn test_single_labels() {
        let exon = [Feature::new("chr1", "exon", 100, 200)];
        assert_eq!(category(&exon, 120, 180).as_deref(), Some("exon"));
        let intron = [Feature::new("chr1", "intron", 100, 200)];
        assert_eq!(category(&intron, 120, 180).as_deref(), Some("intron"));
        let intergenic = [Feature::new("chr1", "intergenic", 100, 200)];
        assert_eq!(category(&intergenic, 120, 180).as_deref(), Some("intergenic"));
    }

    #[test]
    fn test_mixed_labels() {
        let features = [
            Feature::new("chr1", "gene", 0, 300),
            Feature::new("chr1", "exon", 100, 200),
            Feature::new("chr1", "intron", 200, 250),
            Feature::new("chr1", "intergenic", 250, 400),
            Feature::new("chr1", "utr", 150, 200),
        ];
        assert_eq!(category(&features[..3], 150, 220).as_deref(), Some("exonic_intronic"));
        assert_eq!(category(&features[..4], 240, 260).as_deref(), Some("other"));
        assert_eq!(category(&features, 160, 170).as_deref(), Some("exon_utr"));
        assert_eq!(category(&features, 190, 210).as_deref(), Some("exon_intron_utr"));
    }

    #[test]
    fn test_empty_and_gene_only_tally() {
        let features = [Feature::new("chr1", "gene", 0, 300)];
        assert_eq!(category(&features, 10, 20), None);
        // touching, not overlapping
        let exon = [Feature::new("chr1", "exon", 100, 200)];
        assert_eq!(category(&exon, 200, 250), None);
    }

    #[test]
    fn test_tally_blocks_over_index() {
        let features = vec![
            Feature::new("chr1", "gene", 100, 1000),
            Feature::new("chr1", "exon", 100, 200),
            Feature::new("chr1", "exon", 800, 1000),
        ];
        let lengths: ChromosomeLengths = [("chr1".to_string(), 2000)].into_iter().collect();
        let index =
            AnnotationIndex::build(features.into_iter().map(Ok), &lengths, &IndexOptions::default()).unwrap();

        let spliced = [Block { start: 150, end: 200 }, Block { start: 800, end: 850 }];
        let tally = tally_blocks(&index, "chr1", &spliced);
        assert_eq!(tally.get("exon"), 2);
        assert_eq!(classify(&tally), Some(Category::Exon));

        let across = [Block { start: 190, end: 260 }];
        assert_eq!(classify(&tally_blocks(&index, "chr1", &across)), Some(Category::ExonicIntronic));

        let outside = [Block { start: 1500, end: 1600 }];
        assert_eq!(classify(&tally_blocks(&index, "chr1", &outside)), Some(Category::Intergenic));

        assert!(tally_blocks(&index, "chr2", &outside).is_empty());
    }

    #[test]
    fn test_exon_only_annotation_reads_are_exonic() {
        let reader = FeatureReader::new(&b"chr1\t100\t200\texon\nchr1\t400\t500\texon\n"[..], ChromosomeLengths::new()).unwrap();
        let lengths: ChromosomeLengths = [("chr1".to_string(), 10_000)].into_iter().collect();
        let index = AnnotationIndex::build(reader, &lengths, &IndexOptions::default()).unwrap();

        let inside = [Block { start: 120, end: 180 }];
        assert_eq!(classify(&tally_blocks(&index, "chr1", &inside)), Some(Category::Exon));
        let between = [Block { start: 250, end: 300 }];
        assert_eq!(classify(&tally_blocks(&index, "chr1", &between)), None);
    }
}
