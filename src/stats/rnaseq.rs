use super::{Stats, ratio, serialize_fraction};
use crate::alignment::Alignment;
use crate::annotation::{AnnotationIndex, Feature, labels};
use serde::Serialize;
use std::collections::BTreeSet;

/// Intergenic hits closer than this to either end of the region are ignored.
const INTERGENIC_OFFSET: u64 = 500;
const GENE_TYPE: &str = "gene_type";
const RRNA_TYPES: [&str; 2] = ["rRNA", "Mt_rRNA"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RnaSeqMetrics {
    #[serde(rename = "fraction_mapped", serialize_with = "serialize_fraction")]
    pub mapped: f64,
    #[serde(rename = "fraction_intergenic", serialize_with = "serialize_fraction")]
    pub intergenic: f64,
    #[serde(rename = "fraction_rrna", serialize_with = "serialize_fraction")]
    pub rrna: f64,
    #[serde(rename = "fraction_duplicates", serialize_with = "serialize_fraction")]
    pub duplicates: f64,
}

/// Quality metrics for RNA-seq libraries: reads landing in intergenic
/// space or in ribosomal RNA genes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RnaSeqStats {
    pub intergenic: u64,
    #[serde(rename = "rRNA")]
    pub rrna: u64,
    pub metrics: RnaSeqMetrics,
    #[serde(skip)]
    total: u64,
    #[serde(skip)]
    mapped: u64,
    #[serde(skip)]
    duplicates: u64,
}

fn keep_hit(feature: &Feature, start: u64, end: u64) -> bool {
    if feature.element() != labels::INTERGENIC {
        return true;
    }
    if feature.len() < 2 * INTERGENIC_OFFSET {
        return false;
    }
    let near_start = end <= feature.start() + INTERGENIC_OFFSET;
    let near_end = start > feature.end().saturating_sub(INTERGENIC_OFFSET);
    !(near_start || near_end)
}

/// Genes contribute their `gene_type`, everything else its label.
fn element_of(feature: &Feature) -> Option<&str> {
    if feature.element() == labels::GENE {
        feature.tag(GENE_TYPE)
    } else {
        Some(feature.element())
    }
}

impl Stats for RnaSeqStats {
    fn collect(&mut self, record: &Alignment, index: Option<&AnnotationIndex>) {
        let Some(index) = index else {
            return;
        };
        if !record.is_primary() {
            return;
        }
        self.total += 1;
        if record.is_unmapped() {
            return;
        }
        self.mapped += 1;
        if record.is_duplicate() {
            self.duplicates += 1;
        }

        let Some(chromosome) = record.reference().and_then(|chrom| index.get(chrom)) else {
            return;
        };
        let span = record.span();
        let mut elements = BTreeSet::new();
        chromosome.tree().for_each_overlap(span.start, span.end, |feature| {
            if keep_hit(feature, span.start, span.end) {
                elements.extend(element_of(feature));
            }
        });

        if RRNA_TYPES.iter().any(|t| elements.contains(t)) {
            self.rrna += 1;
        }
        if elements.contains(labels::INTERGENIC) {
            self.intergenic += 1;
        }
    }

    fn update(&mut self, other: &RnaSeqStats) {
        self.intergenic += other.intergenic;
        self.rrna += other.rrna;
        self.total += other.total;
        self.mapped += other.mapped;
        self.duplicates += other.duplicates;
    }

    fn finalize(&mut self) {
        self.metrics = RnaSeqMetrics {
            mapped: ratio(self.mapped, self.total),
            intergenic: ratio(self.intergenic, self.mapped),
            rrna: ratio(self.rrna, self.mapped),
            duplicates: ratio(self.duplicates, self.mapped),
        };
    }
}
