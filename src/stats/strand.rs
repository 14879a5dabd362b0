use super::{Stats, ratio};
use crate::alignment::Alignment;
use crate::annotation::{AnnotationIndex, Strand, labels};
use serde::Serialize;

pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MIN_MAPQ: u8 = 30;

/// Single-end counts, keyed by read strand then feature strand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SingleStrand {
    #[serde(rename = "++")]
    pub plus_plus: u64,
    #[serde(rename = "+-")]
    pub plus_minus: u64,
    #[serde(rename = "--")]
    pub minus_minus: u64,
    #[serde(rename = "-+")]
    pub minus_plus: u64,
}

impl SingleStrand {
    fn update(&mut self, other: &SingleStrand) {
        self.plus_plus += other.plus_plus;
        self.plus_minus += other.plus_minus;
        self.minus_minus += other.minus_minus;
        self.minus_plus += other.minus_plus;
    }
}

/// Paired-end counts, keyed by mate, read strand and feature strand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairedStrand {
    pub first: SingleStrand,
    pub second: SingleStrand,
}

impl PairedStrand {
    fn update(&mut self, other: &PairedStrand) {
        self.first.update(&other.first);
        self.second.update(&other.second);
    }
}

/// Flattens mate-prefixed keys into the output (`"1++"`, `"2-+"`, ...).
mod paired_serde {
    use super::{PairedStrand, SingleStrand};
    use serde::ser::{SerializeMap, Serializer};

    pub fn serialize<S: Serializer>(pairs: &Option<PairedStrand>, serializer: S) -> Result<S::Ok, S::Error> {
        let Some(pairs) = pairs else {
            return serializer.serialize_none();
        };
        let mut map = serializer.serialize_map(Some(8))?;
        for (mate, counts) in [("1", &pairs.first), ("2", &pairs.second)] {
            let SingleStrand {
                plus_plus,
                plus_minus,
                minus_minus,
                minus_plus,
            } = counts;
            map.serialize_entry(&format!("{mate}++"), plus_plus)?;
            map.serialize_entry(&format!("{mate}+-"), plus_minus)?;
            map.serialize_entry(&format!("{mate}--"), minus_minus)?;
            map.serialize_entry(&format!("{mate}-+"), minus_plus)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadType {
    SingleEnd,
    PairedEnd,
    Mixed,
}

/// Library strandedness inferred from reads overlapping stranded features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrandStats {
    pub total: u64,
    /// Reads overlapping features on both strands.
    pub failed: u64,
    pub strandness: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reads: Option<SingleStrand>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "paired_serde::serialize")]
    pub pairs: Option<PairedStrand>,
    #[serde(skip)]
    threshold: f64,
    #[serde(skip)]
    min_mapq: u8,
}

impl Default for StrandStats {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_MIN_MAPQ)
    }
}

impl StrandStats {
    pub fn new(threshold: f64, min_mapq: u8) -> Self {
        Self {
            total: 0,
            failed: 0,
            strandness: "NONE",
            reads: None,
            pairs: None,
            threshold,
            min_mapq,
        }
    }

    fn read_type(&self) -> Option<ReadType> {
        match (&self.reads, &self.pairs) {
            (None, None) => None,
            (Some(_), None) => Some(ReadType::SingleEnd),
            (None, Some(_)) => Some(ReadType::PairedEnd),
            (Some(_), Some(_)) => Some(ReadType::Mixed),
        }
    }

    /// Fraction explained by the sense (or mate 1 sense) protocol.
    pub fn sense_fraction(&self) -> f64 {
        let explained = match (&self.reads, &self.pairs) {
            (Some(r), _) => r.plus_plus + r.minus_minus,
            (None, Some(p)) => {
                p.first.plus_plus + p.first.minus_minus + p.second.plus_minus + p.second.minus_plus
            }
            (None, None) => 0,
        };
        ratio(explained, self.total)
    }

    /// Fraction explained by the antisense (or mate 2 sense) protocol.
    pub fn antisense_fraction(&self) -> f64 {
        let explained = match (&self.reads, &self.pairs) {
            (Some(r), _) => r.plus_minus + r.minus_plus,
            (None, Some(p)) => {
                p.first.plus_minus + p.first.minus_plus + p.second.plus_plus + p.second.minus_minus
            }
            (None, None) => 0,
        };
        ratio(explained, self.total)
    }

    fn counts_for(&mut self, record: &Alignment) -> &mut SingleStrand {
        if record.is_paired() {
            let pairs = self.pairs.get_or_insert_with(PairedStrand::default);
            if record.is_second() && !record.is_first() {
                &mut pairs.second
            } else {
                &mut pairs.first
            }
        } else {
            self.reads.get_or_insert_with(SingleStrand::default)
        }
    }

    fn count_sense(&mut self, record: &Alignment) {
        let reverse = record.is_reverse();
        let counts = self.counts_for(record);
        if reverse {
            counts.minus_minus += 1;
        } else {
            counts.plus_plus += 1;
        }
    }

    fn count_antisense(&mut self, record: &Alignment) {
        let reverse = record.is_reverse();
        let counts = self.counts_for(record);
        if reverse {
            counts.minus_plus += 1;
        } else {
            counts.plus_minus += 1;
        }
    }

    fn is_usable(&self, record: &Alignment) -> bool {
        let multimapped = record.hit_count.is_some_and(|nh| nh > 1);
        // a missing mapping quality means 255, i.e. unavailable
        let mapq = record.mapq.unwrap_or(u8::MAX);
        record.is_primary()
            && !record.is_unmapped()
            && !record.is_duplicate()
            && !record.is_qc_fail()
            && !multimapped
            && mapq >= self.min_mapq
    }
}

impl Stats for StrandStats {
    fn collect(&mut self, record: &Alignment, index: Option<&AnnotationIndex>) {
        let Some(index) = index else {
            return;
        };
        if !self.is_usable(record) {
            return;
        }
        let Some(chromosome) = record.reference().and_then(|chrom| index.get(chrom)) else {
            return;
        };

        let read_strand = if record.is_reverse() {
            Strand::Reverse
        } else {
            Strand::Forward
        };
        let (mut sense, mut antisense) = (0u32, 0u32);
        for block in record.blocks() {
            chromosome.tree().for_each_overlap(block.start, block.end, |feature| {
                if feature.element() == labels::GENE || !feature.strand().is_known() {
                    return;
                }
                if feature.strand() == read_strand {
                    sense += 1;
                } else {
                    antisense += 1;
                }
            });
        }

        if sense == 0 && antisense == 0 {
            return;
        }
        if sense > 0 && antisense > 0 {
            self.failed += 1;
        }
        self.total += 1;
        if antisense == 0 {
            self.count_sense(record);
        }
        if sense == 0 {
            self.count_antisense(record);
        }
    }

    fn update(&mut self, other: &StrandStats) {
        self.total += other.total;
        self.failed += other.failed;
        if let Some(reads) = &other.reads {
            self.reads.get_or_insert_with(SingleStrand::default).update(reads);
        }
        if let Some(pairs) = &other.pairs {
            self.pairs.get_or_insert_with(PairedStrand::default).update(pairs);
        }
    }

    fn finalize(&mut self) {
        self.strandness = "NONE";
        let (sense, antisense) = match self.read_type() {
            Some(ReadType::SingleEnd) => ("SENSE", "ANTISENSE"),
            Some(ReadType::PairedEnd) => ("MATE1_SENSE", "MATE2_SENSE"),
            Some(ReadType::Mixed) | None => return,
        };
        if self.sense_fraction() > self.threshold {
            self.strandness = sense;
        } else if self.antisense_fraction() > self.threshold {
            self.strandness = antisense;
        }
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
            Feature::new("chr1", "gene", 1000, 2000).with_strand(Strand::Forward),
            Feature::new("chr1", "exon", 1000, 1200).with_strand(Strand::Forward),
            Feature::new("chr1", "exon", 1800, 2000).with_strand(Strand::Forward),
            Feature::new("chr1", "gene", 5000, 6000).with_strand(Strand::Reverse),
            Feature::new("chr1", "exon", 5000, 6000).with_strand(Strand::Reverse),
        ];
        let lengths: ChromosomeLengths = [("chr1".to_string(), 10_000)].into_iter().collect();
        AnnotationIndex::build(features.into_iter().map(Ok), &lengths, &IndexOptions::default()).unwrap()
    }

    fn read(start: u64, flags: Flags) -> Alignment {
        Alignment::new("chr1", start, vec![Op::new(Kind::Match, 50)])
            .with_flags(flags)
            .with_hit_count(1)
            .with_mapq(60)
    }

    #[test]
    fn test_single_end_sense() {
        let index = index();
        let mut stats = StrandStats::new(0.7, 10);
        let records = [
            read(1050, Flags::empty()),
            read(1500, Flags::empty()),
            read(5100, Flags::REVERSE_COMPLEMENTED),
            read(5200, Flags::REVERSE_COMPLEMENTED),
            read(1900, Flags::REVERSE_COMPLEMENTED),
            read(8000, Flags::empty()),
            read(1050, Flags::empty()).with_mapq(3),
            read(1050, Flags::empty()).with_hit_count(2),
            read(1050, Flags::DUPLICATE),
        ];
        for r in &records {
            stats.collect(r, Some(&index));
        }
        stats.finalize();

        // the intron read sees a gene-stranded intron
        assert_eq!(stats.total, 5);
        let reads = stats.reads.clone().unwrap();
        assert_eq!((reads.plus_plus, reads.minus_minus), (2, 2));
        assert_eq!(reads.minus_plus, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.strandness, "SENSE");
        assert!(stats.pairs.is_none());
    }

    #[test]
    fn test_paired_end_mate2_sense() {
        let index = index();
        let mut stats = StrandStats::new(0.7, 0);
        let mate1 = Flags::SEGMENTED | Flags::FIRST_SEGMENT;
        let mate2 = Flags::SEGMENTED | Flags::LAST_SEGMENT;
        for r in [
            read(1050, mate1 | Flags::REVERSE_COMPLEMENTED),
            read(1100, mate2),
            read(5100, mate1),
            read(5300, mate2 | Flags::REVERSE_COMPLEMENTED),
        ] {
            stats.collect(&r, Some(&index));
        }
        stats.finalize();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.antisense_fraction(), 1.0);
        assert_eq!(stats.strandness, "MATE2_SENSE");

        let doc = serde_json::to_value(&stats).unwrap();
        assert_eq!(doc["pairs"]["1-+"], 1);
        assert_eq!(doc["pairs"]["2++"], 1);
        assert!(doc.get("reads").is_none());
    }

    #[test]
    fn test_update_and_mixed() {
        let index = index();
        let mut single = StrandStats::new(0.5, 0);
        single.collect(&read(1050, Flags::empty()), Some(&index));
        let mut paired = StrandStats::new(0.5, 0);
        paired.collect(&read(1050, Flags::SEGMENTED | Flags::FIRST_SEGMENT), Some(&index));

        let mut merged = single.clone();
        merged.update(&paired);
        merged.finalize();
        assert_eq!(merged.total, 2);
        assert_eq!(merged.strandness, "NONE");

        let mut other_way = paired;
        other_way.update(&single);
        other_way.finalize();
        assert_eq!(merged, other_way);
    }
}
