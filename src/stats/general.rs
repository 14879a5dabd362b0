use super::{Stats, TagMap, ratio, serialize_fraction};
use crate::alignment::Alignment;
use crate::annotation::AnnotationIndex;
use serde::Serialize;

/// Counters shared by reads and read pairs. `mapped` is keyed by `NH`
/// (0 when the tag is missing).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappedReads {
    pub total: u64,
    pub unmapped: u64,
    pub mapped: TagMap,
    pub forward: u64,
    pub reverse: u64,
}

impl MappedReads {
    fn update(&mut self, other: &MappedReads) {
        self.total += other.total;
        self.unmapped += other.unmapped;
        self.mapped.update(&other.mapped);
        self.forward += other.forward;
        self.reverse += other.reverse;
    }

    fn count_strand(&mut self, record: &Alignment) {
        if record.is_reverse() {
            self.reverse += 1;
        } else {
            self.forward += 1;
        }
    }

    fn finalize(&mut self) {
        self.unmapped = self.total.saturating_sub(self.mapped.total());
    }

    /// Uniquely mapped reads.
    pub fn unique(&self) -> u64 {
        self.mapped.get(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Mappings {
    /// Mappings per mapped read.
    #[serde(serialize_with = "serialize_fraction")]
    pub ratio: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadStats {
    #[serde(flatten)]
    pub counts: MappedReads,
    pub continuous: u64,
    pub split: u64,
    pub duplicated: u64,
    pub mappings: Mappings,
}

impl std::ops::Deref for ReadStats {
    type Target = MappedReads;

    fn deref(&self) -> &MappedReads {
        &self.counts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PairStats {
    #[serde(flatten)]
    pub counts: MappedReads,
    pub insert_sizes: TagMap,
}

impl std::ops::Deref for PairStats {
    type Target = MappedReads;

    fn deref(&self) -> &MappedReads {
        &self.counts
    }
}

/// Mapping and pairing counts that need no annotation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeneralStats {
    pub reads: ReadStats,
    pub pairs: PairStats,
}

impl Stats for GeneralStats {
    fn collect(&mut self, record: &Alignment, _index: Option<&AnnotationIndex>) {
        if record.is_unmapped() {
            self.reads.counts.total += 1;
            self.reads.counts.unmapped += 1;
            return;
        }
        self.reads.mappings.count += 1;
        if !record.is_primary() {
            return;
        }

        let nh = u64::from(record.hit_count.unwrap_or(0));
        let reads = &mut self.reads;
        reads.counts.total += 1;
        reads.counts.mapped.increment(nh);
        reads.counts.count_strand(record);
        if record.is_split() {
            reads.split += 1;
        } else {
            reads.continuous += 1;
        }
        if record.is_duplicate() {
            reads.duplicated += 1;
        }

        if record.is_first_of_valid_pair() {
            let pairs = &mut self.pairs;
            pairs.counts.total += 1;
            pairs.counts.mapped.increment(nh);
            pairs.counts.count_strand(record);
            pairs.insert_sizes.increment(record.template_length.unsigned_abs());
        }
    }

    fn update(&mut self, other: &GeneralStats) {
        self.reads.counts.update(&other.reads.counts);
        self.reads.continuous += other.reads.continuous;
        self.reads.split += other.reads.split;
        self.reads.duplicated += other.reads.duplicated;
        self.reads.mappings.count += other.reads.mappings.count;
        self.pairs.counts.update(&other.pairs.counts);
        self.pairs.insert_sizes.update(&other.pairs.insert_sizes);
    }

    fn finalize(&mut self) {
        self.reads.counts.finalize();
        self.pairs.counts.finalize();
        self.reads.mappings.ratio = ratio(self.reads.mappings.count, self.reads.mapped.total());
    }
}
