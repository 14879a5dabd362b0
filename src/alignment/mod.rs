//! Alignment records as seen by the classifier and the accumulators.

pub mod bam;

use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;
use std::sync::Arc;

/// A reference-consuming stretch of an alignment, half-open and 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start: u64,
    pub end: u64,
}

/// The fields of one alignment record that statistics are computed from.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub flags: Flags,
    /// Reference sequence name; `None` for records placed nowhere.
    pub reference: Option<Arc<str>>,
    /// 0-based leftmost reference position.
    pub start: u64,
    pub mapq: Option<u8>,
    pub template_length: i64,
    /// Value of the `NH` tag.
    pub hit_count: Option<u32>,
    pub cigar: Vec<Op>,
}

impl Alignment {
    /// A mapped, forward, single-end record. The `with_*` methods adjust it.
    pub fn new(reference: impl Into<Arc<str>>, start: u64, cigar: Vec<Op>) -> Self {
        Self {
            flags: Flags::empty(),
            reference: Some(reference.into()),
            start,
            mapq: None,
            template_length: 0,
            hit_count: None,
            cigar,
        }
    }

    /// An unplaced unmapped record.
    pub fn unmapped() -> Self {
        Self {
            flags: Flags::UNMAPPED,
            reference: None,
            start: 0,
            mapq: None,
            template_length: 0,
            hit_count: None,
            cigar: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_hit_count(mut self, nh: u32) -> Self {
        self.hit_count = Some(nh);
        self
    }

    pub fn with_mapq(mut self, mapq: u8) -> Self {
        self.mapq = Some(mapq);
        self
    }

    pub fn with_template_length(mut self, tlen: i64) -> Self {
        self.template_length = tlen;
        self
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// Split the alignment at every reference skip (`N`).
    ///
    /// Matches, deletions and sequence (mis)matches extend the current block;
    /// insertions, clips and padding do not move along the reference.
    pub fn blocks(&self) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(2);
        let mut start = self.start;
        let mut end = self.start;
        for op in &self.cigar {
            let len = op.len() as u64;
            match op.kind() {
                Kind::Skip => {
                    blocks.push(Block { start, end });
                    start = end + len;
                    end = start;
                }
                Kind::Match | Kind::Deletion | Kind::SequenceMatch | Kind::SequenceMismatch => {
                    end += len;
                }
                Kind::Insertion | Kind::SoftClip | Kind::HardClip | Kind::Pad => {}
            }
        }
        blocks.push(Block { start, end });
        blocks
    }

    /// Leftmost start to rightmost reference-consumed position.
    pub fn span(&self) -> Block {
        let end = self
            .cigar
            .iter()
            .filter(|op| op.kind().consumes_reference())
            .map(|op| op.len() as u64)
            .sum::<u64>();
        Block {
            start: self.start,
            end: self.start + end,
        }
    }

    pub fn is_split(&self) -> bool {
        self.cigar.iter().any(|op| op.kind() == Kind::Skip)
    }

    pub fn is_primary(&self) -> bool {
        !self.flags.is_secondary()
    }

    pub fn is_unmapped(&self) -> bool {
        self.flags.is_unmapped()
    }

    pub fn is_unique(&self) -> bool {
        self.hit_count == Some(1)
    }

    pub fn is_paired(&self) -> bool {
        self.flags.is_segmented()
    }

    pub fn is_first(&self) -> bool {
        self.flags.is_first_segment()
    }

    pub fn is_second(&self) -> bool {
        self.flags.is_last_segment()
    }

    pub fn is_reverse(&self) -> bool {
        self.flags.is_reverse_complemented()
    }

    pub fn is_duplicate(&self) -> bool {
        self.flags.is_duplicate()
    }

    pub fn is_qc_fail(&self) -> bool {
        self.flags.is_qc_fail()
    }

    /// Mate 1 of a properly paired template whose mate is mapped.
    pub fn is_first_of_valid_pair(&self) -> bool {
        self.flags.is_segmented()
            && self.flags.is_first_segment()
            && self.flags.is_properly_segmented()
            && !self.flags.is_mate_unmapped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(ops: &[(Kind, usize)]) -> Vec<Op> {
        ops.iter().map(|&(kind, len)| Op::new(kind, len)).collect()
    }

    #[test]
    fn test_continuous_record_has_one_block() {
        let aln = Alignment::new(
            "chr1",
            100,
            ops(&[(Kind::SoftClip, 5), (Kind::Match, 40), (Kind::Insertion, 2), (Kind::Match, 10)]),
        );
        assert_eq!(aln.blocks(), vec![Block { start: 100, end: 150 }]);
        assert!(!aln.is_split());
    }

    #[test]
    fn test_skip_splits_blocks() {
        let aln = Alignment::new(
            "chr1",
            12000,
            ops(&[(Kind::Match, 30), (Kind::Skip, 370), (Kind::Match, 20), (Kind::Deletion, 2), (Kind::Match, 24)]),
        );
        assert_eq!(
            aln.blocks(),
            vec![Block { start: 12000, end: 12030 }, Block { start: 12400, end: 12446 }]
        );
        assert!(aln.is_split());
        assert_eq!(aln.span(), Block { start: 12000, end: 12446 });
    }

    #[test]
    fn test_flag_predicates() {
        let mate1 = Alignment::new("chr1", 0, ops(&[(Kind::Match, 10)])).with_flags(
            Flags::SEGMENTED | Flags::PROPERLY_SEGMENTED | Flags::FIRST_SEGMENT | Flags::REVERSE_COMPLEMENTED,
        );
        assert!(mate1.is_first_of_valid_pair());
        assert!(mate1.is_reverse());
        assert!(mate1.is_primary());

        let orphan = mate1.clone().with_flags(mate1.flags | Flags::MATE_UNMAPPED);
        assert!(!orphan.is_first_of_valid_pair());

        let secondary = Alignment::new("chr1", 0, Vec::new()).with_flags(Flags::SECONDARY);
        assert!(!secondary.is_primary());

        assert!(Alignment::unmapped().is_unmapped());
        assert!(Alignment::new("chr1", 0, Vec::new()).with_hit_count(1).is_unique());
        assert!(!Alignment::new("chr1", 0, Vec::new()).with_hit_count(3).is_unique());
        assert!(!Alignment::new("chr1", 0, Vec::new()).is_unique());
    }
}
