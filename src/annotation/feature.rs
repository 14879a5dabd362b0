use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Element labels with special meaning for derivation and classification.
pub mod labels {
    pub const GENE: &str = "gene";
    pub const EXON: &str = "exon";
    pub const INTRON: &str = "intron";
    pub const INTERGENIC: &str = "intergenic";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strand {
    Forward,
    Reverse,
    #[default]
    Unknown,
}

impl Strand {
    pub fn from_field(field: &str) -> Self {
        match field {
            "+" => Strand::Forward,
            "-" => Strand::Reverse,
            _ => Strand::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Strand::Unknown)
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Forward => f.write_str("+"),
            Strand::Reverse => f.write_str("-"),
            Strand::Unknown => f.write_str("."),
        }
    }
}

pub type Tags = BTreeMap<String, String>;

/// One annotated genomic interval, half-open `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    chrom: Arc<str>,
    element: Arc<str>,
    start: u64,
    end: u64,
    strand: Strand,
    tags: Option<Arc<Tags>>,
}

impl Feature {
    pub fn new(chrom: impl Into<Arc<str>>, element: impl Into<Arc<str>>, start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "feature start {start} > end {end}");
        Self {
            chrom: chrom.into(),
            element: element.into(),
            start,
            end,
            strand: Strand::Unknown,
            tags: None,
        }
    }

    pub fn with_strand(mut self, strand: Strand) -> Self {
        self.strand = strand;
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = Some(Arc::new(tags));
        self
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub(crate) fn chrom_arc(&self) -> &Arc<str> {
        &self.chrom
    }

    pub fn element(&self) -> &str {
        &self.element
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.as_ref()?.get(key).map(String::as_str)
    }

    /// Replace the interval in place. Used while merging runs of the same label.
    pub fn set_bounds(&mut self, start: u64, end: u64) {
        debug_assert!(start <= end);
        self.start = start;
        self.end = end;
    }

    pub fn set_strand(&mut self, strand: Strand) {
        self.strand = strand;
    }

    /// Length of the overlap between this feature and `[start, end)`.
    #[inline]
    pub fn overlap_len(&self, start: u64, end: u64) -> u64 {
        self.end.min(end).saturating_sub(self.start.max(start))
    }

    /// BED6 representation, as written by the element dump.
    pub fn to_bed_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t.\t{}",
            self.chrom, self.start, self.end, self.element, self.strand
        )
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}:{}",
            self.chrom, self.start, self.end, self.element, self.strand
        )
    }
}

/// Orders chromosome names the way karyotypes are usually listed: numbered
/// chromosomes first, then X, Y and M, then anything else by name.
pub fn compare_chromosomes(a: &str, b: &str) -> Ordering {
    fn rank(name: &str) -> (u8, u64, &str) {
        let bare = name.strip_prefix("chr").unwrap_or(name);
        if let Ok(n) = bare.parse::<u64>() {
            return (0, n, bare);
        }
        match bare {
            "X" => (1, 0, bare),
            "Y" => (2, 0, bare),
            "M" | "MT" => (3, 0, bare),
            _ => (4, 0, bare),
        }
    }
    rank(a).cmp(&rank(b))
}
