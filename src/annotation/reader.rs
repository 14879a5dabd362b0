//! Streaming BED/GTF annotation reader.
//!
//! The reader peeks at the first bytes of the input to decide whether the
//! payload is gzip or bzip2 compressed, then peeks at the first few kilobytes
//! of the decompressed text to decide between BED and GTF. Records are then
//! produced lazily, one [`Feature`] per call to `next`.

use super::ChromosomeLengths;
use super::feature::{Feature, Strand, Tags, labels};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::Path;
use std::sync::Arc;

/// Number of decompressed bytes inspected when guessing the format.
pub const PEEK_LEN: usize = 4096;

/// Upper bound on the prefix grown while skipping leading comment lines.
pub const MAX_PEEK_LEN: usize = 1 << 20;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationFormat {
    /// chrom, start, end, label
    Bed,
    /// chrom, start, end, label, score, strand
    Bed6,
    /// nine column GTF, 1-based closed coordinates
    Gtf,
}

impl AnnotationFormat {
    fn from_field_count(count: usize) -> Option<Self> {
        match count {
            4 => Some(AnnotationFormat::Bed),
            6 => Some(AnnotationFormat::Bed6),
            9 => Some(AnnotationFormat::Gtf),
            _ => None,
        }
    }

    fn min_fields(&self) -> usize {
        match self {
            AnnotationFormat::Bed => 4,
            AnnotationFormat::Bed6 => 6,
            AnnotationFormat::Gtf => 9,
        }
    }
}

impl fmt::Display for AnnotationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationFormat::Bed => f.write_str("BED"),
            AnnotationFormat::Bed6 => f.write_str("BED6"),
            AnnotationFormat::Gtf => f.write_str("GTF"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Bzip2,
}

fn detect_compression(prefix: &[u8]) -> Compression {
    if prefix.starts_with(GZIP_MAGIC) {
        Compression::Gzip
    } else if prefix.starts_with(BZIP2_MAGIC) {
        Compression::Bzip2
    } else {
        Compression::None
    }
}

/// Read up to `n` bytes from `reader`, stopping early only at end of stream.
fn read_prefix<R: Read>(reader: &mut R, n: usize) -> io::Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(n);
    reader.take(n as u64).read_to_end(&mut prefix)?;
    Ok(prefix)
}

/// Wrap `reader` in the right decompressor based on its magic bytes.
pub fn open_decompressed<R: Read + 'static>(reader: R) -> io::Result<Box<dyn BufRead>> {
    let mut reader = BufReader::new(reader);
    let compression = detect_compression(reader.fill_buf()?);
    Ok(match compression {
        Compression::Gzip => Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(reader))),
        Compression::Bzip2 => Box::new(BufReader::new(bzip2::read::BzDecoder::new(reader))),
        Compression::None => Box::new(reader),
    })
}

/// Guess the annotation format from a prefix of decompressed text.
///
/// `complete` tells whether the prefix holds the whole stream; if not, the
/// last line may be truncated and cannot be trusted.
pub fn sniff_format(prefix: &[u8], complete: bool) -> Result<AnnotationFormat> {
    let mut rest = prefix;
    while !rest.is_empty() {
        let (line, terminated) = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => {
                let line = &rest[..i];
                rest = &rest[i + 1..];
                (line, true)
            }
            None => {
                let line = rest;
                rest = &[];
                (line, false)
            }
        };
        let line = trim_line(line);
        if line.is_empty() || line.starts_with(b"#") {
            continue;
        }
        if !terminated && !complete {
            return Err(Error::Format(format!(
                "cannot guess annotation format: first record does not end within the first {} bytes",
                prefix.len()
            )));
        }
        let fields = line.iter().filter(|&&b| b == b'\t').count() + 1;
        return AnnotationFormat::from_field_count(fields).ok_or_else(|| {
            Error::Format(format!(
                "unrecognised annotation layout: {} tab-separated fields (expected 4 or 6 for BED, 9 for GTF)",
                fields
            ))
        });
    }
    if complete {
        Err(Error::Format("no annotation records found".to_string()))
    } else {
        Err(Error::Format(format!(
            "cannot guess annotation format: no record within the first {} bytes",
            prefix.len()
        )))
    }
}

/// Whether `prefix` holds at least one newline-terminated record line.
fn has_record_line(prefix: &[u8]) -> bool {
    let Some(last) = prefix.iter().rposition(|&b| b == b'\n') else {
        return false;
    };
    prefix[..last].split(|&b| b == b'\n').any(|line| {
        let line = trim_line(line);
        !line.is_empty() && !line.starts_with(b"#")
    })
}

/// Read the prefix handed to [`sniff_format`]. Starts at [`PEEK_LEN`] bytes
/// and keeps going while only comments have been seen, up to [`MAX_PEEK_LEN`].
fn read_sniff_prefix<R: Read>(reader: &mut R) -> io::Result<(Vec<u8>, bool)> {
    let mut prefix = read_prefix(reader, PEEK_LEN)?;
    let mut complete = prefix.len() < PEEK_LEN;
    while !complete && prefix.len() < MAX_PEEK_LEN && !has_record_line(&prefix) {
        let more = read_prefix(reader, PEEK_LEN)?;
        complete = more.len() < PEEK_LEN;
        prefix.extend_from_slice(&more);
    }
    Ok((prefix, complete))
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n' | b' ') {
        end -= 1;
    }
    &line[..end]
}

/// Parse a GTF attribute column (`key "value"; key "value";`).
pub fn parse_attributes(column: &str) -> Tags {
    column
        .split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            let (key, value) = pair.split_once(char::is_whitespace)?;
            Some((key.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

/// Lazily yields annotation features from a BED or GTF stream.
pub struct FeatureReader {
    inner: Box<dyn BufRead>,
    format: AnnotationFormat,
    chrom_lengths: ChromosomeLengths,
    line: String,
    line_no: usize,
    done: bool,
    chroms: HashMap<String, Arc<str>>,
    elements: HashMap<String, Arc<str>>,
}

impl FeatureReader {
    /// Build a reader over any byte stream. Compression and format are
    /// detected here, so format errors surface before the first record.
    ///
    /// For GTF input, rows on chromosomes missing from a non-empty
    /// `chrom_lengths` table are skipped.
    pub fn new<R: Read + 'static>(reader: R, chrom_lengths: ChromosomeLengths) -> Result<Self> {
        let mut decompressed = open_decompressed(reader)?;
        let (prefix, complete) = read_sniff_prefix(&mut decompressed)?;
        let format = sniff_format(&prefix, complete)?;
        let inner: Box<dyn BufRead> = Box::new(BufReader::new(Cursor::new(prefix).chain(decompressed)));

        tracing::debug!(%format, "detected annotation format");

        Ok(Self {
            inner,
            format,
            chrom_lengths,
            line: String::new(),
            line_no: 0,
            done: false,
            chroms: HashMap::new(),
            elements: HashMap::new(),
        })
    }

    pub fn from_path(path: &Path, chrom_lengths: ChromosomeLengths) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(file, chrom_lengths)
    }

    pub fn format(&self) -> AnnotationFormat {
        self.format
    }

    fn intern(map: &mut HashMap<String, Arc<str>>, name: &str) -> Arc<str> {
        if let Some(v) = map.get(name) {
            return Arc::clone(v);
        }
        let v: Arc<str> = Arc::from(name);
        map.insert(name.to_string(), Arc::clone(&v));
        v
    }

    fn parse_coord(&self, field: &str, what: &str) -> Result<u64> {
        field.trim().parse::<u64>().map_err(|_| {
            Error::parse(self.line_no, format!("non-numeric {} {:?}", what, field))
        })
    }

    fn parse_interval(&self, start: &str, end: &str) -> Result<(u64, u64)> {
        let start = self.parse_coord(start, "start")?;
        let end = self.parse_coord(end, "end")?;
        if end < start {
            return Err(Error::parse(
                self.line_no,
                format!("end {} is before start {}", end, start),
            ));
        }
        Ok((start, end))
    }

    fn parse_bed(&mut self, fields: &[&str]) -> Result<Feature> {
        let (start, end) = self.parse_interval(fields[1], fields[2])?;
        let chrom = Self::intern(&mut self.chroms, fields[0]);
        let element = Self::intern(&mut self.elements, fields[3]);
        let mut feature = Feature::new(chrom, element, start, end);
        if self.format == AnnotationFormat::Bed6 {
            feature = feature.with_strand(Strand::from_field(fields[5]));
        }
        Ok(feature)
    }

    /// `Ok(None)` means the row is valid but not wanted.
    fn parse_gtf(&mut self, fields: &[&str]) -> Result<Option<Feature>> {
        let kind = fields[2];
        if kind != labels::GENE && kind != labels::EXON {
            return Ok(None);
        }
        if !self.chrom_lengths.is_empty() && !self.chrom_lengths.contains_key(fields[0]) {
            return Ok(None);
        }
        let (start, end) = self.parse_interval(fields[3], fields[4])?;
        if start == 0 {
            return Err(Error::parse(self.line_no, "GTF coordinates are 1-based"));
        }
        let chrom = Self::intern(&mut self.chroms, fields[0]);
        let element = Self::intern(&mut self.elements, kind);
        let mut feature =
            Feature::new(chrom, element, start - 1, end).with_strand(Strand::from_field(fields[6]));
        if kind == labels::GENE {
            feature = feature.with_tags(parse_attributes(fields[8]));
        }
        Ok(Some(feature))
    }

    fn read_feature(&mut self) -> Result<Option<Feature>> {
        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = std::mem::take(&mut self.line);
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                self.line = line;
                continue;
            }

            let fields: Vec<&str> = trimmed.split('\t').collect();
            if fields.len() < self.format.min_fields() {
                return Err(Error::Format(format!(
                    "line {}: expected {} fields for {}, found {}",
                    self.line_no,
                    self.format.min_fields(),
                    self.format,
                    fields.len()
                )));
            }

            let parsed = match self.format {
                AnnotationFormat::Bed | AnnotationFormat::Bed6 => self.parse_bed(&fields).map(Some),
                AnnotationFormat::Gtf => self.parse_gtf(&fields),
            };
            drop(fields);
            self.line = line;
            match parsed? {
                Some(feature) => return Ok(Some(feature)),
                None => continue,
            }
        }
    }
}

impl Iterator for FeatureReader {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_feature() {
            Ok(Some(feature)) => Some(Ok(feature)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn read_all(data: &'static [u8], lengths: ChromosomeLengths) -> Result<Vec<Feature>> {
        FeatureReader::new(data, lengths)?.collect()
    }

    const GTF: &[u8] = b"##description: test\n\
chr1\tHAVANA\tgene\t11869\t14409\t.\t+\t.\tgene_id \"ENSG00000223972\"; gene_type \"transcribed_unprocessed_pseudogene\";\n\
chr1\tHAVANA\ttranscript\t11869\t14409\t.\t+\t.\tgene_id \"ENSG00000223972\";\n\
chr1\tHAVANA\texon\t11869\t12227\t.\t+\t.\tgene_id \"ENSG00000223972\";\n\
chrUn\tHAVANA\texon\t100\t200\t.\t+\t.\tgene_id \"X\";\n";

    #[test]
    fn test_sniff_bed_and_gtf() {
        assert_eq!(sniff_format(b"chr1\t0\t10\texon\n", true).unwrap(), AnnotationFormat::Bed);
        assert_eq!(
            sniff_format(b"# header\nchr1\t0\t10\texon\t.\t+\n", true).unwrap(),
            AnnotationFormat::Bed6
        );
        assert_eq!(sniff_format(GTF, true).unwrap(), AnnotationFormat::Gtf);
    }

    #[test]
    fn test_sniff_rejects_other_shapes() {
        let err = sniff_format(b"chr1\t0\t10\n", true).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert!(matches!(sniff_format(b"", true), Err(Error::Format(_))));
        // truncated first record in an incomplete prefix
        assert!(matches!(sniff_format(b"chr1\t0\t10\tex", false), Err(Error::Format(_))));
    }

    #[test]
    fn test_long_comment_header_is_skipped() {
        let mut text = String::new();
        while text.len() < 3 * PEEK_LEN {
            text.push_str("#!genome-build GRCh38.p14 with a long provenance comment line\n");
        }
        text.push_str("chr1\t0\t10\texon\t.\t+\nchr1\t20\t30\texon\t.\t-\n");
        let reader = FeatureReader::new(Cursor::new(text.into_bytes()), ChromosomeLengths::new()).unwrap();
        assert_eq!(reader.format(), AnnotationFormat::Bed6);
        let features: Vec<Feature> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[1].start(), 20);
    }

    #[test]
    fn test_comment_only_prefix_reports_window() {
        let comments = "# comment\n".repeat(PEEK_LEN / 10 + 1);
        let err = sniff_format(&comments.as_bytes()[..PEEK_LEN], false).unwrap_err();
        assert!(err.to_string().contains("first 4096 bytes"), "{}", err);
        assert!(has_record_line(b"# a\nchr1\t0\t1\texon\n"));
        assert!(!has_record_line(b"# a\nchr1\t0\t1\tex"));
    }

    #[test]
    fn test_read_bed() {
        let features = read_all(b"chr1\t11868\t12227\texon\n\nchr1\t12227\t12612\tintron\n", ChromosomeLengths::new()).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].start(), 11868);
        assert_eq!(features[0].end(), 12227);
        assert_eq!(features[1].element(), "intron");
        assert_eq!(features[0].strand(), Strand::Unknown);
    }

    #[test]
    fn test_read_gtf_converts_coordinates_and_filters_rows() {
        let lengths: ChromosomeLengths = [("chr1".to_string(), 248_956_422)].into_iter().collect();
        let features = read_all(GTF, lengths).unwrap();
        assert_eq!(features.len(), 2);

        let gene = &features[0];
        assert_eq!(gene.element(), "gene");
        assert_eq!((gene.start(), gene.end()), (11868, 14409));
        assert_eq!(gene.strand(), Strand::Forward);
        assert_eq!(gene.tag("gene_type"), Some("transcribed_unprocessed_pseudogene"));

        let exon = &features[1];
        assert_eq!((exon.start(), exon.end()), (11868, 12227));
        assert_eq!(exon.tag("gene_id"), None);
    }

    #[test]
    fn test_non_numeric_interval_is_parse_error() {
        let mut reader = FeatureReader::new(&b"chr1\t0\t10\texon\nchr1\tten\t20\texon\n"[..], ChromosomeLengths::new()).unwrap();
        assert!(reader.next().unwrap().is_ok());
        match reader.next() {
            Some(Err(Error::Parse { line, .. })) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_gzip_and_bzip2_are_transparent() {
        let plain = b"chr1\t0\t100\tgene\nchr1\t150\t200\tgene\n";

        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(plain).unwrap();
        let gz = gz.finish().unwrap();

        let mut bz = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        bz.write_all(plain).unwrap();
        let bz = bz.finish().unwrap();

        for payload in [gz, bz] {
            let reader = FeatureReader::new(Cursor::new(payload), ChromosomeLengths::new()).unwrap();
            assert_eq!(reader.format(), AnnotationFormat::Bed);
            let features: Vec<Feature> = reader.collect::<Result<_>>().unwrap();
            assert_eq!(features.len(), 2);
            assert_eq!(features[1].start(), 150);
        }
    }

    #[test]
    fn test_parse_attributes() {
        let tags = parse_attributes("gene_id \"G1\"; gene_type \"rRNA\"; level 2;");
        assert_eq!(tags.get("gene_id").map(String::as_str), Some("G1"));
        assert_eq!(tags.get("gene_type").map(String::as_str), Some("rRNA"));
        assert_eq!(tags.get("level").map(String::as_str), Some("2"));
    }
}
