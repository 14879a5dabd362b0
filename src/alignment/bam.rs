use super::Alignment;
use crate::annotation::ChromosomeLengths;
use crate::pipeline::Partition;
use crate::{Error, Result};
use noodles::bam;
use noodles::bam::bai;
use noodles::core::region::Interval;
use noodles::csi::binning_index::BinningIndex;
use noodles::csi::binning_index::index::reference_sequence::bin::Chunk;
use noodles::sam;
use noodles::sam::alignment::record::data::field::Tag;
use std::fs::File;
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A BAM file on disk together with its header.
pub struct BamSource {
    path: PathBuf,
    header: sam::Header,
    names: Arc<[Arc<str>]>,
}

impl BamSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // bam::io::Reader::new wraps the file in a BGZF reader internally
        let mut reader = bam::io::Reader::new(file);
        let header = reader.read_header()?;
        let names = reference_names(&header);
        debug!(path = %path.display(), references = names.len(), "opened BAM");
        Ok(Self {
            path: path.to_path_buf(),
            header,
            names,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &sam::Header {
        &self.header
    }

    /// Reference lengths from the header, used to bound intergenic regions.
    pub fn chromosome_lengths(&self) -> ChromosomeLengths {
        self.header
            .reference_sequences()
            .iter()
            .map(|(name, reference)| (name.to_string(), reference.length().get() as u64))
            .collect()
    }

    /// Stream every record in file order through a fresh reader.
    pub fn records(&self) -> Result<impl Iterator<Item = Result<Alignment>> + use<>> {
        let mut reader = bam::io::Reader::new(File::open(&self.path)?);
        reader.read_header()?;
        let names = Arc::clone(&self.names);
        let mut record = bam::Record::default();
        let mut failed = false;
        Ok(std::iter::from_fn(move || {
            if failed {
                return None;
            }
            let item = match reader.read_record(&mut record) {
                Ok(0) => return None,
                Ok(_) => convert(&record, &names),
                Err(e) => Err(e.into()),
            };
            failed = item.is_err();
            Some(item)
        }))
    }

    /// Look for `<file>.bai`, then `<stem>.bai`.
    pub fn index_path(&self) -> Option<PathBuf> {
        let appended = PathBuf::from(format!("{}.bai", self.path.display()));
        if appended.exists() {
            return Some(appended);
        }
        let replaced = self.path.with_extension("bai");
        replaced.exists().then_some(replaced)
    }

    /// Resolve every reference's BAI chunks, if an index is present.
    /// References without data are left out.
    pub fn reference_chunks(&self) -> Result<Option<ReferenceChunks>> {
        let Some(index_path) = self.index_path() else {
            return Ok(None);
        };
        info!(path = %index_path.display(), "opening BAM index");
        let index = bai::read(&index_path)
            .inspect_err(|e| warn!(path = %index_path.display(), "failed to read BAM index: {}", e))?;

        let mut references = Vec::new();
        for (id, name) in self.names.iter().enumerate() {
            let chunks = index
                .query(id, Interval::from(..))
                .map_err(|e| Error::Internal(format!("index query failed for {}: {}", name, e)))?;
            if chunks.is_empty() {
                continue;
            }
            if chunks.len() > 1 {
                debug!(reference = %name, chunks = chunks.len(), "reference spans several chunks");
            }
            references.push(ReferenceChunk {
                id,
                name: Arc::clone(name),
                chunks,
            });
        }

        Ok(Some(ReferenceChunks {
            path: self.path.clone(),
            names: Arc::clone(&self.names),
            references,
        }))
    }
}

struct ReferenceChunk {
    id: usize,
    name: Arc<str>,
    chunks: Vec<Chunk>,
}

/// One partition per BAM reference with indexed data. Every visit opens a
/// private reader and seeks straight to that reference's chunks.
pub struct ReferenceChunks {
    path: PathBuf,
    names: Arc<[Arc<str>]>,
    references: Vec<ReferenceChunk>,
}

impl Partition for ReferenceChunks {
    fn len(&self) -> usize {
        self.references.len()
    }

    fn name(&self, partition: usize) -> &str {
        &self.references[partition].name
    }

    fn for_each(&self, partition: usize, visit: &mut dyn FnMut(Alignment) -> ControlFlow<()>) -> Result<()> {
        let reference = &self.references[partition];
        let mut reader = bam::io::Reader::new(File::open(&self.path)?);
        reader.read_header()?;
        let mut record = bam::Record::default();

        for chunk in &reference.chunks {
            reader.get_mut().seek(chunk.start())?;
            while reader.get_ref().virtual_position() < chunk.end() {
                if reader.read_record(&mut record)? == 0 {
                    break;
                }
                match record.reference_sequence_id().transpose()? {
                    Some(id) if id == reference.id => {}
                    _ => continue,
                }
                if visit(convert(&record, &self.names)?).is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

fn reference_names(header: &sam::Header) -> Arc<[Arc<str>]> {
    header
        .reference_sequences()
        .keys()
        .map(|name| Arc::from(name.to_string()))
        .collect()
}

fn invalid_data(message: String) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, message))
}

/// Copy the fields the accumulators need out of a raw BAM record.
fn convert(record: &bam::Record, names: &[Arc<str>]) -> Result<Alignment> {
    let reference = match record.reference_sequence_id().transpose()? {
        Some(id) => Some(
            names
                .get(id)
                .cloned()
                .ok_or_else(|| invalid_data(format!("reference sequence id {} not in header", id)))?,
        ),
        None => None,
    };

    let start = match record.alignment_start().transpose()? {
        Some(position) => usize::from(position) as u64 - 1,
        None => 0,
    };

    let cigar = record.cigar().iter().collect::<io::Result<Vec<_>>>()?;

    let hit_count = match record.data().get(&Tag::ALIGNMENT_HIT_COUNT).transpose()? {
        Some(value) => value.as_int().and_then(|n| u32::try_from(n).ok()),
        None => None,
    };

    Ok(Alignment {
        flags: record.flags(),
        reference,
        start,
        mapq: record.mapping_quality().map(|q| q.get()),
        template_length: i64::from(record.template_length()),
        hit_count,
        cigar,
    })
}
