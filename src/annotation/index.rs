use super::ChromosomeLengths;
use super::derive::{derive_intergenic, derive_introns, merge_overlapping};
use super::feature::{Feature, compare_chromosomes, labels};
use super::reader::FeatureReader;
use super::tree::IntervalTree;
use crate::{Error, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Threads used to build per-chromosome indexes.
    pub workers: usize,
    /// When set, every indexed feature is written here as BED6 after the build.
    pub dump_path: Option<PathBuf>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            dump_path: None,
        }
    }
}

/// Queryable features of a single chromosome, including derived introns
/// and intergenic regions.
#[derive(Debug, Clone)]
pub struct ChromosomeIndex {
    chrom: Arc<str>,
    tree: IntervalTree,
}

impl ChromosomeIndex {
    /// Build the final index for one chromosome from its raw features, which
    /// must arrive sorted by start.
    ///
    /// Introns and intergenic regions are derived from genes and exons. Each
    /// derivation is skipped when the input already carries that label, and
    /// intergenic regions need at least one gene to be bounded by.
    pub fn build(chrom: Arc<str>, raw: Vec<Feature>, chrom_len: Option<u64>) -> Result<Self> {
        let has_label = |label: &str| raw.iter().any(|f| f.element() == label);
        let has_introns = has_label(labels::INTRON);
        let has_intergenic = has_label(labels::INTERGENIC);

        let genes = merge_overlapping(
            raw.iter()
                .filter(|f| f.element() == labels::GENE)
                .cloned()
                .collect(),
        )?;
        let introns = if has_introns || genes.is_empty() {
            Vec::new()
        } else {
            derive_introns(&chrom, &genes, &IntervalTree::build(raw.clone()))
        };
        let intergenic = if has_intergenic || genes.is_empty() {
            Vec::new()
        } else {
            derive_intergenic(&chrom, &genes, chrom_len)
        };
        debug!(
            %chrom,
            raw = raw.len(),
            has_introns,
            has_intergenic,
            introns = introns.len(),
            intergenic = intergenic.len(),
            "derived chromosome features"
        );

        let mut features = raw;
        features.extend(introns);
        features.extend(intergenic);
        Ok(Self {
            chrom,
            tree: IntervalTree::build(features),
        })
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn tree(&self) -> &IntervalTree {
        &self.tree
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Per-chromosome interval indexes for a whole annotation.
#[derive(Debug, Clone, Default)]
pub struct AnnotationIndex {
    chromosomes: HashMap<Arc<str>, ChromosomeIndex>,
}

impl AnnotationIndex {
    /// Read an annotation file and index it.
    pub fn from_path(path: &Path, lengths: &ChromosomeLengths, options: &IndexOptions) -> Result<Self> {
        info!(path = %path.display(), "reading annotation");
        let reader = FeatureReader::from_path(path, lengths.clone())?;
        Self::build(reader, lengths, options)
    }

    /// Index a stream of features.
    ///
    /// The stream is scanned once on the calling thread and fanned out to one
    /// builder task per chromosome on a pool of `options.workers` threads.
    /// Within a chromosome, starts must be non-decreasing.
    pub fn build<I>(features: I, lengths: &ChromosomeLengths, options: &IndexOptions) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Feature>>,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers.max(1))
            .build()
            .map_err(|e| Error::Internal(format!("failed to start index workers: {}", e)))?;

        let (done_tx, done_rx) = unbounded::<Result<ChromosomeIndex>>();

        let total = pool.in_place_scope(|scope| -> Result<usize> {
            let mut routes: HashMap<Arc<str>, (Sender<Feature>, u64)> = HashMap::new();
            let mut total = 0usize;

            for feature in features {
                let feature = feature?;
                total += 1;

                if let Some((tx, last_start)) = routes.get_mut(feature.chrom()) {
                    if feature.start() < *last_start {
                        return Err(Error::UnsortedInput {
                            chrom: feature.chrom().to_string(),
                            start: feature.start(),
                            previous: *last_start,
                        });
                    }
                    *last_start = feature.start();
                    tx.send(feature)
                        .map_err(|_| Error::Internal("index builder exited early".to_string()))?;
                    continue;
                }

                let chrom = Arc::clone(feature.chrom_arc());
                let chrom_len = lengths.get(&*chrom).copied();
                let (tx, rx): (Sender<Feature>, Receiver<Feature>) = unbounded();
                let done = done_tx.clone();
                let task_chrom = Arc::clone(&chrom);
                scope.spawn(move |_| {
                    let raw: Vec<Feature> = rx.iter().collect();
                    let _ = done.send(ChromosomeIndex::build(task_chrom, raw, chrom_len));
                });

                let start = feature.start();
                tx.send(feature)
                    .map_err(|_| Error::Internal("index builder exited early".to_string()))?;
                routes.insert(chrom, (tx, start));
            }
            // dropping the senders lets every builder finish
            Ok(total)
        })?;
        drop(done_tx);

        if total == 0 {
            return Err(Error::Format("annotation contains no features".to_string()));
        }

        let mut chromosomes = HashMap::new();
        for built in done_rx.iter() {
            let index = built?;
            chromosomes.insert(Arc::clone(&index.chrom), index);
        }
        let index = Self { chromosomes };
        info!(
            chromosomes = index.chromosomes.len(),
            features = total,
            indexed = index.len(),
            "annotation indexed"
        );

        if let Some(path) = &options.dump_path {
            info!(path = %path.display(), "writing indexed features");
            let mut out = BufWriter::new(File::create(path)?);
            index.write_bed(&mut out)?;
            out.flush()?;
        }
        Ok(index)
    }

    pub fn get(&self, chrom: &str) -> Option<&ChromosomeIndex> {
        self.chromosomes.get(chrom)
    }

    /// Indexed chromosome names in karyotype order.
    pub fn chromosomes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.chromosomes.keys().map(|c| &**c).collect();
        names.sort_by(|a, b| compare_chromosomes(a, b));
        names
    }

    /// Total number of indexed features, derived ones included.
    pub fn len(&self) -> usize {
        self.chromosomes.values().map(ChromosomeIndex::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Features overlapping `[start, end)` on `chrom`. Unknown chromosomes
    /// have no features.
    pub fn range_query(&self, chrom: &str, start: u64, end: u64) -> Vec<&Feature> {
        self.get(chrom)
            .map(|c| c.tree.range_query(start, end))
            .unwrap_or_default()
    }

    pub fn range_query_by_element(&self, chrom: &str, start: u64, end: u64, element: &str) -> Vec<&Feature> {
        self.get(chrom)
            .map(|c| c.tree.range_query_by_element(start, end, element))
            .unwrap_or_default()
    }

    pub fn for_each_overlap<'a, F>(&'a self, chrom: &str, start: u64, end: u64, visit: F)
    where
        F: FnMut(&'a Feature),
    {
        if let Some(c) = self.get(chrom) {
            c.tree.for_each_overlap(start, end, visit);
        }
    }

    /// Write every indexed feature as BED6, chromosome by chromosome.
    pub fn write_bed<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for chrom in self.chromosomes() {
            if let Some(index) = self.get(chrom) {
                for feature in index.tree.iter() {
                    writeln!(out, "{}", feature.to_bed_line())?;
                }
            }
        }
        Ok(())
    }
}
