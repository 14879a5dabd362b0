//! Distributes alignment records over worker threads and folds their
//! statistics together.
//!
//! Two modes exist. The sequential mode reads the file once and deals
//! records round-robin to the workers through bounded queues. The
//! partitioned mode, used when the input has an index, gives whole
//! references to workers which each read their own share of the file.

use crate::alignment::Alignment;
use crate::alignment::bam::BamSource;
use crate::annotation::AnnotationIndex;
use crate::stats::strand::{DEFAULT_MIN_MAPQ, DEFAULT_THRESHOLD};
use crate::stats::{
    Accumulator, COVERAGE, COVERAGE_UNIQ, CoverageStats, GENERAL, GeneralStats, RNASEQ, RnaSeqStats,
    STRAND, StatsMap, StrandStats,
};
use crate::{Error, Result};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::ops::ControlFlow;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Independently readable slices of the alignment input.
pub trait Partition: Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Label used in log messages, normally the reference name.
    fn name(&self, partition: usize) -> &str;

    /// Feed every record of `partition` to `visit` until it breaks.
    fn for_each(&self, partition: usize, visit: &mut dyn FnMut(Alignment) -> ControlFlow<()>) -> Result<()>;
}

/// Default capacity of each worker queue. A bounded crossbeam channel
/// allocates its whole slot array up front, so memory grows with
/// `max_buf * workers * size_of::<Alignment>()` before any record is read.
pub const DEFAULT_MAX_BUF: usize = 10_000;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    /// Capacity of each worker queue in sequential mode, allocated eagerly.
    pub max_buf: usize,
    /// Stop after this many primary records.
    pub reads: Option<u64>,
    /// Also report coverage for uniquely mapped reads.
    pub uniq: bool,
    pub strand_threshold: f64,
    pub min_mapq: u8,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            max_buf: DEFAULT_MAX_BUF,
            reads: None,
            uniq: false,
            strand_threshold: DEFAULT_THRESHOLD,
            min_mapq: DEFAULT_MIN_MAPQ,
        }
    }
}

impl PipelineOptions {
    fn worker_count(&self) -> usize {
        self.workers.max(1)
    }
}

/// The accumulators one worker runs. Annotation-based statistics are only
/// registered when an annotation was given.
pub fn new_stats_map(options: &PipelineOptions, has_annotation: bool) -> StatsMap {
    let mut map = StatsMap::new();
    map.insert(GENERAL, Accumulator::General(GeneralStats::default()));
    if has_annotation {
        map.insert(COVERAGE, Accumulator::Coverage(CoverageStats::default()));
        if options.uniq {
            map.insert(COVERAGE_UNIQ, Accumulator::Coverage(CoverageStats::unique_only()));
        }
        map.insert(
            STRAND,
            Accumulator::Strand(StrandStats::new(options.strand_threshold, options.min_mapq)),
        );
        map.insert(RNASEQ, Accumulator::RnaSeq(RnaSeqStats::default()));
    }
    map
}

/// Fold worker results into one map and compute the derived values.
fn reduce(results: &Receiver<StatsMap>, options: &PipelineOptions, has_annotation: bool) -> Result<StatsMap> {
    let mut total = new_stats_map(options, has_annotation);
    total.merge(results)?;
    total.finalize();
    Ok(total)
}

/// Read `records` once, dealing them round-robin to the workers.
pub fn run_sequential<I>(records: I, index: Option<&AnnotationIndex>, options: &PipelineOptions) -> Result<StatsMap>
where
    I: IntoIterator<Item = Result<Alignment>>,
{
    let workers = options.worker_count();
    let capacity = options.max_buf.max(1);
    let (result_tx, result_rx) = unbounded();
    info!(workers, capacity, "collecting statistics sequentially");

    let fed = thread::scope(|scope| {
        let mut queues = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = bounded::<Alignment>(capacity);
            queues.push(tx);
            let results = result_tx.clone();
            let mut stats = new_stats_map(options, index.is_some());
            scope.spawn(move || {
                let mut seen = 0u64;
                for record in rx {
                    stats.collect(&record, index);
                    seen += 1;
                }
                debug!(worker = id, records = seen, "worker finished");
                if results.send(stats).is_err() {
                    warn!(worker = id, "result queue closed");
                }
            });
        }
        // dropping the queues on return lets the workers drain and exit
        deal(records, &queues, options.reads)
    });
    drop(result_tx);

    let primaries = fed?;
    info!(primaries, "all records dispatched");
    reduce(&result_rx, options, index.is_some())
}

fn deal<I>(records: I, queues: &[Sender<Alignment>], limit: Option<u64>) -> Result<u64>
where
    I: IntoIterator<Item = Result<Alignment>>,
{
    let mut primaries = 0u64;
    for (n, record) in records.into_iter().enumerate() {
        if limit.is_some_and(|limit| primaries >= limit) {
            break;
        }
        let record = record?;
        if record.is_primary() {
            primaries += 1;
        }
        queues[n % queues.len()]
            .send(record)
            .map_err(|_| Error::Internal("worker queue closed early".to_string()))?;
    }
    Ok(primaries)
}

/// Per-partition share of a read limit; the remainder goes to the first
/// partition.
fn partition_limit(limit: Option<u64>, partitions: usize, partition: usize) -> Option<u64> {
    let limit = limit?;
    let parts = partitions.max(1) as u64;
    let share = limit / parts;
    if partition == 0 {
        Some(share + limit % parts)
    } else {
        Some(share)
    }
}

/// Process every partition on a pool of at most `partitions.len()` workers.
pub fn run_partitioned<P>(partitions: &P, index: Option<&AnnotationIndex>, options: &PipelineOptions) -> Result<StatsMap>
where
    P: Partition + ?Sized,
{
    let count = partitions.len();
    let workers = options.worker_count().min(count).max(1);
    info!(workers, partitions = count, "collecting statistics per reference");

    let (work_tx, work_rx) = unbounded::<usize>();
    for partition in 0..count {
        work_tx
            .send(partition)
            .map_err(|_| Error::Internal("work queue closed early".to_string()))?;
    }
    drop(work_tx);

    let (result_tx, result_rx) = unbounded::<Result<StatsMap>>();
    thread::scope(|scope| {
        for id in 0..workers {
            let work = work_rx.clone();
            let results = result_tx.clone();
            scope.spawn(move || {
                let outcome = visit_partitions(partitions, &work, index, options, id);
                if results.send(outcome).is_err() {
                    warn!(worker = id, "result queue closed");
                }
            });
        }
    });
    drop(result_tx);

    let mut total = new_stats_map(options, index.is_some());
    for outcome in result_rx {
        total.update(&outcome?)?;
    }
    total.finalize();
    Ok(total)
}

fn visit_partitions<P>(
    partitions: &P,
    work: &Receiver<usize>,
    index: Option<&AnnotationIndex>,
    options: &PipelineOptions,
    worker: usize,
) -> Result<StatsMap>
where
    P: Partition + ?Sized,
{
    let mut stats = new_stats_map(options, index.is_some());
    for partition in work.iter() {
        let limit = partition_limit(options.reads, partitions.len(), partition);
        if limit == Some(0) {
            continue;
        }
        let mut primaries = 0u64;
        let mut seen = 0u64;
        partitions.for_each(partition, &mut |record: Alignment| {
            stats.collect(&record, index);
            seen += 1;
            if record.is_primary() {
                primaries += 1;
            }
            match limit {
                Some(limit) if primaries >= limit => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        })?;
        debug!(worker, reference = partitions.name(partition), records = seen, "reference done");
    }
    Ok(stats)
}

/// Compute statistics for a BAM file, using its index when there is one
/// and more than one worker was asked for.
pub fn process(source: &BamSource, index: Option<&AnnotationIndex>, options: &PipelineOptions) -> Result<StatsMap> {
    let started = Instant::now();
    let chunks = if options.worker_count() > 1 {
        source.reference_chunks()?
    } else {
        None
    };

    let stats = match chunks {
        Some(chunks) => run_partitioned(&chunks, index, options)?,
        None => run_sequential(source.records()?, index, options)?,
    };
    info!(elapsed = ?started.elapsed(), "statistics collected");
    Ok(stats)
}
