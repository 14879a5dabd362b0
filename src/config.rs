use crate::annotation::IndexOptions;
use crate::pipeline::{DEFAULT_MAX_BUF, PipelineOptions};
use crate::stats::strand::{DEFAULT_MIN_MAPQ, DEFAULT_THRESHOLD};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "bamstats")]
#[command(about = "Mapping statistics for BAM files")]
pub struct Config {
    /// Input BAM file
    #[arg(short, long, env = "BAMSTATS_INPUT")]
    pub input: PathBuf,

    /// Gene annotation (BED, BED6 or GTF, optionally gzip or bzip2 compressed)
    #[arg(short, long, env = "BAMSTATS_ANNOTATION")]
    pub annotation: Option<PathBuf>,

    /// Output file, `-` for stdout
    #[arg(short, long, env = "BAMSTATS_OUTPUT", default_value = "-")]
    pub output: String,

    /// Number of worker threads, 0 for one per logical CPU
    #[arg(short, long, env = "BAMSTATS_CPU", default_value = "0")]
    pub cpu: usize,

    /// Records buffered per worker queue; each queue is allocated in full up front
    #[arg(long, env = "BAMSTATS_MAX_BUF", default_value_t = DEFAULT_MAX_BUF)]
    pub max_buf: usize,

    /// Number of primary records to process, negative for all
    #[arg(short = 'n', long, env = "BAMSTATS_READS", default_value = "-1", allow_negative_numbers = true)]
    pub reads: i64,

    /// Also report coverage for uniquely mapped reads
    #[arg(short, long, env = "BAMSTATS_UNIQ")]
    pub uniq: bool,

    /// Fraction of reads a protocol must explain to call the library stranded
    #[arg(long, env = "BAMSTATS_STRAND_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    pub strand_threshold: f64,

    /// Minimum mapping quality for strand inference
    #[arg(long, env = "BAMSTATS_MIN_MAPQ", default_value_t = DEFAULT_MIN_MAPQ)]
    pub min_mapq: u8,

    /// Write the indexed annotation elements as BED to this file
    #[arg(long, env = "BAMSTATS_DUMP_ELEMENTS")]
    pub dump_elements: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_level: String,
}

impl Config {
    pub fn effective_workers(&self) -> usize {
        if self.cpu > 0 {
            return self.cpu;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn max_reads(&self) -> Option<u64> {
        u64::try_from(self.reads).ok()
    }

    pub fn writes_to_stdout(&self) -> bool {
        self.output == "-"
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            workers: self.effective_workers(),
            dump_path: self.dump_elements.clone(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            workers: self.effective_workers(),
            max_buf: self.max_buf,
            reads: self.max_reads(),
            uniq: self.uniq,
            strand_threshold: self.strand_threshold,
            min_mapq: self.min_mapq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            input: PathBuf::from("reads.bam"),
            annotation: None,
            output: "-".to_string(),
            cpu: 4,
            max_buf: DEFAULT_MAX_BUF,
            reads: -1,
            uniq: false,
            strand_threshold: 0.8,
            min_mapq: 30,
            dump_elements: None,
            log_level: "warn".to_string(),
        }
    }

    #[test]
    fn test_effective_workers_explicit() {
        assert_eq!(config().effective_workers(), 4);
    }

    #[test]
    fn test_effective_workers_default_uses_all_cpus() {
        let config = Config { cpu: 0, ..config() };
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_max_reads() {
        assert_eq!(config().max_reads(), None);
        let config = Config { reads: 1000, ..config() };
        assert_eq!(config.max_reads(), Some(1000));
    }

    #[test]
    fn test_pipeline_options() {
        let config = Config {
            uniq: true,
            reads: 10,
            dump_elements: Some(PathBuf::from("elements.bed")),
            ..config()
        };
        let options = config.pipeline_options();
        assert_eq!(options.workers, 4);
        assert_eq!(options.reads, Some(10));
        assert!(options.uniq);
        assert_eq!(config.index_options().dump_path, Some(PathBuf::from("elements.bed")));
        assert!(config.writes_to_stdout());
    }

    #[test]
    fn test_parse_flags() {
        let config = Config::try_parse_from(["bamstats", "-i", "in.bam", "-a", "genes.gtf.gz", "-n", "-1", "-u", "-c", "2"])
            .unwrap();
        assert_eq!(config.input, PathBuf::from("in.bam"));
        assert_eq!(config.annotation, Some(PathBuf::from("genes.gtf.gz")));
        assert_eq!(config.max_reads(), None);
        assert!(config.uniq);
        assert_eq!(config.effective_workers(), 2);
        assert_eq!(config.max_buf, DEFAULT_MAX_BUF);
        assert_eq!(config.pipeline_options().max_buf, PipelineOptions::default().max_buf);
    }
}
