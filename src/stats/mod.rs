//! Mergeable accumulators computed over alignment records.
//!
//! Every worker owns a private [`StatsMap`]. Accumulators only ever add
//! counts, so maps from different workers can be folded together in any
//! order; derived values (totals, ratios, fractions) are recomputed by
//! `finalize` once all folding is done.

pub mod coverage;
pub mod general;
pub mod rnaseq;
pub mod strand;
pub mod tagmap;

pub use coverage::{CoverageStats, ElementStats};
pub use general::GeneralStats;
pub use rnaseq::RnaSeqStats;
pub use strand::StrandStats;
pub use tagmap::TagMap;

use crate::alignment::Alignment;
use crate::annotation::AnnotationIndex;
use crate::{Error, Result};
use crossbeam_channel::Receiver;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::io::Write;

pub const GENERAL: &str = "general";
pub const COVERAGE: &str = "coverage";
pub const COVERAGE_UNIQ: &str = "coverageUniq";
pub const STRAND: &str = "strand";
pub const RNASEQ: &str = "rnaseq";

pub trait Stats {
    /// Fold one record into the counters. Annotation-based kinds ignore
    /// records when `index` is `None`.
    fn collect(&mut self, record: &Alignment, index: Option<&AnnotationIndex>);

    /// Add the counters of `other`. Must be commutative and associative.
    fn update(&mut self, other: &Self);

    /// Recompute derived values from the raw counters.
    fn finalize(&mut self);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Accumulator {
    General(GeneralStats),
    Coverage(CoverageStats),
    Strand(StrandStats),
    RnaSeq(RnaSeqStats),
}

impl Accumulator {
    pub fn kind(&self) -> &'static str {
        match self {
            Accumulator::General(_) => "general",
            Accumulator::Coverage(_) => "coverage",
            Accumulator::Strand(_) => "strand",
            Accumulator::RnaSeq(_) => "rnaseq",
        }
    }

    pub fn collect(&mut self, record: &Alignment, index: Option<&AnnotationIndex>) {
        match self {
            Accumulator::General(s) => s.collect(record, index),
            Accumulator::Coverage(s) => s.collect(record, index),
            Accumulator::Strand(s) => s.collect(record, index),
            Accumulator::RnaSeq(s) => s.collect(record, index),
        }
    }

    pub fn update(&mut self, other: &Accumulator) -> Result<()> {
        match (self, other) {
            (Accumulator::General(a), Accumulator::General(b)) => a.update(b),
            (Accumulator::Coverage(a), Accumulator::Coverage(b)) => a.update(b),
            (Accumulator::Strand(a), Accumulator::Strand(b)) => a.update(b),
            (Accumulator::RnaSeq(a), Accumulator::RnaSeq(b)) => a.update(b),
            (a, b) => {
                return Err(Error::Internal(format!(
                    "cannot merge {} statistics into {}",
                    b.kind(),
                    a.kind()
                )));
            }
        }
        Ok(())
    }

    pub fn finalize(&mut self) {
        match self {
            Accumulator::General(s) => s.finalize(),
            Accumulator::Coverage(s) => s.finalize(),
            Accumulator::Strand(s) => s.finalize(),
            Accumulator::RnaSeq(s) => s.finalize(),
        }
    }
}

/// Named accumulators, merged key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StatsMap {
    entries: BTreeMap<String, Accumulator>,
}

impl StatsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, stats: Accumulator) {
        self.entries.insert(name.into(), stats);
    }

    pub fn get(&self, name: &str) -> Option<&Accumulator> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn collect(&mut self, record: &Alignment, index: Option<&AnnotationIndex>) {
        for stats in self.entries.values_mut() {
            stats.collect(record, index);
        }
    }

    /// Fold `other` into `self`. Keys missing here are copied over.
    pub fn update(&mut self, other: &StatsMap) -> Result<()> {
        for (name, stats) in &other.entries {
            match self.entries.get_mut(name) {
                Some(mine) => mine.update(stats)?,
                None => {
                    self.entries.insert(name.clone(), stats.clone());
                }
            }
        }
        Ok(())
    }

    /// Drain `others` until every sender is gone, folding each map in.
    pub fn merge(&mut self, others: &Receiver<StatsMap>) -> Result<()> {
        for other in others.iter() {
            self.update(&other)?;
        }
        Ok(())
    }

    pub fn finalize(&mut self) {
        for stats in self.entries.values_mut() {
            stats.finalize();
        }
    }

    pub fn write_json<W: Write>(&self, mut out: W) -> Result<()> {
        serde_json::to_writer_pretty(&mut out, self)?;
        writeln!(out)?;
        Ok(())
    }
}

/// Round to six significant digits, the precision reported for ratios.
pub fn round_fraction(value: f64) -> f64 {
    if !value.is_finite() || value == 0.0 {
        return value;
    }
    format!("{:.5e}", value).parse().unwrap_or(value)
}

pub(crate) fn serialize_fraction<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_fraction(*value))
}

/// `numerator / denominator`, or zero when there is nothing to divide by.
pub(crate) fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
