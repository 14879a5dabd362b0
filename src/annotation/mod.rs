//! Gene annotation loading and interval lookup.

pub mod derive;
pub mod feature;
pub mod index;
pub mod reader;
pub mod tree;

use std::collections::HashMap;

pub use feature::{Feature, Strand, Tags, compare_chromosomes, labels};
pub use index::{AnnotationIndex, ChromosomeIndex, IndexOptions};
pub use reader::{AnnotationFormat, FeatureReader};
pub use tree::IntervalTree;

/// Reference sequence lengths keyed by chromosome name, usually taken from
/// the alignment header.
pub type ChromosomeLengths = HashMap<String, u64>;
