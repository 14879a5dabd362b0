pub mod alignment;
pub mod annotation;
pub mod classify;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod stats;

pub use alignment::Alignment;
pub use alignment::bam::BamSource;
pub use annotation::{AnnotationIndex, Feature, FeatureReader, IndexOptions};
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::PipelineOptions;
pub use stats::StatsMap;
