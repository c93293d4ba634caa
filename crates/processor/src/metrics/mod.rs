//! Prometheus metrics for the catalogue pipeline
//!
//! Counters are registered once with a [`MetricsRegistry`] and encoded in the
//! Prometheus text format on demand.

mod labels;
mod pipeline_metrics;
mod registry;

pub use labels::{OutcomeLabel, StageLabel, StageLabels, TopicLabels};
pub use pipeline_metrics::PipelineMetrics;
pub use registry::MetricsRegistry;

use thiserror::Error;

/// Errors that can occur in the metrics subsystem
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metric encoding error: {0}")]
    EncodingError(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
