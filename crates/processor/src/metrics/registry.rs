//! Registry of the pipeline counters
//!
//! One registry backs the process: the pipeline counters are registered into
//! it the first time they are requested and shared afterwards, so a second
//! pipeline built in the same process reports into the same series instead of
//! registering duplicates.

use parking_lot::RwLock;
use prometheus_client::registry::Registry;
use std::sync::{Arc, OnceLock};

use super::{MetricsError, PipelineMetrics};

static GLOBAL: OnceLock<Arc<MetricsRegistry>> = OnceLock::new();

const PREFIX: &str = "catalog_etl";

/// Prometheus registry holding the `catalog_etl_*` series
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<RwLock<Registry>>,
    pipeline: Arc<OnceLock<PipelineMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::with_prefix(PREFIX))),
            pipeline: Arc::new(OnceLock::new()),
        }
    }

    /// Process-wide registry
    pub fn global() -> Arc<MetricsRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(MetricsRegistry::new()))
            .clone()
    }

    /// Pipeline counters of this registry, registered on first use
    pub fn pipeline_metrics(&self) -> PipelineMetrics {
        self.pipeline
            .get_or_init(|| {
                let metrics = PipelineMetrics::default();
                metrics.register(&mut self.registry.write());
                metrics
            })
            .clone()
    }

    /// Render every registered series in the Prometheus text format
    pub fn encode(&self) -> Result<String, MetricsError> {
        let registry = self.registry.read();
        let mut buffer = String::new();

        prometheus_client::encoding::text::encode(&mut buffer, &registry)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        Ok(buffer)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{OutcomeLabel, StageLabel};

    #[test]
    fn test_empty_registry_encodes() {
        let registry = MetricsRegistry::new();
        let text = registry.encode().unwrap();
        assert!(!text.contains("catalog_etl_records_read"));
    }

    #[test]
    fn test_global_registry_is_shared() {
        let first = MetricsRegistry::global();
        let second = MetricsRegistry::global();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_pipeline_metrics_registered_once() {
        let registry = MetricsRegistry::new();
        let first = registry.pipeline_metrics();
        let second = registry.clone().pipeline_metrics();

        first.record_read();
        second.record_read();
        second.record_stage(StageLabel::Decode, OutcomeLabel::Success);

        assert_eq!(first.records_read(), 2);
        let text = registry.encode().unwrap();
        assert_eq!(text.matches("# TYPE catalog_etl_records_read counter").count(), 1);
        assert!(text.contains("catalog_etl_records_read_total 2"));
    }
}
