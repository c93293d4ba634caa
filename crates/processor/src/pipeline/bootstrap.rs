//! Startup sequence
//!
//! Provisioning finishes (file written, synced and renamed) before the reader
//! is constructed, and the reader is connected before any stage is wired.
//! Any failure on the way aborts to `Terminated(Failure)`.

use catalog_etl_config::PipelineConfig;
use std::sync::Arc;
use tracing::info;

use super::orchestrator::{Pipeline, PipelineOptions, PipelineOutputs};
use super::state::{PipelineState, StateHandle};
use crate::error::{ProcessorError, Result};
use crate::kafka::{KafkaSource, KafkaSourceConfig};
use crate::metrics::PipelineMetrics;
use crate::provision::provision_trust_store;
use crate::transforms::{catalog_transforms, BuildFn, CatalogTables, DecodeFn, MapFn};

/// Pipeline running the catalogue transforms
pub type CatalogPipeline = Pipeline<DecodeFn, MapFn, BuildFn>;

/// Connected reader and the pipeline it feeds
pub struct Bootstrapped {
    pub source: Arc<KafkaSource>,
    pub pipeline: CatalogPipeline,
}

/// Provision trust material, connect the reader and wire the pipeline
pub async fn bootstrap(
    config: &PipelineConfig,
    outputs: PipelineOutputs,
    metrics: PipelineMetrics,
) -> Result<Bootstrapped> {
    let state = StateHandle::new();

    let trust_store = match provision_trust_store(config.kafka.trust_store.as_ref()).await {
        Ok(path) => path,
        Err(e) => {
            state.fail("trust store provisioning failed");
            return Err(ProcessorError::Provisioning(e));
        }
    };
    state.transition(PipelineState::Provisioned)?;
    info!(trust_store = ?trust_store, "Trust material ready");

    let source = match connect_source(config) {
        Ok(source) => source,
        Err(e) => {
            state.fail("stream reader construction failed");
            return Err(e);
        }
    };
    state.transition(PipelineState::Connected)?;

    let pipeline = Pipeline::new(
        catalog_transforms(CatalogTables::from(&config.sink)),
        outputs,
        PipelineOptions {
            publish_buffer: config.publish.buffer_size,
            ..PipelineOptions::from(&config.sink)
        },
        metrics,
        state,
    );

    Ok(Bootstrapped {
        source: Arc::new(source),
        pipeline,
    })
}

fn connect_source(config: &PipelineConfig) -> Result<KafkaSource> {
    let source = KafkaSource::new(KafkaSourceConfig::from(&config.kafka))?;
    source.connect()?;
    Ok(source)
}
