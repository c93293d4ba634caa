//! Run command - start the streaming pipeline
//!
//! The pipeline runs until the process receives Ctrl-C. The reader then stops
//! polling, the stages drain and the final counters are logged.

use anyhow::Context;
use catalog_etl_config::PipelineConfig;
use chrono::{DateTime, Utc};
use clap::Args;
use processor::dead_letter::{FileDeadLetterQueue, InMemoryDeadLetterQueue};
use processor::metrics::{MetricsRegistry, PipelineMetrics};
use processor::pipeline::{bootstrap, PipelineOutputs};
use processor::publish::{catalog_branches, InMemoryPublisher, PubSubPublisher};
use processor::sink::{InMemoryMutationSink, PostgresMutationSink, SinkIdentity, SinkWriter};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const INPUT_CAPACITY: usize = 1024;

/// Run the pipeline
#[derive(Args, Debug, Clone)]
pub struct RunCommand {
    /// Read from this instant (RFC 3339) instead of committed offsets
    #[arg(long, value_name = "TIMESTAMP")]
    pub start_read_timestamp: Option<DateTime<Utc>>,

    /// Keep mutations, publishes and dead letters in memory
    #[arg(long)]
    pub dry_run: bool,
}

impl RunCommand {
    pub async fn execute(&self, mut config: PipelineConfig) -> anyhow::Result<()> {
        if let Some(start) = self.start_read_timestamp {
            config.kafka.start_read_timestamp = Some(start);
        }
        config.validate().context("invalid configuration")?;

        let registry = MetricsRegistry::global();
        let metrics = registry.pipeline_metrics();
        let outputs = self.outputs(&config, &metrics)?;

        let bootstrapped = bootstrap(&config, outputs, metrics)
            .await
            .context("pipeline startup failed")?;

        let (tx, rx) = mpsc::channel(INPUT_CAPACITY);
        let source = bootstrapped.source.clone();
        let reader = tokio::spawn(async move { source.start(tx).await });

        let shutdown_source = bootstrapped.source.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, draining pipeline");
                    shutdown_source.close();
                }
                Err(e) => warn!(error = %e, "Could not listen for interrupt"),
            }
        });

        let report = bootstrapped.pipeline.run(rx).await?;

        let reader_result = reader.await;

        info!(
            records_read = report.records_read,
            mutations_written = report.mutations_written,
            sink_write_failures = report.sink_write_failures,
            dead_letters = report.dead_letters,
            published = report.published,
            publish_dropped = report.publish_dropped,
            "Pipeline stopped"
        );
        if let Ok(text) = registry.encode() {
            debug!(metrics = %text, "Final metrics");
        }

        match reader_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Stream reader stopped with an error");
                Err(e).context("stream reader failed")
            }
            Err(e) => {
                error!(error = %e, "Stream reader task failed");
                Err(e).context("stream reader task did not complete")
            }
        }
    }

    fn outputs(
        &self,
        config: &PipelineConfig,
        metrics: &PipelineMetrics,
    ) -> anyhow::Result<PipelineOutputs> {
        let identity = SinkIdentity::from(&config.sink);
        let branches = catalog_branches(&config.publish);

        if self.dry_run {
            info!("Dry run: sink, topics and dead letters kept in memory");
            return Ok(PipelineOutputs {
                sink: SinkWriter::new(
                    Arc::new(InMemoryMutationSink::new()),
                    identity,
                    metrics.clone(),
                ),
                publisher: Arc::new(InMemoryPublisher::new()),
                branches,
                dead_letters: Arc::new(InMemoryDeadLetterQueue::new()),
            });
        }

        let sink = PostgresMutationSink::connect_lazy(&config.sink, identity.clone())
            .context("configuring sink")?;
        let publisher = PubSubPublisher::new(&config.publish).context("configuring publisher")?;
        let dead_letters =
            FileDeadLetterQueue::new(&config.dead_letter).context("opening dead-letter queue")?;

        Ok(PipelineOutputs {
            sink: SinkWriter::new(Arc::new(sink), identity, metrics.clone()),
            publisher: Arc::new(publisher),
            branches,
            dead_letters: Arc::new(dead_letters),
        })
    }
}
