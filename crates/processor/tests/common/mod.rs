//! Common test utilities for integration tests

#![allow(dead_code)]

use catalog_etl_config::PublishConfig;
use catalog_etl_types::RawMessage;
use processor::dead_letter::InMemoryDeadLetterQueue;
use processor::metrics::PipelineMetrics;
use processor::pipeline::{
    CatalogPipeline, Pipeline, PipelineOptions, PipelineOutputs, PipelineReport, PipelineState,
    StateHandle,
};
use processor::publish::{
    catalog_branches, EventPublisher, InMemoryPublisher, PublishBranch, TopicName,
};
use processor::sink::{InMemoryMutationSink, SinkIdentity, SinkWriter};
use processor::transforms::{catalog_transforms, CatalogTables};
use processor::ProcessorResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// In-memory collaborators of a pipeline under test
pub struct TestHarness {
    pub sink: InMemoryMutationSink,
    pub publisher: InMemoryPublisher,
    pub dead_letters: InMemoryDeadLetterQueue,
    pub metrics: PipelineMetrics,
    pub state: StateHandle,
    pub branches: Vec<PublishBranch>,
}

impl TestHarness {
    pub fn new() -> Self {
        let state = StateHandle::new();
        state
            .transition(PipelineState::Provisioned)
            .expect("provisioned");
        state.transition(PipelineState::Connected).expect("connected");

        Self {
            sink: InMemoryMutationSink::new(),
            publisher: InMemoryPublisher::new(),
            dead_letters: InMemoryDeadLetterQueue::new(),
            metrics: PipelineMetrics::default(),
            state,
            branches: catalog_branches(&publish_config()),
        }
    }

    pub fn create_topic(&self) -> &TopicName {
        self.branches[0].topic()
    }

    pub fn update_topic(&self) -> &TopicName {
        self.branches[1].topic()
    }

    /// Catalogue pipeline wired to the in-memory collaborators
    pub fn pipeline(&self, tables: CatalogTables, options: PipelineOptions) -> CatalogPipeline {
        self.pipeline_with_publisher(Arc::new(self.publisher.clone()), tables, options)
    }

    /// Catalogue pipeline publishing through `publisher` instead
    pub fn pipeline_with_publisher(
        &self,
        publisher: Arc<dyn EventPublisher>,
        tables: CatalogTables,
        options: PipelineOptions,
    ) -> CatalogPipeline {
        let outputs = PipelineOutputs {
            sink: SinkWriter::new(
                Arc::new(self.sink.clone()),
                SinkIdentity::new("catalog", "catalog-instance", "catalog"),
                self.metrics.clone(),
            ),
            publisher,
            branches: self.branches.clone(),
            dead_letters: Arc::new(self.dead_letters.clone()),
        };

        Pipeline::new(
            catalog_transforms(tables),
            outputs,
            options,
            self.metrics.clone(),
            self.state.clone(),
        )
    }

    /// Run the default catalogue pipeline over `records`
    pub async fn run(&self, records: Vec<RawMessage>) -> ProcessorResult<PipelineReport> {
        let (tx, rx) = mpsc::channel(records.len().max(1));
        for record in records {
            tx.send(record).await.expect("pipeline input open");
        }
        drop(tx);

        self.pipeline(CatalogTables::default(), small_batches())
            .run(rx)
            .await
    }

    /// Start the default pipeline and return its input
    pub fn spawn(
        &self,
        options: PipelineOptions,
    ) -> (
        mpsc::Sender<RawMessage>,
        JoinHandle<ProcessorResult<PipelineReport>>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let pipeline = self.pipeline(CatalogTables::default(), options);
        (tx, tokio::spawn(pipeline.run(rx)))
    }
}

pub fn publish_config() -> PublishConfig {
    PublishConfig {
        project: "shop".to_string(),
        create_topic: "product-created".to_string(),
        update_topic: "product-updated".to_string(),
        ..Default::default()
    }
}

/// Write every mutation as soon as it is built
pub fn small_batches() -> PipelineOptions {
    PipelineOptions {
        channel_capacity: 16,
        publish_buffer: 16,
        batch_size: 1,
        flush_interval: Duration::from_millis(10),
    }
}

pub fn record(key: &str, value: &str) -> RawMessage {
    RawMessage::new(Some(key), value)
}

/// Poll `condition` until it holds or a second has passed
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
