//! Streaming ETL for product-catalogue change events
//!
//! Records read from a Kafka-compatible log are decoded, mapped to sink rows
//! and turned into insert-or-update mutations by failable stages. Each stage
//! splits its output into a success stream and a failure stream; failures land
//! in the dead-letter queue while the pipeline keeps running. Decoded events
//! are also published to one pub/sub topic per projection.

pub mod dead_letter;
pub mod error;
pub mod kafka;
pub mod metrics;
pub mod pipeline;
pub mod provision;
pub mod publish;
pub mod sink;
pub mod transforms;

pub use error::{
    DeadLetterError, DecodeError, MappingError, MutationBuildError, ProcessorError,
    ProvisioningError, PublishError, Result as ProcessorResult, SinkWriteError,
};

pub use dead_letter::{
    DeadLetterQueue, DeadLetterRecord, DeadLetterStats, FileDeadLetterQueue,
    InMemoryDeadLetterQueue,
};

pub use kafka::{KafkaError, KafkaSource, KafkaSourceConfig, KafkaSourceMetrics, StartTimeFilter};

pub use metrics::{MetricsRegistry, OutcomeLabel, PipelineMetrics, StageLabel};

pub use pipeline::{
    bootstrap, Bootstrapped, CatalogPipeline, FailsafeStage, Pipeline, PipelineOptions,
    PipelineOutputs, PipelineReport, PipelineState, PipelineTransforms, StageOutput,
    StateHandle, Termination,
};

pub use provision::{provision_trust_store, TrustStoreProvisioner};

pub use publish::{
    catalog_branches, EventPublisher, InMemoryPublisher, PubSubPublisher, PublishBranch,
    TopicName,
};

pub use sink::{
    InMemoryMutationSink, MutationSink, PostgresMutationSink, SinkIdentity, SinkWriter,
};

pub use transforms::{catalog_transforms, CatalogTables, MutationBuilder, TableSchema};
