//! Failure-aware transform pipeline
//!
//! - [`stage`]: the generic two-output stage and its channel driver
//! - [`state`]: lifecycle states and checked transitions
//! - [`orchestrator`]: wiring of stages, sink, publish branches and dead letters
//! - [`bootstrap`]: provisioning, reader construction and wiring, in order
//!
//! # Example
//!
//! ```rust,no_run
//! use processor::dead_letter::InMemoryDeadLetterQueue;
//! use processor::metrics::PipelineMetrics;
//! use processor::pipeline::{
//!     Pipeline, PipelineOptions, PipelineOutputs, PipelineState, StateHandle,
//! };
//! use processor::publish::InMemoryPublisher;
//! use processor::sink::{InMemoryMutationSink, SinkIdentity, SinkWriter};
//! use processor::transforms::{catalog_transforms, CatalogTables};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let metrics = PipelineMetrics::default();
//! let state = StateHandle::new();
//! state.transition(PipelineState::Provisioned)?;
//! state.transition(PipelineState::Connected)?;
//!
//! let outputs = PipelineOutputs {
//!     sink: SinkWriter::new(
//!         Arc::new(InMemoryMutationSink::new()),
//!         SinkIdentity::new("catalog", "main", "products"),
//!         metrics.clone(),
//!     ),
//!     publisher: Arc::new(InMemoryPublisher::new()),
//!     branches: Vec::new(),
//!     dead_letters: Arc::new(InMemoryDeadLetterQueue::new()),
//! };
//!
//! let pipeline = Pipeline::new(
//!     catalog_transforms(CatalogTables::default()),
//!     outputs,
//!     PipelineOptions::default(),
//!     metrics,
//!     state,
//! );
//!
//! let (tx, rx) = mpsc::channel(16);
//! drop(tx);
//! let report = pipeline.run(rx).await?;
//! println!("{:?}", report);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod orchestrator;
pub mod stage;
pub mod state;

pub use bootstrap::{bootstrap, Bootstrapped, CatalogPipeline};
pub use orchestrator::{
    Pipeline, PipelineOptions, PipelineOutputs, PipelineReport, PipelineTransforms,
};
pub use stage::{
    format_stacktrace, run_stage, BatchOutput, FailsafeStage, StageChannels, StageOutput,
};
pub use state::{PipelineState, StateHandle, Termination};
