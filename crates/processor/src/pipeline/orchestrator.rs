//! Pipeline orchestrator
//!
//! Wires the record flow into one task per stage:
//!
//! ```text
//! input -> ingest -> decode -+-> map -> build -> sink batcher -> sink
//!                            |     \        \
//!                            |      dlq      dlq
//!                            +-> publish branch (one task per topic)
//!                  \
//!                   dlq
//! ```
//!
//! Stages talk through bounded channels. Each publish branch has its own
//! bounded buffer filled without waiting: while a topic is stalled its buffer
//! fills up and further events for it are dropped and counted, so the sink
//! path and the other branches keep moving. Every failure channel is drained
//! into the dead-letter queue. The run ends when the input closes and every
//! task has drained.

use catalog_etl_config::SinkConfig;
use catalog_etl_types::{
    CatalogEvent, FailsafeElement, MutationDescriptor, RawMessage, TableRow,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::stage::{run_stage, FailsafeStage, StageChannels};
use super::state::{PipelineState, StateHandle, Termination};
use crate::dead_letter::{DeadLetterQueue, DeadLetterRecord};
use crate::error::{DecodeError, MappingError, MutationBuildError, ProcessorError, Result};
use crate::metrics::{OutcomeLabel, PipelineMetrics, StageLabel};
use crate::publish::{run_branch, EventPublisher, PublishBranch};
use crate::sink::SinkWriter;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The three pluggable conversions of the pipeline
pub struct PipelineTransforms<D, M, B> {
    /// Raw record to structured event
    pub decode: D,
    /// Structured event to sink rows
    pub map: M,
    /// One sink row to one mutation
    pub build: B,
}

/// Where the pipeline sends its results
#[derive(Clone)]
pub struct PipelineOutputs {
    pub sink: SinkWriter,
    pub publisher: Arc<dyn EventPublisher>,
    pub branches: Vec<PublishBranch>,
    pub dead_letters: Arc<dyn DeadLetterQueue>,
}

/// Channel sizing and sink batching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub channel_capacity: usize,
    /// Events buffered per publish branch before new ones are dropped
    pub publish_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            publish_buffer: DEFAULT_CHANNEL_CAPACITY,
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl From<&SinkConfig> for PipelineOptions {
    fn from(config: &SinkConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
            ..Default::default()
        }
    }
}

/// Counters of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub records_read: u64,
    pub decoded: u64,
    pub decode_failures: u64,
    pub mapped: u64,
    pub map_failures: u64,
    pub mutations_built: u64,
    pub build_failures: u64,
    pub mutations_written: u64,
    pub sink_write_failures: u64,
    pub dead_letters: u64,
    pub published: u64,
    pub publish_dropped: u64,
}

/// A wired, runnable pipeline
pub struct Pipeline<D, M, B> {
    transforms: PipelineTransforms<D, M, B>,
    outputs: PipelineOutputs,
    options: PipelineOptions,
    metrics: PipelineMetrics,
    state: StateHandle,
}

impl<D, M, B> Pipeline<D, M, B>
where
    D: Fn(&RawMessage) -> std::result::Result<CatalogEvent, DecodeError> + Send + 'static,
    M: Fn(&CatalogEvent) -> std::result::Result<Vec<TableRow>, MappingError> + Send + 'static,
    B: Fn(&TableRow) -> std::result::Result<MutationDescriptor, MutationBuildError>
        + Send
        + 'static,
{
    pub fn new(
        transforms: PipelineTransforms<D, M, B>,
        outputs: PipelineOutputs,
        options: PipelineOptions,
        metrics: PipelineMetrics,
        state: StateHandle,
    ) -> Self {
        Self {
            transforms,
            outputs,
            options,
            metrics,
            state,
        }
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Process records from `input` until it closes
    ///
    /// The pipeline must be `Connected`; it is `Running` while records flow and
    /// `Terminated` once this returns.
    pub async fn run(self, input: mpsc::Receiver<RawMessage>) -> Result<PipelineReport> {
        let Pipeline {
            transforms,
            outputs,
            options,
            metrics,
            state,
        } = self;
        let capacity = options.channel_capacity.max(1);

        state.transition(PipelineState::Running)?;
        info!(
            branches = outputs.branches.len(),
            batch_size = options.batch_size,
            sink = %outputs.sink.identity(),
            "Pipeline running"
        );

        let mut tasks: Vec<(&'static str, JoinHandle<u64>)> = Vec::new();

        // Dead-letter drains
        let (decode_fail_tx, decode_fail_rx) = mpsc::channel(capacity);
        let (map_fail_tx, map_fail_rx) = mpsc::channel(capacity);
        let (build_fail_tx, build_fail_rx) = mpsc::channel(capacity);
        tasks.push((
            "decode_dead_letters",
            tokio::spawn(drain_failures::<RawMessage, RawMessage>(
                StageLabel::Decode,
                decode_fail_rx,
                outputs.dead_letters.clone(),
                metrics.clone(),
            )),
        ));
        tasks.push((
            "map_dead_letters",
            tokio::spawn(drain_failures::<RawMessage, CatalogEvent>(
                StageLabel::Map,
                map_fail_rx,
                outputs.dead_letters.clone(),
                metrics.clone(),
            )),
        ));
        tasks.push((
            "build_dead_letters",
            tokio::spawn(drain_failures::<RawMessage, TableRow>(
                StageLabel::BuildMutation,
                build_fail_rx,
                outputs.dead_letters.clone(),
                metrics.clone(),
            )),
        ));

        // Publish branches
        let mut branch_txs = Vec::with_capacity(outputs.branches.len());
        for branch in outputs.branches.iter().cloned() {
            let (tx, rx) = mpsc::channel(options.publish_buffer.max(1));
            branch_txs.push(BranchSender {
                topic: branch.topic().to_string(),
                tx,
            });
            tasks.push((
                "publish",
                tokio::spawn(run_branch(
                    branch,
                    outputs.publisher.clone(),
                    rx,
                    metrics.clone(),
                )),
            ));
        }

        // Record path
        let (decode_tx, decode_rx) = mpsc::channel(capacity);
        let (decoded_tx, decoded_rx) = mpsc::channel(capacity);
        let (map_tx, map_rx) = mpsc::channel(capacity);
        let (mapped_tx, mapped_rx) = mpsc::channel(capacity);
        let (mutation_tx, mutation_rx) = mpsc::channel(capacity);

        tasks.push((
            "sink",
            tokio::spawn(run_sink_batcher(
                mutation_rx,
                outputs.sink.clone(),
                options.batch_size.max(1),
                options.flush_interval,
            )),
        ));
        tasks.push((
            "build",
            tokio::spawn(run_build_stage(
                FailsafeStage::new(StageLabel::BuildMutation, transforms.build),
                mapped_rx,
                mutation_tx,
                build_fail_tx,
                metrics.clone(),
            )),
        ));
        tasks.push((
            "map",
            tokio::spawn(run_stage(
                FailsafeStage::new(StageLabel::Map, transforms.map),
                StageChannels {
                    input: map_rx,
                    success: mapped_tx,
                    failure: map_fail_tx,
                },
                metrics.clone(),
            )),
        ));
        tasks.push((
            "fan_out",
            tokio::spawn(fan_out(decoded_rx, map_tx, branch_txs, metrics.clone())),
        ));
        tasks.push((
            "decode",
            tokio::spawn(run_stage(
                FailsafeStage::new(StageLabel::Decode, transforms.decode),
                StageChannels {
                    input: decode_rx,
                    success: decoded_tx,
                    failure: decode_fail_tx,
                },
                metrics.clone(),
            )),
        ));
        tasks.push((
            "ingest",
            tokio::spawn(ingest(input, decode_tx, metrics.clone())),
        ));

        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let results = join_all(handles).await;

        let mut published = 0;
        let mut publish_dropped = 0;
        let mut failed_task = None;
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(count) => {
                    debug!(task = name, count, "Pipeline task finished");
                    match name {
                        "publish" => published += count,
                        "fan_out" => publish_dropped = count,
                        _ => {}
                    }
                }
                Err(e) => {
                    error!(task = name, error = %e, "Pipeline task failed");
                    failed_task.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failed_task {
            state.fail("pipeline task failed");
            return Err(ProcessorError::Execution {
                source: Box::new(e),
            });
        }

        let report = PipelineReport {
            records_read: metrics.records_read(),
            decoded: metrics.stage_count(StageLabel::Decode, OutcomeLabel::Success),
            decode_failures: metrics.stage_count(StageLabel::Decode, OutcomeLabel::Failure),
            mapped: metrics.stage_count(StageLabel::Map, OutcomeLabel::Success),
            map_failures: metrics.stage_count(StageLabel::Map, OutcomeLabel::Failure),
            mutations_built: metrics
                .stage_count(StageLabel::BuildMutation, OutcomeLabel::Success),
            build_failures: metrics
                .stage_count(StageLabel::BuildMutation, OutcomeLabel::Failure),
            mutations_written: metrics.mutations_written(),
            sink_write_failures: metrics.sink_write_failures(),
            dead_letters: metrics.dead_letters(),
            published,
            publish_dropped,
        };

        state.transition(PipelineState::Terminated(Termination::Success))?;
        info!(report = ?report, "Pipeline finished");
        Ok(report)
    }
}

/// Wrap each raw record in an envelope whose original payload is the record
async fn ingest(
    mut input: mpsc::Receiver<RawMessage>,
    output: mpsc::Sender<FailsafeElement<RawMessage, RawMessage>>,
    metrics: PipelineMetrics,
) -> u64 {
    let mut read = 0;
    while let Some(raw) = input.recv().await {
        read += 1;
        metrics.record_read();
        if output.send(FailsafeElement::entering(raw)).await.is_err() {
            warn!("Decode stage closed, stopping ingest");
            break;
        }
    }
    debug!(read, "Input closed");
    read
}

/// Input of one publish branch
struct BranchSender {
    topic: String,
    tx: mpsc::Sender<Arc<CatalogEvent>>,
}

/// Send every decoded event to the map stage and to each publish branch
///
/// Branch buffers are filled without waiting; an event that finds a buffer
/// full is dropped for that branch. Returns the number of dropped events.
async fn fan_out(
    mut input: mpsc::Receiver<FailsafeElement<RawMessage, CatalogEvent>>,
    map: mpsc::Sender<FailsafeElement<RawMessage, CatalogEvent>>,
    branches: Vec<BranchSender>,
    metrics: PipelineMetrics,
) -> u64 {
    let mut dropped = 0;
    while let Some(element) = input.recv().await {
        if !branches.is_empty() {
            let event = Arc::new(element.payload().clone());
            for branch in &branches {
                match branch.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        metrics.record_publish(&branch.topic, OutcomeLabel::Dropped);
                        warn!(
                            topic = %branch.topic,
                            product_id = %event.id,
                            "Publish buffer full, event dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!(
                            topic = %branch.topic,
                            product_id = %event.id,
                            "Publish branch closed, event not published"
                        );
                    }
                }
            }
        }

        if map.send(element).await.is_err() {
            warn!("Map stage closed, element discarded");
        }
    }
    dropped
}

/// Build one mutation per row; rows of one event fail independently
async fn run_build_stage<B>(
    stage: FailsafeStage<B>,
    mut input: mpsc::Receiver<FailsafeElement<RawMessage, Vec<TableRow>>>,
    mutations: mpsc::Sender<MutationDescriptor>,
    failures: mpsc::Sender<FailsafeElement<RawMessage, TableRow>>,
    metrics: PipelineMetrics,
) -> u64
where
    B: Fn(&TableRow) -> std::result::Result<MutationDescriptor, MutationBuildError>,
{
    let mut built = 0;

    while let Some(element) = input.recv().await {
        let (original, rows) = element.into_parts();
        let output = stage.apply_all(
            rows.into_iter()
                .map(|row| FailsafeElement::of(original.clone(), row)),
        );

        for failed in output.failures {
            metrics.record_stage(StageLabel::BuildMutation, OutcomeLabel::Failure);
            if failures.send(failed).await.is_err() {
                warn!("Build failure channel closed, element discarded");
            }
        }

        for ok in output.successes {
            built += 1;
            metrics.record_stage(StageLabel::BuildMutation, OutcomeLabel::Success);
            let (_, mutation) = ok.into_parts();
            if mutations.send(mutation).await.is_err() {
                warn!("Sink channel closed, mutation discarded");
            }
        }
    }

    built
}

/// Group mutations into batches by size or age and hand them to the writer
async fn run_sink_batcher(
    mut input: mpsc::Receiver<MutationDescriptor>,
    writer: SinkWriter,
    batch_size: usize,
    flush_interval: Duration,
) -> u64 {
    let mut batch = Vec::with_capacity(batch_size);
    let mut batches = 0;
    let mut ticker = tokio::time::interval(flush_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = input.recv() => match next {
                Some(mutation) => {
                    batch.push(mutation);
                    if batch.len() >= batch_size {
                        writer.write(&batch).await;
                        batch.clear();
                        batches += 1;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    writer.write(&batch).await;
                    batch.clear();
                    batches += 1;
                }
            }
        }
    }

    if !batch.is_empty() {
        writer.write(&batch).await;
        batches += 1;
    }

    batches
}

/// Write every failure envelope of a stage to the dead-letter queue
async fn drain_failures<O, C>(
    stage: StageLabel,
    mut input: mpsc::Receiver<FailsafeElement<O, C>>,
    queue: Arc<dyn DeadLetterQueue>,
    metrics: PipelineMetrics,
) -> u64
where
    O: Serialize,
    C: Serialize,
{
    let mut written = 0;

    while let Some(failed) = input.recv().await {
        let result = match DeadLetterRecord::from_failure(stage.as_str(), &failed) {
            Ok(record) => queue.add(record).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                written += 1;
                metrics.record_dead_letter();
                warn!(
                    stage = %stage,
                    error = failed.error_message().unwrap_or_default(),
                    "Record dead-lettered"
                );
            }
            Err(e) => {
                metrics.record_dead_letter_failure();
                error!(
                    stage = %stage,
                    error = %e,
                    cause = e.source().map(|s| s.to_string()).unwrap_or_default(),
                    record_error = failed.error_message().unwrap_or_default(),
                    "Failed to write dead letter, record lost"
                );
            }
        }
    }

    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::InMemoryDeadLetterQueue;
    use crate::sink::{InMemoryMutationSink, SinkIdentity};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    fn mutation(id: &str) -> MutationDescriptor {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), id.to_string());
        MutationDescriptor::insert_or_update("Product", vec!["id".to_string()], values)
    }

    #[tokio::test]
    async fn test_sink_batcher_flushes_on_size_and_close() {
        let sink = InMemoryMutationSink::new();
        let writer = SinkWriter::new(
            Arc::new(sink.clone()),
            SinkIdentity::new("p", "i", "d"),
            PipelineMetrics::default(),
        );
        let (tx, rx) = mpsc::channel(16);
        for id in ["a", "b", "c", "d", "e"] {
            tx.send(mutation(id)).await.unwrap();
        }
        drop(tx);

        let batches = run_sink_batcher(rx, writer, 2, Duration::from_secs(3600)).await;

        assert_eq!(batches, 3);
        assert_eq!(sink.applied_batches(), vec![2, 2, 1]);
        assert_eq!(sink.row_count("Product"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_batcher_flushes_on_interval() {
        let sink = InMemoryMutationSink::new();
        let writer = SinkWriter::new(
            Arc::new(sink.clone()),
            SinkIdentity::new("p", "i", "d"),
            PipelineMetrics::default(),
        );
        let (tx, rx) = mpsc::channel(16);
        let handle =
            tokio::spawn(run_sink_batcher(rx, writer, 100, Duration::from_millis(50)));

        tx.send(mutation("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(sink.applied_batches(), vec![1]);

        drop(tx);
        assert_eq!(handle.await.unwrap(), 1);
    }

    struct BrokenQueue;

    #[async_trait]
    impl DeadLetterQueue for BrokenQueue {
        async fn add(&self, _record: DeadLetterRecord) -> crate::dead_letter::Result<()> {
            Err(crate::error::DeadLetterError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }

        async fn list_all(
            &self,
            _offset: usize,
            _limit: usize,
        ) -> crate::dead_letter::Result<Vec<DeadLetterRecord>> {
            Ok(Vec::new())
        }

        async fn stats(
            &self,
        ) -> crate::dead_letter::Result<crate::dead_letter::DeadLetterStats> {
            Ok(Default::default())
        }
    }

    #[tokio::test]
    async fn test_dead_letter_failure_is_counted_not_fatal() {
        let metrics = PipelineMetrics::default();
        let (tx, rx) = mpsc::channel(4);
        tx.send(
            FailsafeElement::entering(RawMessage::new(Some("k"), "not-json"))
                .with_error_message("bad")
                .with_stacktrace("trace"),
        )
        .await
        .unwrap();
        drop(tx);

        let written =
            drain_failures(StageLabel::Decode, rx, Arc::new(BrokenQueue), metrics.clone()).await;

        assert_eq!(written, 0);
        assert_eq!(metrics.dead_letters(), 0);
    }

    #[tokio::test]
    async fn test_drain_failures_writes_records() {
        let queue = InMemoryDeadLetterQueue::new();
        let metrics = PipelineMetrics::default();
        let (tx, rx) = mpsc::channel(4);
        tx.send(
            FailsafeElement::entering(RawMessage::new(Some("k"), "not-json"))
                .with_error_message("bad")
                .with_stacktrace("trace"),
        )
        .await
        .unwrap();
        drop(tx);

        let queue_ref: Arc<dyn DeadLetterQueue> = Arc::new(queue.clone());
        let written = drain_failures(StageLabel::Decode, rx, queue_ref, metrics.clone()).await;

        assert_eq!(written, 1);
        assert_eq!(metrics.dead_letters(), 1);
        let record = &queue.records()[0];
        assert_eq!(record.stage, "decode");
        assert_eq!(record.original_payload["value"], "not-json");
    }

    #[test]
    fn test_options_from_sink_config() {
        let config = SinkConfig {
            batch_size: 0,
            flush_interval_ms: 250,
            ..Default::default()
        };
        let options = PipelineOptions::from(&config);
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.flush_interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_fan_out_drops_when_publish_buffer_is_full() {
        let metrics = PipelineMetrics::default();
        let (input_tx, input_rx) = mpsc::channel(16);
        let (map_tx, mut map_rx) = mpsc::channel(16);
        let (stalled_tx, mut stalled_rx) = mpsc::channel(2);
        let (open_tx, mut open_rx) = mpsc::channel(16);
        let branches = vec![
            BranchSender {
                topic: "projects/shop/topics/stalled".to_string(),
                tx: stalled_tx,
            },
            BranchSender {
                topic: "projects/shop/topics/open".to_string(),
                tx: open_tx,
            },
        ];

        for i in 0..10 {
            let raw = RawMessage::new(Some("k"), "{}");
            let event =
                CatalogEvent::new(catalog_etl_types::OperationType::Create, format!("SKU{}", i));
            input_tx.send(FailsafeElement::of(raw, event)).await.unwrap();
        }
        drop(input_tx);

        let dropped = fan_out(input_rx, map_tx, branches, metrics.clone()).await;

        assert_eq!(dropped, 8);
        assert_eq!(
            metrics.published("projects/shop/topics/stalled", OutcomeLabel::Dropped),
            8
        );
        assert_eq!(metrics.published("projects/shop/topics/open", OutcomeLabel::Dropped), 0);

        let mut mapped = 0;
        while map_rx.recv().await.is_some() {
            mapped += 1;
        }
        assert_eq!(mapped, 10);

        let mut open = 0;
        while open_rx.recv().await.is_some() {
            open += 1;
        }
        assert_eq!(open, 10);

        let mut stalled = Vec::new();
        while let Some(event) = stalled_rx.recv().await {
            stalled.push(event.id.clone());
        }
        assert_eq!(stalled, vec!["SKU0".to_string(), "SKU1".to_string()]);
    }
}
