//! Kafka source reader
//!
//! Reads key/value records from the configured topics and forwards them to the
//! pipeline as [`RawMessage`]s. Keys and values are converted to text lossily:
//! invalid UTF-8 sequences become U+FFFD so a bad byte never stops the reader.
//!
//! Without a start timestamp the reader joins its consumer group and resumes
//! from committed offsets. With one it resolves, per partition, the first
//! offset at or after the timestamp, assigns those partitions explicitly and
//! additionally drops any record stamped before the start, since log order and
//! timestamp order may differ.

use catalog_etl_config::{KafkaConfig, TrustStoreType};
use catalog_etl_types::RawMessage;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError as RdKafkaError, KafkaResult};
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::error::{KafkaError, Result};

/// Default poll timeout for the consumer
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Default backoff after a failed poll
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Default timeout for metadata and offset lookups
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS settings derived from the provisioned trust store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// File format of the trust store
    pub store_type: TrustStoreType,
    /// Local path the trust store was provisioned to
    pub location: PathBuf,
    /// Password (PKCS#12 only)
    pub password: Option<String>,
}

/// Configuration for the Kafka source reader
#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Consumer group ID
    pub group_id: String,
    /// Topics to read
    pub topics: Vec<String>,
    /// Let the client commit offsets
    pub enable_auto_commit: bool,
    /// Offset reset policy without committed offsets
    pub auto_offset_reset: String,
    /// Read from this instant instead of committed offsets
    pub start_read_timestamp: Option<DateTime<Utc>>,
    /// TLS connection settings
    pub tls: Option<TlsSettings>,
    /// Additional consumer configuration
    pub extra_config: HashMap<String, String>,
    /// Poll timeout
    pub poll_timeout: Duration,
    /// Backoff after a failed poll
    pub retry_backoff: Duration,
    /// Metadata and offset lookup timeout
    pub metadata_timeout: Duration,
}

impl Default for KafkaSourceConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "catalog-etl".to_string(),
            topics: vec![],
            enable_auto_commit: true,
            auto_offset_reset: "earliest".to_string(),
            start_read_timestamp: None,
            tls: None,
            extra_config: HashMap::new(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
        }
    }
}

impl From<&KafkaConfig> for KafkaSourceConfig {
    fn from(config: &KafkaConfig) -> Self {
        let tls = config.trust_store.as_ref().map(|ts| TlsSettings {
            store_type: ts.store_type,
            location: ts.local_path.clone(),
            password: ts.password.clone(),
        });

        Self {
            brokers: config.brokers(),
            group_id: config.group_id.clone(),
            topics: config.topics.clone(),
            enable_auto_commit: config.enable_auto_commit,
            auto_offset_reset: config.auto_offset_reset.clone(),
            start_read_timestamp: config.start_read_timestamp,
            tls,
            ..Default::default()
        }
    }
}

impl KafkaSourceConfig {
    /// Build the librdkafka client configuration
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", self.enable_auto_commit.to_string())
            .set("auto.offset.reset", &self.auto_offset_reset);

        if let Some(tls) = &self.tls {
            let location = tls.location.to_string_lossy().into_owned();
            client_config.set("security.protocol", "ssl");
            match tls.store_type {
                TrustStoreType::Pem => {
                    client_config.set("ssl.ca.location", location);
                }
                TrustStoreType::Pkcs12 => {
                    client_config.set("ssl.keystore.location", location);
                    if let Some(password) = &tls.password {
                        client_config.set("ssl.keystore.password", password);
                    }
                }
            }
        }

        for (key, value) in &self.extra_config {
            client_config.set(key, value);
        }

        client_config
    }
}

/// Drops records stamped before the configured start instant
#[derive(Debug, Clone, Copy, Default)]
pub struct StartTimeFilter {
    start: Option<DateTime<Utc>>,
}

impl StartTimeFilter {
    pub fn new(start: Option<DateTime<Utc>>) -> Self {
        Self { start }
    }

    /// Whether a record should be forwarded
    ///
    /// Records without a log timestamp are always forwarded.
    pub fn accepts(&self, message: &RawMessage) -> bool {
        match (self.start, message.timestamp) {
            (Some(start), Some(ts)) => ts >= start,
            _ => true,
        }
    }
}

/// Convert a log record to a pipeline message
pub fn to_raw_message<M: Message>(msg: &M) -> RawMessage {
    let key = msg
        .key()
        .map(|k| String::from_utf8_lossy(k).into_owned());
    let value = msg
        .payload()
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .unwrap_or_default();

    let raw = RawMessage::new(key, value).with_position(msg.topic(), msg.partition(), msg.offset());

    match msg
        .timestamp()
        .to_millis()
        .and_then(DateTime::from_timestamp_millis)
    {
        Some(ts) => raw.with_timestamp(ts),
        None => raw,
    }
}

/// Counters tracked by the reader
#[derive(Debug, Clone, Default)]
pub struct KafkaSourceMetrics {
    /// Records forwarded to the pipeline
    pub messages_consumed: u64,
    /// Records dropped by the start-time filter
    pub messages_filtered: u64,
    /// Failed polls
    pub messages_failed: u64,
    /// Total bytes consumed
    pub bytes_consumed: u64,
    /// Records forwarded per partition
    pub messages_per_partition: HashMap<i32, u64>,
    /// Rebalance count
    pub rebalance_count: u64,
    /// Current partition assignment
    pub assigned_partitions: Vec<i32>,
}

/// Consumer context logging rebalances
struct SourceConsumerContext {
    metrics: Arc<RwLock<KafkaSourceMetrics>>,
}

impl ClientContext for SourceConsumerContext {}

impl ConsumerContext for SourceConsumerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                info!("Partition revocation: {:?}", tpl);
                self.metrics.write().rebalance_count += 1;
            }
            Rebalance::Assign(tpl) => {
                info!("Partition assignment: {:?}", tpl);
            }
            Rebalance::Error(err) => {
                error!("Rebalance error: {}", err);
            }
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Assign(tpl) = rebalance {
            let partitions: Vec<i32> = tpl.elements().iter().map(|e| e.partition()).collect();
            info!("Successfully assigned partitions: {:?}", partitions);
            self.metrics.write().assigned_partitions = partitions;
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(err) = result {
            warn!("Commit callback error: {}", err);
        }
    }
}

/// Kafka source reader feeding the pipeline
pub struct KafkaSource {
    consumer: Arc<StreamConsumer<SourceConsumerContext>>,
    config: KafkaSourceConfig,
    filter: StartTimeFilter,
    metrics: Arc<RwLock<KafkaSourceMetrics>>,
    connected: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

impl KafkaSource {
    /// Create a reader; no connection is attempted until [`KafkaSource::connect`]
    pub fn new(config: KafkaSourceConfig) -> Result<Self> {
        if config.topics.is_empty() {
            return Err(KafkaError::invalid_config(
                "at least one topic is required",
                Some("topics".to_string()),
            ));
        }

        let metrics = Arc::new(RwLock::new(KafkaSourceMetrics::default()));
        let context = SourceConsumerContext {
            metrics: metrics.clone(),
        };

        let consumer: StreamConsumer<SourceConsumerContext> = config
            .client_config()
            .create_with_context(context)
            .map_err(|e| KafkaError::connection(e.to_string(), config.brokers.clone()))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            filter: StartTimeFilter::new(config.start_read_timestamp),
            config,
            metrics,
            connected: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribe through the consumer group, or assign partitions at the start timestamp
    pub fn connect(&self) -> Result<()> {
        match self.config.start_read_timestamp {
            Some(start) => self.assign_from_timestamp(start)?,
            None => self.subscribe()?,
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> Result<()> {
        let topic_refs: Vec<&str> = self.config.topics.iter().map(String::as_str).collect();

        self.consumer.subscribe(&topic_refs).map_err(|e| {
            KafkaError::partition_assignment(e.to_string(), self.config.topics.clone())
        })?;

        info!("Subscribed to topics: {:?}", self.config.topics);
        Ok(())
    }

    fn assign_from_timestamp(&self, start: DateTime<Utc>) -> Result<()> {
        let timestamp_ms = start.timestamp_millis();
        let mut lookup = TopicPartitionList::new();

        for topic in &self.config.topics {
            let metadata = self
                .consumer
                .fetch_metadata(Some(topic), self.config.metadata_timeout)
                .map_err(|e| KafkaError::topic_metadata(e.to_string(), topic.clone()))?;

            let partitions = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .map(|t| t.partitions().iter().map(|p| p.id()).collect::<Vec<_>>())
                .unwrap_or_default();

            if partitions.is_empty() {
                return Err(KafkaError::topic_metadata("topic has no partitions", topic.clone()));
            }

            for partition in partitions {
                lookup
                    .add_partition_offset(topic, partition, Offset::Offset(timestamp_ms))
                    .map_err(|e| KafkaError::offset_lookup(e.to_string(), timestamp_ms))?;
            }
        }

        let offsets = self
            .consumer
            .offsets_for_times(lookup, self.config.metadata_timeout)
            .map_err(|e| KafkaError::offset_lookup(e.to_string(), timestamp_ms))?;

        self.consumer.assign(&offsets).map_err(|e| {
            KafkaError::partition_assignment(e.to_string(), self.config.topics.clone())
        })?;

        info!(
            start = %start,
            partitions = offsets.count(),
            "Assigned partitions from start timestamp"
        );
        Ok(())
    }

    /// Poll for the next record accepted by the start-time filter
    ///
    /// Returns `Ok(None)` on timeout, end of partition, filtered records and shutdown.
    pub async fn poll(&self) -> Result<Option<RawMessage>> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let next = tokio::time::timeout(self.config.poll_timeout, self.consumer.recv());
        let received = match next.await {
            Ok(received) => received,
            Err(_) => return Ok(None),
        };

        match received {
            Ok(msg) => {
                let raw = to_raw_message(&msg);
                let mut metrics = self.metrics.write();

                if !self.filter.accepts(&raw) {
                    debug!(
                        topic = %raw.topic,
                        partition = raw.partition,
                        offset = raw.offset,
                        "Dropping record stamped before start timestamp"
                    );
                    metrics.messages_filtered += 1;
                    return Ok(None);
                }

                metrics.messages_consumed += 1;
                metrics.bytes_consumed += raw.value.len() as u64;
                *metrics.messages_per_partition.entry(raw.partition).or_insert(0) += 1;
                Ok(Some(raw))
            }
            Err(RdKafkaError::PartitionEOF(partition)) => {
                debug!("Reached end of partition {}", partition);
                Ok(None)
            }
            Err(e) => {
                self.metrics.write().messages_failed += 1;
                Err(e.into())
            }
        }
    }

    /// Forward records to the pipeline until shutdown or the channel closes
    pub async fn start(&self, tx: mpsc::Sender<RawMessage>) -> Result<()> {
        if !self.is_connected() {
            self.connect()?;
        }

        let mut fatal = None;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown signal received");
                break;
            }

            match self.poll().await {
                Ok(Some(msg)) => {
                    if tx.send(msg).await.is_err() {
                        warn!("Channel closed, stopping reader");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Error consuming message, retrying");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(e) => {
                    error!(error = %e, "Unrecoverable consumer error, stopping reader");
                    fatal = Some(e);
                    break;
                }
            }
        }

        if !self.config.enable_auto_commit {
            if let Err(e) = self
                .consumer
                .commit_consumer_state(rdkafka::consumer::CommitMode::Sync)
            {
                warn!("Failed to commit offsets on shutdown: {}", e);
            }
        }

        info!("Kafka source reader stopped");
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Handle that stops [`KafkaSource::start`] at its next poll
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Stop the reader
    pub fn close(&self) {
        info!("Stopping Kafka source reader");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Current counters
    pub fn metrics(&self) -> KafkaSourceMetrics {
        self.metrics.read().clone()
    }

    /// Reader configuration
    pub fn config(&self) -> &KafkaSourceConfig {
        &self.config
    }
}
