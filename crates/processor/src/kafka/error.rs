//! Stream reader error types.

use thiserror::Error;

/// Result type alias for stream reader operations.
pub type Result<T> = std::result::Result<T, KafkaError>;

/// Errors raised while connecting to or reading from the event log.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Error establishing connection to a broker.
    #[error("Failed to connect to Kafka broker {broker}: {message}")]
    Connection {
        /// Error message describing the connection failure.
        message: String,
        /// Broker address that failed to connect.
        broker: String,
    },

    /// Error during message consumption.
    #[error("Failed to consume message from topic {topic}: {message}")]
    Consumption {
        message: String,
        topic: String,
        partition: Option<i32>,
        offset: Option<i64>,
    },

    /// Configuration validation error.
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
        /// Field name that has invalid configuration.
        field: Option<String>,
    },

    /// Offsets for the start timestamp could not be resolved.
    #[error("Failed to resolve offsets for {timestamp_ms}: {message}")]
    OffsetLookup { message: String, timestamp_ms: i64 },

    /// Error during partition assignment or subscription.
    #[error("Partition assignment error: {message}")]
    PartitionAssignment {
        message: String,
        topics: Vec<String>,
    },

    /// Error related to topic metadata.
    #[error("Topic metadata error for topic {topic}: {message}")]
    TopicMetadata { message: String, topic: String },

    /// Error from the underlying rdkafka library.
    #[error("Kafka client error: {message} (error code: {code:?})")]
    KafkaClient { message: String, code: Option<i32> },
}

impl KafkaError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>, broker: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            broker: broker.into(),
        }
    }

    /// Create a consumption error.
    pub fn consumption(
        message: impl Into<String>,
        topic: impl Into<String>,
        partition: Option<i32>,
        offset: Option<i64>,
    ) -> Self {
        Self::Consumption {
            message: message.into(),
            topic: topic.into(),
            partition,
            offset,
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>, field: Option<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            field,
        }
    }

    /// Create an offset lookup error.
    pub fn offset_lookup(message: impl Into<String>, timestamp_ms: i64) -> Self {
        Self::OffsetLookup {
            message: message.into(),
            timestamp_ms,
        }
    }

    /// Create a partition assignment error.
    pub fn partition_assignment(message: impl Into<String>, topics: Vec<String>) -> Self {
        Self::PartitionAssignment {
            message: message.into(),
            topics,
        }
    }

    /// Create a topic metadata error.
    pub fn topic_metadata(message: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::TopicMetadata {
            message: message.into(),
            topic: topic.into(),
        }
    }

    /// Create a Kafka client error.
    pub fn kafka_client(message: impl Into<String>, code: Option<i32>) -> Self {
        Self::KafkaClient {
            message: message.into(),
            code,
        }
    }

    /// Check if the reader can keep polling after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KafkaError::Connection { .. } | KafkaError::Consumption { .. }
        )
    }
}

impl From<rdkafka::error::KafkaError> for KafkaError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        use rdkafka::error::KafkaError as RdKafkaError;

        match err {
            RdKafkaError::ClientCreation(msg) => KafkaError::connection(msg, "unknown"),
            RdKafkaError::MetadataFetch(err) => {
                KafkaError::topic_metadata(err.to_string(), "unknown")
            }
            RdKafkaError::Subscription(msg) => KafkaError::partition_assignment(msg, Vec::new()),
            RdKafkaError::MessageConsumption(code) => KafkaError::consumption(
                format!("Message consumption failed with code: {:?}", code),
                "unknown",
                None,
                None,
            ),
            RdKafkaError::OffsetFetch(err) => KafkaError::offset_lookup(err.to_string(), -1),
            RdKafkaError::PartitionEOF(partition) => KafkaError::consumption(
                format!("Reached end of partition {}", partition),
                "unknown",
                Some(partition),
                None,
            ),
            _ => KafkaError::kafka_client(err.to_string(), None),
        }
    }
}
