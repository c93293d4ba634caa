//! Kafka integration for the catalogue pipeline
//!
//! [`KafkaSource`] reads key/value records from the change-event topics and
//! forwards them over a channel. It either resumes from the consumer group's
//! committed offsets or, when a start timestamp is configured, starts every
//! partition at that instant.
//!
//! # Example
//!
//! ```rust,no_run
//! use processor::kafka::{KafkaSource, KafkaSourceConfig};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = KafkaSourceConfig {
//!     brokers: "localhost:9092".to_string(),
//!     group_id: "catalog-etl".to_string(),
//!     topics: vec!["product-catalogue".to_string()],
//!     ..Default::default()
//! };
//!
//! let source = KafkaSource::new(config)?;
//! let (tx, mut rx) = mpsc::channel(1000);
//!
//! tokio::spawn(async move { source.start(tx).await });
//!
//! while let Some(msg) = rx.recv().await {
//!     println!("{:?}: {}", msg.key, msg.value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod source;

pub use error::KafkaError;
pub use source::{
    to_raw_message, KafkaSource, KafkaSourceConfig, KafkaSourceMetrics, StartTimeFilter,
    TlsSettings,
};
