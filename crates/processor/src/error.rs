//! Error types for the catalogue pipeline
//!
//! Only `ProvisioningError` (and configuration problems found before the
//! pipeline starts) may stop the process. Decode, mapping and mutation-build
//! errors are per record and end up in a dead-letter envelope; sink and
//! publish errors are logged and counted at their boundary.

use thiserror::Error;

use crate::kafka::KafkaError;

/// Main processor error type
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Trust material could not be provisioned
    #[error("provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Stream reader errors
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Illegal pipeline state change
    #[error("invalid pipeline state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// A pipeline task ended abnormally
    #[error("execution error: {source}")]
    Execution {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Trust-store fetch or materialization failure; fatal at startup
#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// Blob does not exist
    #[error("trust store gs://{bucket}/{object_path} not found")]
    NotFound { bucket: String, object_path: String },

    /// Blob could not be fetched
    #[error("failed to fetch trust store gs://{bucket}/{object_path}: {source}")]
    Fetch {
        bucket: String,
        object_path: String,
        #[source]
        source: object_store::Error,
    },

    /// Local file could not be written
    #[error("failed to write trust store to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Object store client could not be built
    #[error("object store configuration error: {0}")]
    StoreConfig(String),

    /// Malformed blob reference
    #[error("invalid blob location: {0}")]
    InvalidLocation(String),
}

/// Raw bytes could not be decoded into a catalogue event
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload is not well-formed
    #[error("malformed payload at line {line} column {column}: {reason}")]
    Malformed {
        reason: String,
        line: usize,
        column: usize,
    },

    /// Payload is well-formed but does not match the event schema
    #[error("schema mismatch: {reason}")]
    SchemaMismatch { reason: String },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        match err.classify() {
            Category::Data => DecodeError::SchemaMismatch {
                reason: err.to_string(),
            },
            Category::Io | Category::Syntax | Category::Eof => DecodeError::Malformed {
                line: err.line(),
                column: err.column(),
                reason: err.to_string(),
            },
        }
    }
}

/// Catalogue event could not be mapped to a row
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MappingError {
    /// Required field absent and without default
    #[error("required field '{field}' is missing")]
    MissingField { field: String },

    /// Field present but unusable
    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Row could not be turned into a sink mutation
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MutationBuildError {
    /// Required column missing from the row
    #[error("row for table {table} is missing required column '{column}'")]
    MissingColumn { table: String, column: String },

    /// Primary key column present but empty
    #[error("row for table {table} has an empty key column '{column}'")]
    EmptyKey { table: String, column: String },

    /// No schema registered for the table
    #[error("no schema registered for table {table}")]
    UnknownTable { table: String },
}

/// Sink write failure; swallowed and logged by the sink writer
#[derive(Error, Debug)]
pub enum SinkWriteError {
    /// Could not reach the sink
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// A statement was rejected
    #[error("statement for table {table} failed: {reason}")]
    Statement { table: String, reason: String },

    /// Transaction could not be committed
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Some mutations of a committed batch were rejected
    #[error("{rejected} of {total} mutations rejected, first: {first}")]
    Partial {
        rejected: usize,
        total: usize,
        first: Box<SinkWriteError>,
    },

    /// Invalid sink configuration
    #[error("invalid sink configuration: {0}")]
    Configuration(String),
}

impl SinkWriteError {
    /// Mutations of a batch of `batch_len` lost to this error
    pub fn lost(&self, batch_len: usize) -> usize {
        match self {
            SinkWriteError::Partial { rejected, .. } => (*rejected).min(batch_len),
            _ => batch_len,
        }
    }
}

/// Publish failure; logged per branch
#[derive(Error, Debug)]
pub enum PublishError {
    /// Request could not be sent
    #[error("publish to {topic} failed: {reason}")]
    Request { topic: String, reason: String },

    /// Service rejected the publish
    #[error("publish to {topic} rejected with status {status}: {body}")]
    Rejected {
        topic: String,
        status: u16,
        body: String,
    },

    /// Invalid publisher configuration
    #[error("invalid publisher configuration: {0}")]
    Configuration(String),
}

/// Dead-letter write failure
#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DeadLetterError {
    fn from(err: serde_json::Error) -> Self {
        DeadLetterError::Serialization(err.to_string())
    }
}

/// Result type alias for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;
