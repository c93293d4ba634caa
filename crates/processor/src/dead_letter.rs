//! Dead-letter queue
//!
//! Every failure envelope produced by a failable stage is written here as a
//! [`DeadLetterRecord`]: the original input, the payload the stage was working
//! on, and the error context. The file-backed queue appends JSON lines and
//! rotates by size; the in-memory queue backs tests and dry runs.

use async_trait::async_trait;
use catalog_etl_config::DeadLetterConfig;
use catalog_etl_types::FailsafeElement;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DeadLetterError;

pub type Result<T> = std::result::Result<T, DeadLetterError>;

const CURRENT_FILE: &str = "dead_letter_current.jsonl";
const ROTATED_PREFIX: &str = "dead_letter_";

/// Persisted form of a failure envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    /// Unique record ID
    pub id: Uuid,
    /// Stage that produced the failure
    pub stage: String,
    /// When the failure was recorded
    pub failed_at: DateTime<Utc>,
    /// Input as it entered the pipeline
    pub original_payload: serde_json::Value,
    /// Value the failing stage received
    pub payload: serde_json::Value,
    /// Error message
    pub error_message: String,
    /// Error chain and backtrace
    pub stacktrace: String,
}

impl DeadLetterRecord {
    /// Build a record from a failure envelope
    pub fn from_failure<O, C>(stage: &str, element: &FailsafeElement<O, C>) -> Result<Self>
    where
        O: Serialize,
        C: Serialize,
    {
        Ok(Self {
            id: Uuid::new_v4(),
            stage: stage.to_string(),
            failed_at: Utc::now(),
            original_payload: serde_json::to_value(element.original_payload())?,
            payload: serde_json::to_value(element.payload())?,
            error_message: element.error_message().unwrap_or_default().to_string(),
            stacktrace: element.stacktrace().unwrap_or_default().to_string(),
        })
    }
}

/// Dead-letter queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeadLetterStats {
    /// Records written since start
    pub total_entries: u64,
    /// Size of the current file in bytes (file queue only)
    pub file_size_bytes: u64,
    /// Number of rotations since start
    pub rotated_files: usize,
}

/// Destination of failure envelopes
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Append a record
    async fn add(&self, record: DeadLetterRecord) -> Result<()>;

    /// Records in the current segment, oldest first
    async fn list_all(&self, offset: usize, limit: usize) -> Result<Vec<DeadLetterRecord>>;

    /// Queue statistics
    async fn stats(&self) -> Result<DeadLetterStats>;
}

/// JSON-lines dead-letter queue with size-based rotation
pub struct FileDeadLetterQueue {
    directory: PathBuf,
    max_file_size_bytes: u64,
    max_files: usize,
    current_file: PathBuf,
    stats: Mutex<DeadLetterStats>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileDeadLetterQueue {
    pub fn new(config: &DeadLetterConfig) -> Result<Self> {
        fs::create_dir_all(&config.directory)?;

        Ok(Self {
            current_file: config.directory.join(CURRENT_FILE),
            directory: config.directory.clone(),
            max_file_size_bytes: config.max_file_size_mb * 1024 * 1024,
            max_files: config.max_files,
            stats: Mutex::new(DeadLetterStats::default()),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Path of the file currently appended to
    pub fn current_file(&self) -> &Path {
        &self.current_file
    }

    fn file_size(path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn rotate_if_needed(&self) -> Result<()> {
        if !self.current_file.exists() {
            return Ok(());
        }

        if Self::file_size(&self.current_file)? >= self.max_file_size_bytes {
            self.rotate_file()?;
        }

        Ok(())
    }

    fn rotate_file(&self) -> Result<()> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let rotated_path = self
            .directory
            .join(format!("{}{}.jsonl", ROTATED_PREFIX, timestamp));

        fs::rename(&self.current_file, &rotated_path)?;
        info!("Rotated dead-letter file to {:?}", rotated_path);

        self.stats.lock().rotated_files += 1;
        self.cleanup_old_files()
    }

    fn cleanup_old_files(&self) -> Result<()> {
        let mut files: Vec<_> = fs::read_dir(&self.directory)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(|n| {
                        n.starts_with(ROTATED_PREFIX) && n != CURRENT_FILE && n.ends_with(".jsonl")
                    })
                    .unwrap_or(false)
            })
            .map(|e| e.path())
            .collect();

        // Rotated names sort chronologically
        files.sort();

        while files.len() > self.max_files {
            let oldest = files.remove(0);
            fs::remove_file(&oldest)?;
            info!("Removed old dead-letter file: {:?}", oldest);
        }

        Ok(())
    }

    fn read_entries(path: &Path) -> Result<Vec<DeadLetterRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<DeadLetterRecord>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Failed to deserialize dead-letter record: {}", e),
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl DeadLetterQueue for FileDeadLetterQueue {
    async fn add(&self, record: DeadLetterRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.rotate_if_needed()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_file)?;
        let mut writer = BufWriter::new(file);
        let json = serde_json::to_string(&record)?;

        writeln!(writer, "{}", json)?;
        writer.flush()?;

        let size = Self::file_size(&self.current_file)?;
        let mut stats = self.stats.lock();
        stats.total_entries += 1;
        stats.file_size_bytes = size;

        debug!(id = %record.id, stage = %record.stage, "Added dead-letter record");
        Ok(())
    }

    async fn list_all(&self, offset: usize, limit: usize) -> Result<Vec<DeadLetterRecord>> {
        let entries = Self::read_entries(&self.current_file)?;
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    async fn stats(&self) -> Result<DeadLetterStats> {
        let mut stats = self.stats.lock().clone();
        if self.current_file.exists() {
            stats.file_size_bytes = Self::file_size(&self.current_file)?;
        }
        Ok(stats)
    }
}

/// Dead-letter queue kept in memory
#[derive(Clone, Default)]
pub struct InMemoryDeadLetterQueue {
    records: Arc<Mutex<Vec<DeadLetterRecord>>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn add(&self, record: DeadLetterRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }

    async fn list_all(&self, offset: usize, limit: usize) -> Result<Vec<DeadLetterRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<DeadLetterStats> {
        Ok(DeadLetterStats {
            total_entries: self.records.lock().len() as u64,
            ..Default::default()
        })
    }
}
