//! Sink writer
//!
//! Mutations are applied through a [`MutationSink`] under a
//! [`SinkIdentity`]. The [`SinkWriter`] is the failure boundary: a failed
//! write is logged with its full context and counted, never returned, so a
//! sink outage cannot stop the pipeline. Lost mutations are not retried. A
//! sink may commit part of a batch and report only the rejected mutations.

mod postgres;

pub use postgres::{upsert_statement, PostgresMutationSink};

use async_trait::async_trait;
use catalog_etl_config::SinkConfig;
use catalog_etl_types::MutationDescriptor;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::SinkWriteError;
use crate::metrics::PipelineMetrics;

/// Project, instance and database the sink writes to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SinkIdentity {
    pub project: String,
    pub instance: String,
    pub database: String,
}

impl SinkIdentity {
    pub fn new(
        project: impl Into<String>,
        instance: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            instance: instance.into(),
            database: database.into(),
        }
    }
}

impl From<&SinkConfig> for SinkIdentity {
    fn from(config: &SinkConfig) -> Self {
        Self::new(&config.project_id, &config.instance_id, &config.database_id)
    }
}

impl std::fmt::Display for SinkIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "projects/{}/instances/{}/databases/{}",
            self.project, self.instance, self.database
        )
    }
}

/// Relational store accepting insert-or-update mutations
#[async_trait]
pub trait MutationSink: Send + Sync {
    /// Apply a batch; mutations the sink rejects are reported as
    /// [`SinkWriteError::Partial`] while the others are kept
    async fn apply(
        &self,
        identity: &SinkIdentity,
        mutations: &[MutationDescriptor],
    ) -> Result<(), SinkWriteError>;

    /// Sink name for logs
    fn name(&self) -> &str;
}

/// Writes mutation batches and swallows failures
#[derive(Clone)]
pub struct SinkWriter {
    sink: Arc<dyn MutationSink>,
    identity: SinkIdentity,
    metrics: PipelineMetrics,
}

impl SinkWriter {
    pub fn new(
        sink: Arc<dyn MutationSink>,
        identity: SinkIdentity,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            sink,
            identity,
            metrics,
        }
    }

    pub fn identity(&self) -> &SinkIdentity {
        &self.identity
    }

    /// Write a batch; failures are logged and counted
    pub async fn write(&self, mutations: &[MutationDescriptor]) {
        if mutations.is_empty() {
            return;
        }

        match self.sink.apply(&self.identity, mutations).await {
            Ok(()) => {
                self.metrics.record_mutations_written(mutations.len());
                debug!(
                    sink = self.sink.name(),
                    identity = %self.identity,
                    mutations = mutations.len(),
                    "Mutations written"
                );
            }
            Err(e) => {
                let lost = e.lost(mutations.len());
                self.metrics.record_sink_failure(lost);
                self.metrics.record_mutations_written(mutations.len() - lost);
                let tables: Vec<&str> = mutations.iter().map(|m| m.table()).collect();
                error!(
                    sink = self.sink.name(),
                    identity = %self.identity,
                    mutations = mutations.len(),
                    lost,
                    tables = ?tables,
                    error = %e,
                    "Sink write failed, mutations dropped"
                );
            }
        }
    }
}

type RowKey = (String, Vec<String>);

fn row_key(table: &str, key: &[&str]) -> RowKey {
    (table.to_string(), key.iter().map(|k| k.to_string()).collect())
}

/// Sink kept in memory, with a switch to simulate an outage
#[derive(Clone, Default)]
pub struct InMemoryMutationSink {
    rows: Arc<Mutex<HashMap<RowKey, BTreeMap<String, String>>>>,
    rejected_keys: Arc<Mutex<HashSet<RowKey>>>,
    unavailable: Arc<AtomicBool>,
    applied_batches: Arc<Mutex<Vec<usize>>>,
}

impl InMemoryMutationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the sink going down or coming back
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make every mutation of `table` keyed by `key` fail, as a constraint would
    pub fn reject_key(&self, table: &str, key: &[&str]) {
        self.rejected_keys.lock().insert(row_key(table, key));
    }

    /// Row stored under a primary key
    pub fn get(&self, table: &str, key: &[&str]) -> Option<BTreeMap<String, String>> {
        self.rows.lock().get(&row_key(table, key)).cloned()
    }

    /// Number of rows stored for a table
    pub fn row_count(&self, table: &str) -> usize {
        self.rows.lock().keys().filter(|(t, _)| t == table).count()
    }

    /// Sizes of the batches applied so far
    pub fn applied_batches(&self) -> Vec<usize> {
        self.applied_batches.lock().clone()
    }
}

#[async_trait]
impl MutationSink for InMemoryMutationSink {
    async fn apply(
        &self,
        identity: &SinkIdentity,
        mutations: &[MutationDescriptor],
    ) -> Result<(), SinkWriteError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SinkWriteError::Unavailable(format!(
                "{} is not reachable",
                identity
            )));
        }

        let rejected_keys = self.rejected_keys.lock();
        let mut rows = self.rows.lock();
        let mut first_rejection = None;
        let mut rejected = 0;

        for mutation in mutations {
            let key = (mutation.table().to_string(), mutation.key_values());
            if rejected_keys.contains(&key) {
                rejected += 1;
                first_rejection.get_or_insert_with(|| SinkWriteError::Statement {
                    table: mutation.table().to_string(),
                    reason: format!("key {:?} rejected", key.1),
                });
                continue;
            }

            let row = rows.entry(key).or_default();
            for (column, value) in mutation.values() {
                row.insert(column.clone(), value.clone());
            }
        }
        self.applied_batches.lock().push(mutations.len());

        match first_rejection {
            Some(first) => Err(SinkWriteError::Partial {
                rejected,
                total: mutations.len(),
                first: Box::new(first),
            }),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
