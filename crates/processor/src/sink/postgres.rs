//! PostgreSQL mutation sink
//!
//! Each batch runs in one transaction. Every mutation becomes
//!
//! ```sql
//! INSERT INTO "Product" ("id", "name")
//! SELECT "id", "name" FROM jsonb_populate_record(NULL::"Product", $1)
//! ON CONFLICT ("id") DO UPDATE SET "name" = EXCLUDED."name"
//! ```
//!
//! Values travel as one JSONB object of strings, so the server converts each
//! to its column type. Every statement runs under its own savepoint: a
//! rejected mutation is rolled back alone and the rest of the batch commits.

use async_trait::async_trait;
use catalog_etl_config::SinkConfig;
use catalog_etl_types::MutationDescriptor;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Acquire, PgConnection, PgPool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{MutationSink, SinkIdentity};
use crate::error::SinkWriteError;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Upsert statement for one mutation
pub fn upsert_statement(mutation: &MutationDescriptor) -> String {
    let table = quote_ident(mutation.table());
    let columns: Vec<String> = mutation.columns().map(quote_ident).collect();
    let keys: Vec<String> = mutation.key_columns().iter().map(|k| quote_ident(k)).collect();

    let updates: Vec<String> = mutation
        .columns()
        .filter(|c| !mutation.key_columns().iter().any(|k| k == c))
        .map(|c| {
            let c = quote_ident(c);
            format!("{} = EXCLUDED.{}", c, c)
        })
        .collect();

    let conflict = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {table} ({cols}) SELECT {cols} \
         FROM jsonb_populate_record(NULL::{table}, $1) ON CONFLICT ({keys}) {conflict}",
        table = table,
        cols = columns.join(", "),
        keys = keys.join(", "),
        conflict = conflict,
    )
}

async fn execute_upsert(
    conn: &mut PgConnection,
    mutation: &MutationDescriptor,
) -> Result<(), SinkWriteError> {
    let statement_error = |reason: String| SinkWriteError::Statement {
        table: mutation.table().to_string(),
        reason,
    };

    let values =
        serde_json::to_value(mutation.values()).map_err(|e| statement_error(e.to_string()))?;

    sqlx::query(&upsert_statement(mutation))
        .bind(values)
        .execute(conn)
        .await
        .map_err(|e| statement_error(e.to_string()))?;
    Ok(())
}

/// Sink writing to a PostgreSQL-compatible database
pub struct PostgresMutationSink {
    pool: PgPool,
    identity: SinkIdentity,
}

impl PostgresMutationSink {
    /// Create a lazily connecting pool for `identity`
    ///
    /// No connection is attempted here, so an unreachable database surfaces
    /// as failed writes rather than a startup failure.
    pub fn connect_lazy(
        config: &SinkConfig,
        identity: SinkIdentity,
    ) -> Result<Self, SinkWriteError> {
        let application_name = format!("catalog-etl/{}/{}", identity.project, identity.instance);
        let options = PgConnectOptions::from_str(&config.connection_url)
            .map_err(|e| SinkWriteError::Configuration(format!("Invalid connection URL: {}", e)))?
            .database(&identity.database)
            .application_name(&application_name);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        info!(
            identity = %identity,
            max_connections = config.max_connections,
            "PostgreSQL sink configured"
        );

        Ok(Self { pool, identity })
    }
}

#[async_trait]
impl MutationSink for PostgresMutationSink {
    async fn apply(
        &self,
        identity: &SinkIdentity,
        mutations: &[MutationDescriptor],
    ) -> Result<(), SinkWriteError> {
        if identity != &self.identity {
            return Err(SinkWriteError::Configuration(format!(
                "sink is bound to {}, not {}",
                self.identity, identity
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SinkWriteError::Unavailable(e.to_string()))?;

        let mut first_rejection = None;
        let mut rejected = 0;

        for mutation in mutations {
            let mut savepoint = Acquire::begin(&mut tx)
                .await
                .map_err(|e| SinkWriteError::Transaction(e.to_string()))?;

            match execute_upsert(&mut *savepoint, mutation).await {
                Ok(()) => savepoint
                    .commit()
                    .await
                    .map_err(|e| SinkWriteError::Transaction(e.to_string()))?,
                Err(e) => {
                    savepoint
                        .rollback()
                        .await
                        .map_err(|err| SinkWriteError::Transaction(err.to_string()))?;
                    warn!(
                        identity = %identity,
                        table = mutation.table(),
                        key = ?mutation.key_values(),
                        error = %e,
                        "Mutation rejected, rest of batch kept"
                    );
                    rejected += 1;
                    first_rejection.get_or_insert(e);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| SinkWriteError::Transaction(e.to_string()))?;

        debug!(
            identity = %identity,
            mutations = mutations.len(),
            rejected,
            "Transaction committed"
        );

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
        "postgres"
    }
}
