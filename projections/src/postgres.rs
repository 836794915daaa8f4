//! `PostgreSQL` adapters.
//!
//! # Overview
//!
//! - [`PostgresProjectionBackend`]: projection records, apply records and
//!   checkpoints in the `projections` schema
//! - [`PostgresLedgerReader`]: read-only access to the ledger's events table
//!
//! # Architecture
//!
//! ```text
//! Write Side (Ledger)               Read Side (Projections)
//! ┌─────────────────────┐          ┌──────────────────────────┐
//! │  PostgreSQL DB #1   │          │  PostgreSQL DB #2        │
//! │                     │          │  schema "projections"    │
//! │  ledger.events      │   →→→    │  task_states ...         │
//! │  (SELECT only)      │  replay  │  projection_applies      │
//! │                     │          │  projection_checkpoints  │
//! └─────────────────────┘          └──────────────────────────┘
//! ```
//!
//! The two adapters own separate pools. The projection backend has no handle
//! on the ledger database at all.
//!
//! # Example
//!
//! ```ignore
//! use governance_projections::postgres::*;
//!
//! let backend = PostgresProjectionBackend::connect("postgres://localhost/projections", 10).await?;
//! backend.migrate().await?;
//!
//! let ledger = PostgresLedgerReader::connect("postgres://localhost/ledger", 5, "ledger.events").await?;
//! ```

use crate::config::{ConfigError, is_valid_table_name};
use chrono::{DateTime, Utc};
use governance_core::event::{EventType, GovernanceEvent};
use governance_core::ledger::{LedgerError, LedgerReader, ReadOptions};
use governance_core::projection::{
    ApplyRecord, ProjectionBackend, ProjectionCheckpoint, ProjectionError, ProjectionName,
    RecordFilter, RecordMutation, Result,
};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

const SCHEMA: &str = "projections";

fn to_db_sequence(sequence: u64) -> Result<i64> {
    i64::try_from(sequence)
        .map_err(|_| ProjectionError::Storage(format!("Sequence {sequence} exceeds BIGINT range")))
}

fn from_db_sequence(sequence: i64) -> Result<u64> {
    u64::try_from(sequence)
        .map_err(|_| ProjectionError::Storage(format!("Negative sequence {sequence} in storage")))
}

fn storage(context: &str) -> impl FnOnce(sqlx::Error) -> ProjectionError + '_ {
    move |e| ProjectionError::Storage(format!("{context}: {e}"))
}

/// PostgreSQL-backed projection storage.
///
/// # Schema
///
/// Created by the bundled migrations:
///
/// ```sql
/// CREATE TABLE projections.task_states (
///     entity_id TEXT PRIMARY KEY,
///     record JSONB NOT NULL,
///     last_event_sequence BIGINT NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// -- ...one such table per projection, plus:
/// CREATE TABLE projections.projection_applies (...);     -- PK (projection_name, event_id)
/// CREATE TABLE projections.projection_checkpoints (...); -- PK projection_name
/// ```
///
/// Table names come from the closed [`ProjectionName`] registry, so the
/// dynamic SQL below never interpolates caller input.
#[derive(Clone)]
pub struct PostgresProjectionBackend {
    pool: PgPool,
}

impl PostgresProjectionBackend {
    /// Create a backend using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a backend with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(storage("Failed to connect"))?;

        Ok(Self::new(pool))
    }

    /// Run the projection schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(projection: ProjectionName) -> String {
        format!("{SCHEMA}.{}", projection.as_str())
    }

    async fn apply_mutation(
        tx: &mut Transaction<'_, Postgres>,
        projection: ProjectionName,
        mutation: RecordMutation,
        sequence: i64,
        applied_at: DateTime<Utc>,
    ) -> Result<()> {
        let table = Self::table(projection);
        match mutation {
            RecordMutation::Upsert { entity_id, record } => {
                let last_event_sequence = match record.get("last_event_sequence").and_then(Value::as_u64) {
                    Some(value) => to_db_sequence(value)?,
                    None => sequence,
                };
                let query = format!(
                    "INSERT INTO {table} (entity_id, record, last_event_sequence, updated_at)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (entity_id) DO UPDATE
                     SET record = EXCLUDED.record,
                         last_event_sequence = EXCLUDED.last_event_sequence,
                         updated_at = EXCLUDED.updated_at"
                );
                sqlx::query(&query)
                    .bind(&entity_id)
                    .bind(&record)
                    .bind(last_event_sequence)
                    .bind(applied_at)
                    .execute(&mut **tx)
                    .await
                    .map_err(storage("Failed to upsert record"))?;
            }
            RecordMutation::Delete { entity_id } => {
                let query = format!("DELETE FROM {table} WHERE entity_id = $1");
                sqlx::query(&query)
                    .bind(&entity_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(storage("Failed to delete record"))?;
            }
        }
        Ok(())
    }
}

impl ProjectionBackend for PostgresProjectionBackend {
    fn has_apply_record(
        &self,
        projection: ProjectionName,
        event_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(
                     SELECT 1 FROM projections.projection_applies
                     WHERE projection_name = $1 AND event_id = $2
                 )",
            )
            .bind(projection.as_str())
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage("Failed to check apply record"))?;

            Ok(exists)
        })
    }

    fn get_apply_record(
        &self,
        projection: ProjectionName,
        event_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ApplyRecord>>> + Send + '_>> {
        Box::pin(async move {
            let row: Option<(String, i64, DateTime<Utc>)> = sqlx::query_as(
                "SELECT event_hash, sequence, applied_at
                 FROM projections.projection_applies
                 WHERE projection_name = $1 AND event_id = $2",
            )
            .bind(projection.as_str())
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("Failed to load apply record"))?;

            row.map(|(event_hash, sequence, applied_at)| {
                Ok(ApplyRecord {
                    projection_name: projection,
                    event_id,
                    event_hash,
                    sequence: from_db_sequence(sequence)?,
                    applied_at,
                })
            })
            .transpose()
        })
    }

    fn commit_apply(
        &self,
        record: ApplyRecord,
        mutations: Vec<RecordMutation>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let sequence = to_db_sequence(record.sequence)?;
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(storage("Failed to begin transaction"))?;

            // Claim the event first; a concurrent writer that got here earlier wins
            let inserted = sqlx::query(
                "INSERT INTO projections.projection_applies
                     (projection_name, event_id, event_hash, sequence, applied_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (projection_name, event_id) DO NOTHING",
            )
            .bind(record.projection_name.as_str())
            .bind(record.event_id)
            .bind(&record.event_hash)
            .bind(sequence)
            .bind(record.applied_at)
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to insert apply record"))?
            .rows_affected();

            if inserted == 0 {
                tx.rollback()
                    .await
                    .map_err(storage("Failed to roll back"))?;
                return Ok(false);
            }

            for mutation in mutations {
                Self::apply_mutation(
                    &mut tx,
                    record.projection_name,
                    mutation,
                    sequence,
                    record.applied_at,
                )
                .await?;
            }

            tx.commit()
                .await
                .map_err(storage("Failed to commit apply"))?;
            Ok(true)
        })
    }

    fn get_checkpoint(
        &self,
        projection: ProjectionName,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectionCheckpoint>>> + Send + '_>> {
        Box::pin(async move {
            let row: Option<(Uuid, String, i64, DateTime<Utc>)> = sqlx::query_as(
                "SELECT last_event_id, last_hash, last_sequence, updated_at
                 FROM projections.projection_checkpoints
                 WHERE projection_name = $1",
            )
            .bind(projection.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("Failed to load checkpoint"))?;

            row.map(|(last_event_id, last_hash, last_sequence, updated_at)| {
                Ok(ProjectionCheckpoint {
                    projection_name: projection,
                    last_event_id,
                    last_hash,
                    last_sequence: from_db_sequence(last_sequence)?,
                    updated_at,
                })
            })
            .transpose()
        })
    }

    fn save_checkpoint(
        &self,
        checkpoint: ProjectionCheckpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let attempted = to_db_sequence(checkpoint.last_sequence)?;

            // The WHERE clause makes the regression check and the write one statement
            let written: Option<(i64,)> = sqlx::query_as(
                "INSERT INTO projections.projection_checkpoints
                     (projection_name, last_event_id, last_hash, last_sequence, updated_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (projection_name) DO UPDATE
                 SET last_event_id = EXCLUDED.last_event_id,
                     last_hash = EXCLUDED.last_hash,
                     last_sequence = EXCLUDED.last_sequence,
                     updated_at = EXCLUDED.updated_at
                 WHERE projection_checkpoints.last_sequence <= EXCLUDED.last_sequence
                 RETURNING last_sequence",
            )
            .bind(checkpoint.projection_name.as_str())
            .bind(checkpoint.last_event_id)
            .bind(&checkpoint.last_hash)
            .bind(attempted)
            .bind(checkpoint.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("Failed to save checkpoint"))?;

            if written.is_some() {
                return Ok(());
            }

            let current = self
                .get_checkpoint(checkpoint.projection_name)
                .await?
                .map_or(0, |stored| stored.last_sequence);
            Err(ProjectionError::CheckpointRegression {
                projection: checkpoint.projection_name,
                current,
                attempted: checkpoint.last_sequence,
            })
        })
    }

    fn clear_projection(
        &self,
        projection: ProjectionName,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(storage("Failed to begin transaction"))?;

            let query = format!("DELETE FROM {}", Self::table(projection));
            let deleted = sqlx::query(&query)
                .execute(&mut *tx)
                .await
                .map_err(storage("Failed to delete records"))?
                .rows_affected();

            sqlx::query("DELETE FROM projections.projection_applies WHERE projection_name = $1")
                .bind(projection.as_str())
                .execute(&mut *tx)
                .await
                .map_err(storage("Failed to delete apply records"))?;

            sqlx::query("DELETE FROM projections.projection_checkpoints WHERE projection_name = $1")
                .bind(projection.as_str())
                .execute(&mut *tx)
                .await
                .map_err(storage("Failed to delete checkpoint"))?;

            tx.commit()
                .await
                .map_err(storage("Failed to commit clear"))?;
            Ok(deleted)
        })
    }

    fn get_record(
        &self,
        projection: ProjectionName,
        entity_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>>> + Send + '_>> {
        let entity_id = entity_id.to_string();
        Box::pin(async move {
            let query = format!(
                "SELECT record FROM {} WHERE entity_id = $1",
                Self::table(projection)
            );
            let row: Option<(Value,)> = sqlx::query_as(&query)
                .bind(entity_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("Failed to load record"))?;

            Ok(row.map(|(record,)| record))
        })
    }

    fn list_records(
        &self,
        projection: ProjectionName,
        filter: Option<RecordFilter>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Value>>> + Send + '_>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let table = Self::table(projection);

            let rows: Vec<(Value,)> = match filter {
                Some(filter) => {
                    let query = format!(
                        "SELECT record FROM {table}
                         WHERE record->>$1 = $2
                         ORDER BY entity_id
                         LIMIT $3"
                    );
                    sqlx::query_as::<_, (Value,)>(&query)
                        .bind(filter.field)
                        .bind(filter.value)
                        .bind(limit)
                        .fetch_all(&self.pool)
                        .await
                }
                None => {
                    let query = format!("SELECT record FROM {table} ORDER BY entity_id LIMIT $1");
                    sqlx::query_as::<_, (Value,)>(&query)
                        .bind(limit)
                        .fetch_all(&self.pool)
                        .await
                }
            }
            .map_err(storage("Failed to list records"))?;

            Ok(rows.into_iter().map(|(record,)| record).collect())
        })
    }
}

impl std::fmt::Debug for PostgresProjectionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresProjectionBackend").finish_non_exhaustive()
    }
}

/// Row shape of the ledger's events table.
#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    event_type: String,
    timestamp: DateTime<Utc>,
    actor_id: String,
    trace_id: String,
    payload: Option<Value>,
    hash: String,
    sequence: i64,
}

impl TryFrom<EventRow> for GovernanceEvent {
    type Error = LedgerError;

    fn try_from(row: EventRow) -> std::result::Result<Self, Self::Error> {
        let sequence = u64::try_from(row.sequence).map_err(|_| LedgerError::Decode {
            sequence: 0,
            reason: format!("negative sequence {}", row.sequence),
        })?;

        let payload = match row.payload {
            None | Some(Value::Null) => serde_json::Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(LedgerError::Decode {
                    sequence,
                    reason: format!("payload is not an object: {other}"),
                });
            }
        };

        Ok(Self {
            event_id: row.event_id,
            event_type: EventType::new(row.event_type),
            timestamp: row.timestamp,
            actor_id: row.actor_id,
            trace_id: row.trace_id,
            payload,
            hash: row.hash,
            sequence,
        })
    }
}

/// Read-only ledger access over `PostgreSQL`.
///
/// Only ever issues `SELECT` statements against the configured events table.
#[derive(Clone)]
pub struct PostgresLedgerReader {
    pool: PgPool,
    table: String,
}

impl PostgresLedgerReader {
    /// Create a reader over an existing pool.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTableName`] unless `table` is a plain
    /// (optionally schema-qualified) identifier.
    pub fn new(pool: PgPool, table: impl Into<String>) -> std::result::Result<Self, ConfigError> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(ConfigError::InvalidTableName(table));
        }
        Ok(Self { pool, table })
    }

    /// Create a reader with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the table name is invalid or the
    /// connection fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        table: impl Into<String>,
    ) -> std::result::Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to connect: {e}")))?;

        Self::new(pool, table).map_err(|e| LedgerError::Database(e.to_string()))
    }
}

impl LedgerReader for PostgresLedgerReader {
    fn read_events(
        &self,
        options: ReadOptions,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Vec<GovernanceEvent>, LedgerError>> + Send + '_>>
    {
        Box::pin(async move {
            let start = i64::try_from(options.start_sequence.unwrap_or(0)).unwrap_or(i64::MAX);
            let limit = i64::try_from(options.limit).unwrap_or(i64::MAX);
            let offset = i64::try_from(options.offset.unwrap_or(0)).unwrap_or(i64::MAX);

            let query = format!(
                r#"SELECT event_id, event_type, "timestamp", actor_id, trace_id, payload, hash, sequence
                   FROM {}
                   WHERE sequence >= $1
                   ORDER BY sequence ASC
                   LIMIT $2 OFFSET $3"#,
                self.table
            );

            let rows: Vec<EventRow> = sqlx::query_as(&query)
                .bind(start)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| LedgerError::Database(format!("Failed to read events: {e}")))?;

            rows.into_iter().map(GovernanceEvent::try_from).collect()
        })
    }

    fn get_max_sequence(
        &self,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<u64, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let query = format!("SELECT COALESCE(MAX(sequence), 0)::BIGINT FROM {}", self.table);
            let (max,): (i64,) = sqlx::query_as(&query)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| LedgerError::Database(format!("Failed to read max sequence: {e}")))?;

            u64::try_from(max).map_err(|_| LedgerError::Decode {
                sequence: 0,
                reason: format!("negative max sequence {max}"),
            })
        })
    }
}

impl std::fmt::Debug for PostgresLedgerReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresLedgerReader")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests with real Postgres are in the tests/ directory.

    #[test]
    fn test_table_names_are_schema_qualified() {
        assert_eq!(
            PostgresProjectionBackend::table(ProjectionName::ActorRegistry),
            "projections.actor_registry"
        );
    }

    #[test]
    fn test_sequence_conversion_rejects_out_of_range() {
        assert!(to_db_sequence(u64::MAX).is_err());
        assert!(from_db_sequence(-1).is_err());
        assert!(matches!(to_db_sequence(42), Ok(42)));
    }

    #[test]
    fn test_row_with_array_payload_is_a_decode_error() {
        let row = EventRow {
            event_id: Uuid::nil(),
            event_type: "petition.filed".to_string(),
            timestamp: Utc::now(),
            actor_id: "a".to_string(),
            trace_id: "t".to_string(),
            payload: Some(serde_json::json!([1, 2])),
            hash: "h".to_string(),
            sequence: 9,
        };
        assert!(matches!(
            GovernanceEvent::try_from(row),
            Err(LedgerError::Decode { sequence: 9, .. })
        ));
    }
}
