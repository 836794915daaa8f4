//! Projection store facade.
//!
//! # Overview
//!
//! [`ProjectionStore`] is the single entry point for projection persistence.
//! It resolves projection names against the closed registry **before** any
//! backend call, stamps processing timestamps from an injected [`Clock`], and
//! delegates to a [`ProjectionBackend`].
//!
//! # Idempotency
//!
//! ```text
//! apply_event(p, e) ──▶ apply record (p, e.event_id) exists? ── yes ──▶ Ok(false)
//!                                  │ no
//!                                  ▼
//!                       commit apply record + mutations ──▶ Ok(true)
//! ```
//!
//! The backend commits the apply record and the record mutations together,
//! so a crash between "state written" and "event marked" is not possible.

use chrono::{DateTime, Utc};
use governance_core::environment::{Clock, SystemClock};
use governance_core::event::GovernanceEvent;
use governance_core::projection::{
    ApplyRecord, AsProjectionName, ProjectionBackend, ProjectionCheckpoint, ProjectionName,
    RecordFilter, RecordMutation, Result,
};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Idempotent projection persistence and checkpointing.
///
/// # Example
///
/// ```
/// use governance_projections::ProjectionStore;
/// use governance_testing::InMemoryProjectionBackend;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let store = ProjectionStore::new(Arc::new(InMemoryProjectionBackend::new()));
///
/// // Names are checked against the registry before any I/O
/// assert!(store.clear_projection("bogus_projection").await.is_err());
/// assert_eq!(store.clear_projection("task_states").await.unwrap(), 0);
/// # });
/// ```
#[derive(Clone)]
pub struct ProjectionStore {
    backend: Arc<dyn ProjectionBackend>,
    clock: Arc<dyn Clock>,
}

impl ProjectionStore {
    /// Create a store over `backend` using wall-clock time.
    #[must_use]
    pub fn new(backend: Arc<dyn ProjectionBackend>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    /// Create a store with an explicit clock.
    #[must_use]
    pub fn with_clock(backend: Arc<dyn ProjectionBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// Current processing time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Every projection in registry order.
    #[must_use]
    pub fn get_projection_names(&self) -> Vec<ProjectionName> {
        ProjectionName::ALL.to_vec()
    }

    /// Record that `event` was applied to a projection, together with the
    /// state changes it caused.
    ///
    /// Returns `false` (and changes nothing) when the event was already
    /// applied to this projection.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::UnknownProjection`](governance_core::projection::ProjectionError::UnknownProjection)
    ///   before any I/O for names outside the registry
    /// - [`ProjectionError::Storage`](governance_core::projection::ProjectionError::Storage)
    ///   if the commit fails; nothing is then visible
    pub async fn apply_event(
        &self,
        projection: impl AsProjectionName,
        event: &GovernanceEvent,
        sequence: u64,
        mutations: Vec<RecordMutation>,
    ) -> Result<bool> {
        let projection = projection.to_projection_name()?;

        if self
            .backend
            .has_apply_record(projection, event.event_id)
            .await?
        {
            tracing::trace!(
                projection = %projection,
                event_id = %event.event_id,
                sequence,
                "Event already applied"
            );
            return Ok(false);
        }

        let record = ApplyRecord {
            projection_name: projection,
            event_id: event.event_id,
            event_hash: event.hash.clone(),
            sequence,
            applied_at: self.clock.now(),
        };

        let mutation_count = mutations.len();
        let applied = self.backend.commit_apply(record, mutations).await?;

        tracing::trace!(
            projection = %projection,
            event_id = %event.event_id,
            sequence,
            mutation_count,
            applied,
            "Apply committed"
        );
        Ok(applied)
    }

    /// Whether `event_id` was already applied to a projection.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names (before I/O) or storage failures.
    pub async fn is_event_applied(
        &self,
        projection: impl AsProjectionName,
        event_id: Uuid,
    ) -> Result<bool> {
        let projection = projection.to_projection_name()?;
        self.backend.has_apply_record(projection, event_id).await
    }

    /// Load the apply record of an event.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names (before I/O) or storage failures.
    pub async fn get_apply_record(
        &self,
        projection: impl AsProjectionName,
        event_id: Uuid,
    ) -> Result<Option<ApplyRecord>> {
        let projection = projection.to_projection_name()?;
        self.backend.get_apply_record(projection, event_id).await
    }

    /// Load the checkpoint of a projection.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names (before I/O) or storage failures.
    pub async fn get_checkpoint(
        &self,
        projection: impl AsProjectionName,
    ) -> Result<Option<ProjectionCheckpoint>> {
        let projection = projection.to_projection_name()?;
        self.backend.get_checkpoint(projection).await
    }

    /// Upsert the checkpoint of a projection.
    ///
    /// # Errors
    ///
    /// - `UnknownProjection` before any I/O
    /// - `CheckpointRegression` if `sequence` is below the stored position
    /// - `Storage` on failure
    pub async fn save_checkpoint(
        &self,
        projection: impl AsProjectionName,
        event_id: Uuid,
        hash: &str,
        sequence: u64,
    ) -> Result<ProjectionCheckpoint> {
        let projection = projection.to_projection_name()?;
        let checkpoint = ProjectionCheckpoint {
            projection_name: projection,
            last_event_id: event_id,
            last_hash: hash.to_string(),
            last_sequence: sequence,
            updated_at: self.clock.now(),
        };

        if let Err(e) = self.backend.save_checkpoint(checkpoint.clone()).await {
            tracing::warn!(projection = %projection, sequence, error = %e, "Checkpoint rejected");
            return Err(e);
        }

        tracing::debug!(projection = %projection, sequence, "Checkpoint saved");
        Ok(checkpoint)
    }

    /// Delete every record, apply record and the checkpoint of a projection.
    ///
    /// Irreversible. Returns the number of projection records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names (before I/O) or storage failures.
    pub async fn clear_projection(&self, projection: impl AsProjectionName) -> Result<u64> {
        let projection = projection.to_projection_name()?;
        let deleted = self.backend.clear_projection(projection).await?;
        tracing::info!(projection = %projection, deleted, "Projection cleared");
        Ok(deleted)
    }

    /// Load one stored record as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names (before I/O) or storage failures.
    pub async fn get_record(
        &self,
        projection: impl AsProjectionName,
        entity_id: &str,
    ) -> Result<Option<Value>> {
        let projection = projection.to_projection_name()?;
        self.backend.get_record(projection, entity_id).await
    }

    /// List stored records ordered by entity id.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names (before I/O) or storage failures.
    pub async fn list_records(
        &self,
        projection: impl AsProjectionName,
        filter: Option<RecordFilter>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let projection = projection.to_projection_name()?;
        self.backend.list_records(projection, filter, limit).await
    }
}

impl std::fmt::Debug for ProjectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionStore").finish_non_exhaustive()
    }
}
