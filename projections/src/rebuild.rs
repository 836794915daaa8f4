//! Rebuild orchestrator.
//!
//! # Overview
//!
//! The orchestrator replays the ledger into projections in batches:
//!
//! ```text
//! ┌──────────┐  read_events(next, batch)  ┌──────────────┐
//! │  Ledger  │ ─────────────────────────▶ │ Orchestrator │
//! └──────────┘                            └──────┬───────┘
//!                                                │ per event
//!                         is_event_applied? ─────┤
//!                         handler.handle ────────┤
//!                         apply_event ───────────┤
//!                                                │ per batch
//!                         save_checkpoint ───────┘
//! ```
//!
//! # Phases
//!
//! Every run moves through `Idle → Clearing (full only) → Streaming →
//! Checkpointing → {Complete | Failed}`. Phases are logged, never persisted.
//!
//! # Failure Semantics
//!
//! An error mid-batch abandons the batch and leaves the checkpoint where the
//! previous batch put it. Because apply records commit atomically with their
//! mutations, retrying reprocesses the batch idempotently: events that made it
//! are skipped, events that did not are handled again.
//!
//! # Live Path
//!
//! [`RebuildOrchestrator::process_event`] applies a single event with the same
//! per-event routine rebuilds use, so a projection built live and one built by
//! replay end up identical.

use crate::handlers::{ProjectionHandler, default_handlers};
use crate::store::ProjectionStore;
use chrono::{DateTime, Utc};
use governance_core::event::GovernanceEvent;
use governance_core::ledger::{LedgerReader, ReadOptions};
use governance_core::projection::{AsProjectionName, ProjectionError, ProjectionName, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Default number of events per ledger read.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Stage of one rebuild run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildPhase {
    /// Not started
    Idle,
    /// Deleting projection data (full rebuild only)
    Clearing,
    /// Reading and applying events
    Streaming,
    /// Persisting the batch checkpoint
    Checkpointing,
    /// Finished successfully
    Complete,
    /// Stopped by an error or interruption
    Failed,
}

impl RebuildPhase {
    /// Log-friendly name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Clearing => "clearing",
            Self::Streaming => "streaming",
            Self::Checkpointing => "checkpointing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RebuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a rebuild run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RebuildResult {
    /// Rebuilt projection
    pub projection_name: ProjectionName,
    /// Events read from the ledger
    pub events_processed: u64,
    /// Events newly applied
    pub events_applied: u64,
    /// Events skipped because they were already applied
    pub events_skipped: u64,
    /// First sequence requested from the ledger
    pub start_sequence: u64,
    /// Sequence of the last checkpointed event, if any batch was read
    pub end_sequence: Option<u64>,
    /// Non-empty batches processed
    pub batches: u64,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub completed_at: DateTime<Utc>,
    /// Whether the projection was cleared first
    pub is_full_rebuild: bool,
}

impl RebuildResult {
    /// Wall time between start and completion.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

/// How far a projection lags behind the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    /// Checked projection
    pub projection_name: ProjectionName,
    /// Whether the checkpoint is at the ledger head
    pub is_synchronized: bool,
    /// Checkpointed position (`None` when never checkpointed)
    pub last_sequence: Option<u64>,
    /// Highest sequence in the ledger
    pub ledger_max_sequence: u64,
    /// `ledger_max_sequence - last_sequence`
    pub missing_events: u64,
}

#[derive(Clone, Copy)]
enum Mode {
    Full,
    Incremental,
}

impl Mode {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

/// Replays ledger events into projections.
///
/// # Example
///
/// ```
/// use governance_projections::{ProjectionStore, RebuildOrchestrator};
/// use governance_testing::{InMemoryLedger, InMemoryProjectionBackend};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let ledger = InMemoryLedger::new();
/// ledger.append("executive.task.created", json!({"task_id": "task-1"}));
///
/// let store = Arc::new(ProjectionStore::new(Arc::new(InMemoryProjectionBackend::new())));
/// let orchestrator = RebuildOrchestrator::new(Arc::new(ledger), store).with_default_handlers();
///
/// let result = orchestrator.rebuild_full("task_states").await.unwrap();
/// assert_eq!(result.events_applied, 1);
/// assert_eq!(result.end_sequence, Some(1));
/// # });
/// ```
pub struct RebuildOrchestrator {
    ledger: Arc<dyn LedgerReader>,
    store: Arc<ProjectionStore>,
    handlers: BTreeMap<ProjectionName, Arc<dyn ProjectionHandler>>,
    batch_size: usize,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RebuildOrchestrator {
    /// Create an orchestrator with no handlers.
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerReader>, store: Arc<ProjectionStore>) -> Self {
        Self {
            ledger,
            store,
            handlers: BTreeMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            shutdown: None,
        }
    }

    /// Register the record handler of every projection.
    #[must_use]
    pub fn with_default_handlers(mut self) -> Self {
        for (name, handler) in default_handlers(&self.store) {
            self.handlers.insert(name, handler);
        }
        self
    }

    /// Set the number of events per ledger read (at least 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Stop rebuilds between batches once `shutdown` carries `true`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Register (or replace) the handler of a projection.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::UnknownProjection`] for names outside the registry.
    pub fn register_handler(
        &mut self,
        projection: impl AsProjectionName,
        handler: Arc<dyn ProjectionHandler>,
    ) -> Result<()> {
        let projection = projection.to_projection_name()?;
        if self.handlers.insert(projection, handler).is_some() {
            tracing::debug!(projection = %projection, "Handler replaced");
        }
        Ok(())
    }

    /// Projections with a registered handler, in registry order.
    #[must_use]
    pub fn registered_projections(&self) -> Vec<ProjectionName> {
        self.handlers.keys().copied().collect()
    }

    /// Clear a projection and replay the whole ledger into it.
    ///
    /// # Errors
    ///
    /// - `UnknownProjection` / `HandlerNotRegistered` before any I/O
    /// - `Handler`, `Storage` or `Ledger` errors abort the current batch
    /// - `RebuildInterrupted` when the shutdown signal fires between batches
    pub async fn rebuild_full(&self, projection: impl AsProjectionName) -> Result<RebuildResult> {
        let (projection, handler) = self.resolve(&projection)?;
        self.run(projection, handler.as_ref(), Mode::Full).await
    }

    /// Replay the ledger from just after the projection's checkpoint.
    ///
    /// Starts at sequence 0 when the projection has never been checkpointed.
    ///
    /// # Errors
    ///
    /// Same as [`RebuildOrchestrator::rebuild_full`].
    pub async fn rebuild_incremental(
        &self,
        projection: impl AsProjectionName,
    ) -> Result<RebuildResult> {
        let (projection, handler) = self.resolve(&projection)?;
        self.run(projection, handler.as_ref(), Mode::Incremental)
            .await
    }

    /// Full rebuild of every registered projection, in registry order.
    ///
    /// Stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first rebuild error.
    pub async fn rebuild_all(&self) -> Result<Vec<RebuildResult>> {
        let mut results = Vec::with_capacity(self.handlers.len());
        for (projection, handler) in &self.handlers {
            results.push(self.run(*projection, handler.as_ref(), Mode::Full).await?);
        }
        Ok(results)
    }

    /// Compare a projection's checkpoint with the ledger head.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names (before I/O), or on storage or
    /// ledger failures.
    pub async fn get_rebuild_status(
        &self,
        projection: impl AsProjectionName,
    ) -> Result<VerificationResult> {
        let projection = projection.to_projection_name()?;
        let last_sequence = self
            .store
            .get_checkpoint(projection)
            .await?
            .map(|checkpoint| checkpoint.last_sequence);
        let ledger_max_sequence = self.ledger.get_max_sequence().await?;
        let missing_events = ledger_max_sequence.saturating_sub(last_sequence.unwrap_or(0));

        Ok(VerificationResult {
            projection_name: projection,
            is_synchronized: missing_events == 0,
            last_sequence,
            ledger_max_sequence,
            missing_events,
        })
    }

    /// Apply one event through the live path.
    ///
    /// Returns `false` when the event was already applied.
    ///
    /// # Errors
    ///
    /// - `UnknownProjection` / `HandlerNotRegistered` before any I/O
    /// - `Handler` or `Storage` errors; nothing is applied in that case
    pub async fn process_event(
        &self,
        projection: impl AsProjectionName,
        event: &GovernanceEvent,
    ) -> Result<bool> {
        let (projection, handler) = self.resolve(&projection)?;
        self.apply_one(projection, handler.as_ref(), event).await
    }

    fn resolve(
        &self,
        projection: &impl AsProjectionName,
    ) -> Result<(ProjectionName, Arc<dyn ProjectionHandler>)> {
        let projection = projection.to_projection_name()?;
        let handler = self
            .handlers
            .get(&projection)
            .cloned()
            .ok_or(ProjectionError::HandlerNotRegistered(projection))?;
        Ok((projection, handler))
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|shutdown| *shutdown.borrow())
    }

    async fn run(
        &self,
        projection: ProjectionName,
        handler: &dyn ProjectionHandler,
        mode: Mode,
    ) -> Result<RebuildResult> {
        let timer = Instant::now();
        tracing::info!(
            projection = %projection,
            mode = mode.as_str(),
            phase = %RebuildPhase::Idle,
            batch_size = self.batch_size,
            "Starting rebuild"
        );

        let outcome = self.replay(projection, handler, mode).await;

        let label = if outcome.is_ok() { "complete" } else { "failed" };
        metrics::counter!(
            "projection_rebuilds_total",
            "projection" => projection.as_str(),
            "mode" => mode.as_str(),
            "outcome" => label
        )
        .increment(1);
        metrics::histogram!(
            "projection_rebuild_duration_seconds",
            "projection" => projection.as_str(),
            "mode" => mode.as_str()
        )
        .record(timer.elapsed().as_secs_f64());

        match &outcome {
            Ok(result) => tracing::info!(
                projection = %projection,
                mode = mode.as_str(),
                phase = %RebuildPhase::Complete,
                events_processed = result.events_processed,
                events_applied = result.events_applied,
                events_skipped = result.events_skipped,
                batches = result.batches,
                end_sequence = ?result.end_sequence,
                "Rebuild complete"
            ),
            Err(e) => tracing::error!(
                projection = %projection,
                mode = mode.as_str(),
                phase = %RebuildPhase::Failed,
                error = %e,
                "Rebuild failed"
            ),
        }

        outcome
    }

    async fn replay(
        &self,
        projection: ProjectionName,
        handler: &dyn ProjectionHandler,
        mode: Mode,
    ) -> Result<RebuildResult> {
        let started_at = self.store.now();

        let start_sequence = match mode {
            Mode::Full => {
                tracing::info!(projection = %projection, phase = %RebuildPhase::Clearing, "Clearing projection");
                self.store.clear_projection(projection).await?;
                0
            }
            Mode::Incremental => self
                .store
                .get_checkpoint(projection)
                .await?
                .map_or(0, |checkpoint| checkpoint.last_sequence.saturating_add(1)),
        };

        let mut result = RebuildResult {
            projection_name: projection,
            events_processed: 0,
            events_applied: 0,
            events_skipped: 0,
            start_sequence,
            end_sequence: None,
            batches: 0,
            started_at,
            completed_at: started_at,
            is_full_rebuild: matches!(mode, Mode::Full),
        };

        let mut next = start_sequence;
        loop {
            if self.shutdown_requested() {
                tracing::warn!(
                    projection = %projection,
                    last_sequence = ?result.end_sequence,
                    "Shutdown requested, stopping rebuild between batches"
                );
                return Err(ProjectionError::RebuildInterrupted {
                    projection,
                    last_sequence: result.end_sequence,
                });
            }

            tracing::debug!(
                projection = %projection,
                phase = %RebuildPhase::Streaming,
                from_sequence = next,
                "Reading batch"
            );
            let batch = self
                .ledger
                .read_events(ReadOptions::from_sequence(next, self.batch_size))
                .await?;
            let Some(last) = batch.last() else {
                break;
            };

            for event in &batch {
                result.events_processed += 1;
                if self.apply_one(projection, handler, event).await? {
                    result.events_applied += 1;
                } else {
                    result.events_skipped += 1;
                }
            }

            tracing::debug!(
                projection = %projection,
                phase = %RebuildPhase::Checkpointing,
                sequence = last.sequence,
                "Checkpointing batch"
            );
            self.store
                .save_checkpoint(projection, last.event_id, &last.hash, last.sequence)
                .await?;
            metrics::counter!("projection_batches_total", "projection" => projection.as_str())
                .increment(1);

            result.batches += 1;
            result.end_sequence = Some(last.sequence);
            // Nothing can follow the last representable sequence
            let Some(following) = last.sequence.checked_add(1) else {
                break;
            };
            next = following;
        }

        result.completed_at = self.store.now();
        Ok(result)
    }

    /// The per-event routine shared by rebuilds and the live path.
    async fn apply_one(
        &self,
        projection: ProjectionName,
        handler: &dyn ProjectionHandler,
        event: &GovernanceEvent,
    ) -> Result<bool> {
        if self.store.is_event_applied(projection, event.event_id).await? {
            tracing::trace!(
                projection = %projection,
                event_id = %event.event_id,
                sequence = event.sequence,
                "Skipping applied event"
            );
            metrics::counter!("projection_events_skipped_total", "projection" => projection.as_str())
                .increment(1);
            return Ok(false);
        }

        let mutations = handler
            .handle(event, event.sequence)
            .await
            .map_err(|e| ProjectionError::Handler {
                projection,
                event_id: event.event_id,
                sequence: event.sequence,
                source: Box::new(e),
            })?;

        let applied = self
            .store
            .apply_event(projection, event, event.sequence, mutations)
            .await?;

        let counter = if applied {
            "projection_events_applied_total"
        } else {
            "projection_events_skipped_total"
        };
        metrics::counter!(counter, "projection" => projection.as_str()).increment(1);

        tracing::trace!(
            projection = %projection,
            event_id = %event.event_id,
            event_type = %event.event_type,
            sequence = event.sequence,
            applied,
            "Event processed"
        );
        Ok(applied)
    }
}

impl fmt::Debug for RebuildOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebuildOrchestrator")
            .field("handlers", &self.registered_projections())
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use governance_testing::{InMemoryLedger, InMemoryProjectionBackend, test_clock};
    use serde_json::json;

    fn orchestrator(ledger: &InMemoryLedger) -> RebuildOrchestrator {
        let store = Arc::new(ProjectionStore::with_clock(
            Arc::new(InMemoryProjectionBackend::new()),
            Arc::new(test_clock()),
        ));
        RebuildOrchestrator::new(Arc::new(ledger.clone()), store).with_default_handlers()
    }

    #[test]
    fn test_batch_size_is_at_least_one() {
        let ledger = InMemoryLedger::new();
        let orchestrator = orchestrator(&ledger).with_batch_size(0);
        assert_eq!(orchestrator.batch_size, 1);
    }

    #[tokio::test]
    async fn test_one_checkpoint_per_batch() {
        let ledger = InMemoryLedger::new();
        for i in 0..7 {
            ledger.append("actor.registered", json!({"actor_id": format!("a{i}"), "actor_type": "knight"}));
        }

        let result = orchestrator(&ledger)
            .with_batch_size(3)
            .rebuild_full(ProjectionName::ActorRegistry)
            .await
            .unwrap();

        assert_eq!(result.batches, 3);
        assert_eq!(result.events_processed, 7);
        assert_eq!(result.end_sequence, Some(7));
    }

    #[tokio::test]
    async fn test_empty_ledger_rebuild_has_no_batches() {
        let ledger = InMemoryLedger::new();
        let result = orchestrator(&ledger)
            .rebuild_full(ProjectionName::PanelRegistry)
            .await
            .unwrap();

        assert_eq!(result.batches, 0);
        assert_eq!(result.end_sequence, None);
        assert!(result.is_full_rebuild);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(RebuildPhase::Checkpointing.to_string(), "checkpointing");
        assert_eq!(RebuildPhase::Failed.as_str(), "failed");
    }
}
