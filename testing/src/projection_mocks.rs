//! In-memory projection testing utilities
//!
//! Provides fast, deterministic testing infrastructure for projections:
//! - [`InMemoryProjectionBackend`]: HashMap-based projection storage
//! - [`CountingBackend`]: call counter with no storage at all

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use governance_core::projection::{
    ApplyRecord, ProjectionBackend, ProjectionCheckpoint, ProjectionError, ProjectionName,
    RecordFilter, RecordMutation, Result,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, Default)]
struct BackendState {
    records: HashMap<ProjectionName, BTreeMap<String, Value>>,
    applies: HashMap<(ProjectionName, Uuid), ApplyRecord>,
    checkpoints: HashMap<ProjectionName, ProjectionCheckpoint>,
}

/// In-memory projection backend for fast, deterministic testing.
///
/// A single lock guards records, apply records and checkpoints, so
/// `commit_apply` is atomic exactly like a database transaction.
///
/// # Example
///
/// ```
/// use governance_testing::InMemoryProjectionBackend;
/// use governance_core::projection::{ProjectionBackend, ProjectionName};
///
/// # tokio_test::block_on(async {
/// let backend = InMemoryProjectionBackend::new();
/// let cleared = backend.clear_projection(ProjectionName::TaskStates).await.unwrap();
/// assert_eq!(cleared, 0);
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryProjectionBackend {
    state: Arc<RwLock<BackendState>>,
    failing_events: Arc<RwLock<HashSet<Uuid>>>,
}

impl InMemoryProjectionBackend {
    /// Create a new empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `commit_apply` for `event_id` fail with a storage error.
    pub fn fail_commits_for(&self, event_id: Uuid) {
        self.failing_events.write().unwrap().insert(event_id);
    }

    /// Undo every injected failure.
    pub fn heal(&self) {
        self.failing_events.write().unwrap().clear();
    }

    /// Records of a projection keyed by entity id.
    ///
    /// Useful for comparing two projections for equivalence.
    #[must_use]
    pub fn snapshot(&self, projection: ProjectionName) -> BTreeMap<String, Value> {
        self.state
            .read()
            .unwrap()
            .records
            .get(&projection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of records in a projection.
    #[must_use]
    pub fn record_count(&self, projection: ProjectionName) -> usize {
        self.state
            .read()
            .unwrap()
            .records
            .get(&projection)
            .map_or(0, BTreeMap::len)
    }

    /// Number of apply records for a projection.
    #[must_use]
    pub fn apply_count(&self, projection: ProjectionName) -> usize {
        self.state
            .read()
            .unwrap()
            .applies
            .keys()
            .filter(|(name, _)| *name == projection)
            .count()
    }

    /// Current checkpoint of a projection, read synchronously.
    #[must_use]
    pub fn checkpoint(&self, projection: ProjectionName) -> Option<ProjectionCheckpoint> {
        self.state
            .read()
            .unwrap()
            .checkpoints
            .get(&projection)
            .cloned()
    }
}

impl ProjectionBackend for InMemoryProjectionBackend {
    fn has_apply_record(
        &self,
        projection: ProjectionName,
        event_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .applies
                .contains_key(&(projection, event_id)))
        })
    }

    fn get_apply_record(
        &self,
        projection: ProjectionName,
        event_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ApplyRecord>>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .applies
                .get(&(projection, event_id))
                .cloned())
        })
    }

    fn commit_apply(
        &self,
        record: ApplyRecord,
        mutations: Vec<RecordMutation>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move {
            if self.failing_events.read().unwrap().contains(&record.event_id) {
                return Err(ProjectionError::Storage(format!(
                    "injected commit failure for event {}",
                    record.event_id
                )));
            }

            let mut state = self.state.write().unwrap();
            let key = (record.projection_name, record.event_id);
            if state.applies.contains_key(&key) {
                return Ok(false);
            }

            let records = state.records.entry(record.projection_name).or_default();
            for mutation in mutations {
                match mutation {
                    RecordMutation::Upsert { entity_id, record: value } => {
                        records.insert(entity_id, value);
                    }
                    RecordMutation::Delete { entity_id } => {
                        records.remove(&entity_id);
                    }
                }
            }
            state.applies.insert(key, record);
            Ok(true)
        })
    }

    fn get_checkpoint(
        &self,
        projection: ProjectionName,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectionCheckpoint>>> + Send + '_>> {
        Box::pin(async move { Ok(self.checkpoint(projection)) })
    }

    fn save_checkpoint(
        &self,
        checkpoint: ProjectionCheckpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if let Some(current) = state.checkpoints.get(&checkpoint.projection_name) {
                if current.last_sequence > checkpoint.last_sequence {
                    return Err(ProjectionError::CheckpointRegression {
                        projection: checkpoint.projection_name,
                        current: current.last_sequence,
                        attempted: checkpoint.last_sequence,
                    });
                }
            }
            state
                .checkpoints
                .insert(checkpoint.projection_name, checkpoint);
            Ok(())
        })
    }

    fn clear_projection(
        &self,
        projection: ProjectionName,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let deleted = state
                .records
                .remove(&projection)
                .map_or(0, |records| records.len());
            state.applies.retain(|(name, _), _| *name != projection);
            state.checkpoints.remove(&projection);
            Ok(deleted as u64)
        })
    }

    fn get_record(
        &self,
        projection: ProjectionName,
        entity_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>>> + Send + '_>> {
        let entity_id = entity_id.to_string();
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .records
                .get(&projection)
                .and_then(|records| records.get(&entity_id))
                .cloned())
        })
    }

    fn list_records(
        &self,
        projection: ProjectionName,
        filter: Option<RecordFilter>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Value>>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .records
                .get(&projection)
                .map(|records| {
                    records
                        .values()
                        .filter(|record| filter.as_ref().is_none_or(|f| f.matches(record)))
                        .take(limit)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }
}

/// Backend that stores nothing and counts every call.
///
/// Lets a test prove that an operation was rejected before reaching storage.
///
/// # Example
///
/// ```
/// use governance_testing::CountingBackend;
///
/// let backend = CountingBackend::new();
/// assert_eq!(backend.calls(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct CountingBackend {
    calls: Arc<AtomicUsize>,
}

impl CountingBackend {
    /// Create a backend with a zero count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backend calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl ProjectionBackend for CountingBackend {
    fn has_apply_record(
        &self,
        _projection: ProjectionName,
        _event_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        self.tick();
        Box::pin(async { Ok(false) })
    }

    fn get_apply_record(
        &self,
        _projection: ProjectionName,
        _event_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ApplyRecord>>> + Send + '_>> {
        self.tick();
        Box::pin(async { Ok(None) })
    }

    fn commit_apply(
        &self,
        _record: ApplyRecord,
        _mutations: Vec<RecordMutation>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        self.tick();
        Box::pin(async { Ok(true) })
    }

    fn get_checkpoint(
        &self,
        _projection: ProjectionName,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectionCheckpoint>>> + Send + '_>> {
        self.tick();
        Box::pin(async { Ok(None) })
    }

    fn save_checkpoint(
        &self,
        _checkpoint: ProjectionCheckpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.tick();
        Box::pin(async { Ok(()) })
    }

    fn clear_projection(
        &self,
        _projection: ProjectionName,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        self.tick();
        Box::pin(async { Ok(0) })
    }

    fn get_record(
        &self,
        _projection: ProjectionName,
        _entity_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>>> + Send + '_>> {
        self.tick();
        Box::pin(async { Ok(None) })
    }

    fn list_records(
        &self,
        _projection: ProjectionName,
        _filter: Option<RecordFilter>,
        _limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Value>>> + Send + '_>> {
        self.tick();
        Box::pin(async { Ok(Vec::new()) })
    }
}
