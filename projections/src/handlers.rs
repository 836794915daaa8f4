//! Projection handlers.
//!
//! A handler turns one ledger event into the record mutations of one
//! projection. It reads current records but never writes: the orchestrator
//! hands the mutations to [`ProjectionStore::apply_event`], which commits them
//! together with the apply record.
//!
//! [`RecordHandler`] is the generic handler for every typed record: it asks the
//! [`EventRouter`] for updates, folds each one into the stored record and
//! returns the replacement snapshots.

use crate::store::ProjectionStore;
use governance_core::event::GovernanceEvent;
use governance_core::projection::{
    ProjectionError, ProjectionName, ProjectionUpdate, RecordMutation, Result, UpdateType,
};
use governance_core::records::{
    ActorRegistryRecord, LegitimacyStateRecord, PanelRegistryRecord, PetitionIndexRecord,
    ProjectionRecord, RecordError, TaskStateRecord,
};
use governance_core::router::EventRouter;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Computes the record mutations an event implies for one projection.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the orchestrator can keep
/// heterogeneous handlers as `Arc<dyn ProjectionHandler>`.
pub trait ProjectionHandler: Send + Sync {
    /// Mutations for `event` at ledger position `sequence`.
    ///
    /// An event the projection does not care about yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is malformed, a record fails validation,
    /// or current state cannot be read.
    fn handle<'a>(
        &'a self,
        event: &'a GovernanceEvent,
        sequence: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordMutation>>> + Send + 'a>>;
}

/// Generic handler for a typed projection record.
///
/// # Example
///
/// ```
/// use governance_core::records::TaskStateRecord;
/// use governance_projections::{ProjectionHandler, ProjectionStore, RecordHandler};
/// use governance_testing::{InMemoryLedger, InMemoryProjectionBackend};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let store = Arc::new(ProjectionStore::new(Arc::new(InMemoryProjectionBackend::new())));
/// let handler = RecordHandler::<TaskStateRecord>::new(Arc::clone(&store));
///
/// let event = InMemoryLedger::build(1, "executive.task.created", json!({"task_id": "task-1"}));
/// let mutations = handler.handle(&event, 1).await.unwrap();
/// assert_eq!(mutations.len(), 1);
/// assert_eq!(mutations[0].entity_id(), "task-1");
/// # });
/// ```
pub struct RecordHandler<R> {
    router: EventRouter,
    store: Arc<ProjectionStore>,
    _record: PhantomData<fn() -> R>,
}

impl<R: ProjectionRecord> RecordHandler<R> {
    /// Create a handler reading current records from `store`.
    #[must_use]
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        Self {
            router: EventRouter::new(),
            store,
            _record: PhantomData,
        }
    }

    async fn load(&self, entity_id: &str) -> Result<Option<R>> {
        self.store
            .get_record(R::PROJECTION, entity_id)
            .await?
            .map(|value| R::from_value(value).map_err(|e| invalid::<R>(entity_id, e)))
            .transpose()
    }

    /// Fold one update into the current snapshot.
    ///
    /// `staged` holds snapshots produced earlier for the same event, which
    /// take precedence over what is stored.
    async fn fold(
        &self,
        update: ProjectionUpdate,
        staged: &HashMap<String, Option<R>>,
        sequence: u64,
    ) -> Result<Option<R>> {
        let entity_id = update.entity_id.as_str();
        let current = match staged.get(entity_id) {
            Some(snapshot) => snapshot.clone(),
            None => self.load(entity_id).await?,
        };

        let next = match (update.update_type, current) {
            (UpdateType::Delete, _) => return Ok(None),
            (UpdateType::Update, Some(current)) => {
                let next = current
                    .merge(&update.fields)
                    .map_err(|e| invalid::<R>(entity_id, e))?;
                let _ = check_transition(&current, &next, sequence);
                next
            }
            (UpdateType::Update, None) => {
                tracing::warn!(
                    projection = %R::PROJECTION,
                    entity_id,
                    sequence,
                    "Update for unknown entity, building it from the event"
                );
                R::from_fields(entity_id, &update.fields).map_err(|e| invalid::<R>(entity_id, e))?
            }
            (UpdateType::Create, current) => {
                let next = R::from_fields(entity_id, &update.fields)
                    .map_err(|e| invalid::<R>(entity_id, e))?;
                if let Some(current) = current {
                    tracing::debug!(
                        projection = %R::PROJECTION,
                        entity_id,
                        sequence,
                        "Create replaces an existing record"
                    );
                    let _ = check_transition(&current, &next, sequence);
                }
                next
            }
        };
        Ok(Some(next))
    }
}

impl<R: ProjectionRecord> ProjectionHandler for RecordHandler<R> {
    fn handle<'a>(
        &'a self,
        event: &'a GovernanceEvent,
        sequence: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordMutation>>> + Send + 'a>> {
        Box::pin(async move {
            let updates = self.router.route(event, sequence, self.store.now())?;

            let mut staged: HashMap<String, Option<R>> = HashMap::new();
            let mut order = Vec::new();
            for update in updates
                .into_iter()
                .filter(|update| update.projection_name == R::PROJECTION)
            {
                let entity_id = update.entity_id.clone();
                let next = self.fold(update, &staged, sequence).await?;
                if !staged.contains_key(&entity_id) {
                    order.push(entity_id.clone());
                }
                staged.insert(entity_id, next);
            }

            order
                .into_iter()
                .map(|entity_id| match staged.remove(&entity_id).flatten() {
                    Some(record) => record
                        .to_value()
                        .map(|record| RecordMutation::Upsert {
                            entity_id: entity_id.clone(),
                            record,
                        })
                        .map_err(|e| ProjectionError::Serialization(e.to_string())),
                    None => Ok(RecordMutation::Delete { entity_id }),
                })
                .collect()
        })
    }
}

/// Handlers for every projection in the registry.
#[must_use]
pub fn default_handlers(
    store: &Arc<ProjectionStore>,
) -> Vec<(ProjectionName, Arc<dyn ProjectionHandler>)> {
    ProjectionName::ALL
        .into_iter()
        .map(|name| {
            let handler: Arc<dyn ProjectionHandler> = match name {
                ProjectionName::TaskStates => {
                    Arc::new(RecordHandler::<TaskStateRecord>::new(Arc::clone(store)))
                }
                ProjectionName::LegitimacyStates => {
                    Arc::new(RecordHandler::<LegitimacyStateRecord>::new(Arc::clone(store)))
                }
                ProjectionName::PanelRegistry => {
                    Arc::new(RecordHandler::<PanelRegistryRecord>::new(Arc::clone(store)))
                }
                ProjectionName::PetitionIndex => {
                    Arc::new(RecordHandler::<PetitionIndexRecord>::new(Arc::clone(store)))
                }
                ProjectionName::ActorRegistry => {
                    Arc::new(RecordHandler::<ActorRegistryRecord>::new(Arc::clone(store)))
                }
            };
            (name, handler)
        })
        .collect()
}

fn invalid<R: ProjectionRecord>(entity_id: &str, source: RecordError) -> ProjectionError {
    ProjectionError::InvalidRecord {
        projection: R::PROJECTION,
        entity_id: entity_id.to_string(),
        source,
    }
}

// Projections trust the ledger: an unexpected move is reported, not refused.
fn check_transition<R: ProjectionRecord>(current: &R, next: &R, sequence: u64) -> bool {
    if current.allows_transition_to(next) {
        return true;
    }

    tracing::warn!(
        projection = %R::PROJECTION,
        entity_id = current.entity_id(),
        from = current.lifecycle_state().unwrap_or("-"),
        to = next.lifecycle_state().unwrap_or("-"),
        sequence,
        "Unexpected lifecycle transition"
    );
    metrics::counter!(
        "projection_unexpected_transitions_total",
        "projection" => R::PROJECTION.as_str()
    )
    .increment(1);
    false
}
