//! Typed read API over the projections.
//!
//! Read-only: nothing here can write projection data or reach the ledger.

use crate::store::ProjectionStore;
use governance_core::projection::{ProjectionError, RecordFilter, Result};
use governance_core::records::{
    ActorRegistryRecord, Branch, LegitimacyBand, LegitimacyStateRecord, PanelRegistryRecord,
    PanelStatus, PetitionIndexRecord, PetitionStatus, ProjectionRecord, TaskState,
    TaskStateRecord,
};
use serde_json::Value;
use std::sync::Arc;

/// Query facade returning typed records.
///
/// # Example
///
/// ```
/// use governance_projections::{GovernanceReadModel, ProjectionStore};
/// use governance_testing::InMemoryProjectionBackend;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let store = Arc::new(ProjectionStore::new(Arc::new(InMemoryProjectionBackend::new())));
/// let read_model = GovernanceReadModel::new(store);
///
/// assert!(read_model.get_task_state("task-1").await.unwrap().is_none());
/// assert!(!read_model.actor_exists("earl-1").await.unwrap());
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct GovernanceReadModel {
    store: Arc<ProjectionStore>,
}

impl GovernanceReadModel {
    /// Create a read model over `store`.
    #[must_use]
    pub const fn new(store: Arc<ProjectionStore>) -> Self {
        Self { store }
    }

    /// Current state of a task.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or an undecodable record.
    pub async fn get_task_state(&self, task_id: &str) -> Result<Option<TaskStateRecord>> {
        self.get(task_id).await
    }

    /// Tasks currently in `state`, ordered by task id.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or an undecodable record.
    pub async fn get_tasks_by_state(
        &self,
        state: TaskState,
        limit: usize,
    ) -> Result<Vec<TaskStateRecord>> {
        self.list(RecordFilter::eq("current_state", state.as_str()), limit)
            .await
    }

    /// Current legitimacy band of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or an undecodable record.
    pub async fn get_legitimacy_state(
        &self,
        entity_id: &str,
    ) -> Result<Option<LegitimacyStateRecord>> {
        self.get(entity_id).await
    }

    /// Entities currently in `band`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or an undecodable record.
    pub async fn get_entities_by_band(
        &self,
        band: LegitimacyBand,
        limit: usize,
    ) -> Result<Vec<LegitimacyStateRecord>> {
        self.list(RecordFilter::eq("current_band", band.as_str()), limit)
            .await
    }

    /// A judicial panel.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or an undecodable record.
    pub async fn get_panel(&self, panel_id: &str) -> Result<Option<PanelRegistryRecord>> {
        self.get(panel_id).await
    }

    /// Panels currently in `status`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or an undecodable record.
    pub async fn get_panels_by_status(
        &self,
        status: PanelStatus,
        limit: usize,
    ) -> Result<Vec<PanelRegistryRecord>> {
        self.list(RecordFilter::eq("status", status.as_str()), limit)
            .await
    }

    /// A petition.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or an undecodable record.
    pub async fn get_petition(&self, petition_id: &str) -> Result<Option<PetitionIndexRecord>> {
        self.get(petition_id).await
    }

    /// Petitions currently in `status`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or an undecodable record.
    pub async fn get_petitions_by_status(
        &self,
        status: PetitionStatus,
        limit: usize,
    ) -> Result<Vec<PetitionIndexRecord>> {
        self.list(RecordFilter::eq("status", status.as_str()), limit)
            .await
    }

    /// A registered actor.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or an undecodable record.
    pub async fn get_actor(&self, actor_id: &str) -> Result<Option<ActorRegistryRecord>> {
        self.get(actor_id).await
    }

    /// Whether an actor is registered (active or not).
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn actor_exists(&self, actor_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get_record(ActorRegistryRecord::PROJECTION, actor_id)
            .await?
            .is_some())
    }

    /// Actors serving in `branch`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or an undecodable record.
    pub async fn get_actors_by_branch(
        &self,
        branch: Branch,
        limit: usize,
    ) -> Result<Vec<ActorRegistryRecord>> {
        self.list(RecordFilter::eq("branch", branch.as_str()), limit)
            .await
    }

    async fn get<R: ProjectionRecord>(&self, entity_id: &str) -> Result<Option<R>> {
        self.store
            .get_record(R::PROJECTION, entity_id)
            .await?
            .map(|value| decode::<R>(entity_id, value))
            .transpose()
    }

    async fn list<R: ProjectionRecord>(&self, filter: RecordFilter, limit: usize) -> Result<Vec<R>> {
        self.store
            .list_records(R::PROJECTION, Some(filter), limit)
            .await?
            .into_iter()
            .map(|value| {
                let entity_id = value
                    .get(R::ID_FIELD)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                decode::<R>(&entity_id, value)
            })
            .collect()
    }
}

fn decode<R: ProjectionRecord>(entity_id: &str, value: Value) -> Result<R> {
    R::from_value(value).map_err(|source| ProjectionError::InvalidRecord {
        projection: R::PROJECTION,
        entity_id: entity_id.to_string(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use governance_core::projection::{ProjectionBackend, ProjectionName};
    use governance_testing::InMemoryProjectionBackend;
    use serde_json::json;

    #[tokio::test]
    async fn test_corrupt_stored_record_surfaces_as_invalid_record() {
        let backend = Arc::new(InMemoryProjectionBackend::new());
        let event = governance_testing::InMemoryLedger::build(1, "noop", json!({}));
        backend
            .commit_apply(
                governance_core::projection::ApplyRecord {
                    projection_name: ProjectionName::TaskStates,
                    event_id: event.event_id,
                    event_hash: event.hash.clone(),
                    sequence: 1,
                    applied_at: event.timestamp,
                },
                vec![governance_core::projection::RecordMutation::Upsert {
                    entity_id: "t1".to_string(),
                    record: json!({"task_id": "t1", "current_state": "vanished"}),
                }],
            )
            .await
            .unwrap();

        let read_model = GovernanceReadModel::new(Arc::new(ProjectionStore::new(backend)));
        let err = read_model.get_task_state("t1").await.unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidRecord { .. }));
    }
}
