//! Integration tests for the projection store facade.

#![allow(clippy::unwrap_used)]

use governance_core::Clock;
use governance_core::projection::{ProjectionError, ProjectionName, RecordFilter, RecordMutation};
use governance_projections::ProjectionStore;
use governance_testing::{CountingBackend, InMemoryLedger, InMemoryProjectionBackend, test_clock};
use serde_json::json;
use std::sync::Arc;

fn store_over(backend: &InMemoryProjectionBackend) -> ProjectionStore {
    ProjectionStore::with_clock(Arc::new(backend.clone()), Arc::new(test_clock()))
}

fn upsert(entity_id: &str) -> Vec<RecordMutation> {
    vec![RecordMutation::Upsert {
        entity_id: entity_id.to_string(),
        record: json!({"task_id": entity_id, "current_state": "pending"}),
    }]
}

#[tokio::test]
async fn test_applying_the_same_event_twice_is_a_no_op() {
    let backend = InMemoryProjectionBackend::new();
    let store = store_over(&backend);
    let event = InMemoryLedger::build(1, "executive.task.created", json!({"task_id": "t1"}));

    let first = store
        .apply_event("task_states", &event, 1, upsert("t1"))
        .await
        .unwrap();
    let second = store
        .apply_event("task_states", &event, 1, upsert("t1"))
        .await
        .unwrap();

    assert!(first);
    assert!(!second);
    assert_eq!(backend.apply_count(ProjectionName::TaskStates), 1);

    let record = store
        .get_apply_record("task_states", event.event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.sequence, 1);
    assert_eq!(record.event_hash, event.hash);
    assert_eq!(record.applied_at, test_clock().now());
}

#[tokio::test]
async fn test_apply_records_are_per_projection() {
    let backend = InMemoryProjectionBackend::new();
    let store = store_over(&backend);
    let event = InMemoryLedger::build(1, "executive.task.created", json!({"task_id": "t1"}));

    assert!(store.apply_event("task_states", &event, 1, upsert("t1")).await.unwrap());
    assert!(store.apply_event("actor_registry", &event, 1, Vec::new()).await.unwrap());

    assert!(store.is_event_applied("task_states", event.event_id).await.unwrap());
    assert!(store.is_event_applied("actor_registry", event.event_id).await.unwrap());
    assert!(!store.is_event_applied("panel_registry", event.event_id).await.unwrap());
    assert_eq!(backend.record_count(ProjectionName::ActorRegistry), 0);
}

#[tokio::test]
async fn test_failed_commit_leaves_no_trace() {
    let backend = InMemoryProjectionBackend::new();
    let store = store_over(&backend);
    let event = InMemoryLedger::build(3, "executive.task.created", json!({"task_id": "t1"}));
    backend.fail_commits_for(event.event_id);

    let err = store
        .apply_event("task_states", &event, 3, upsert("t1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProjectionError::Storage(_)));
    assert!(!store.is_event_applied("task_states", event.event_id).await.unwrap());
    assert_eq!(backend.record_count(ProjectionName::TaskStates), 0);
}

#[tokio::test]
async fn test_unknown_projection_fails_before_any_backend_call() {
    let backend = CountingBackend::new();
    let store = ProjectionStore::new(Arc::new(backend.clone()));
    let event = InMemoryLedger::build(1, "executive.task.created", json!({"task_id": "t1"}));

    let err = store.clear_projection("bogus_projection").await.unwrap_err();
    assert!(matches!(err, ProjectionError::UnknownProjection(ref name) if name == "bogus_projection"));

    assert!(store.apply_event("bogus_projection", &event, 1, Vec::new()).await.is_err());
    assert!(store.get_checkpoint("bogus_projection").await.is_err());
    assert!(store.get_record("bogus_projection", "t1").await.is_err());
    assert!(store.list_records("bogus_projection", None, 10).await.is_err());
    assert!(
        store
            .save_checkpoint("bogus_projection", event.event_id, &event.hash, 1)
            .await
            .is_err()
    );

    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_checkpoints_only_move_forward() {
    let backend = InMemoryProjectionBackend::new();
    let store = store_over(&backend);
    let e5 = InMemoryLedger::build(5, "noop", json!({}));
    let e9 = InMemoryLedger::build(9, "noop", json!({}));

    store.save_checkpoint("task_states", e5.event_id, &e5.hash, 5).await.unwrap();
    let saved = store.save_checkpoint("task_states", e9.event_id, &e9.hash, 9).await.unwrap();
    assert_eq!(saved.last_sequence, 9);
    assert_eq!(saved.last_hash, e9.hash);

    // Saving the same position again is allowed
    store.save_checkpoint("task_states", e9.event_id, &e9.hash, 9).await.unwrap();

    let err = store
        .save_checkpoint("task_states", e5.event_id, &e5.hash, 5)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProjectionError::CheckpointRegression {
            projection: ProjectionName::TaskStates,
            current: 9,
            attempted: 5,
        }
    ));

    let checkpoint = store.get_checkpoint("task_states").await.unwrap().unwrap();
    assert_eq!(checkpoint.last_sequence, 9);
    assert_eq!(checkpoint.last_event_id, e9.event_id);
}

#[tokio::test]
async fn test_clear_projection_removes_records_applies_and_checkpoint() {
    let backend = InMemoryProjectionBackend::new();
    let store = store_over(&backend);

    for sequence in 1..=3 {
        let event = InMemoryLedger::build(sequence, "executive.task.created", json!({}));
        store
            .apply_event("task_states", &event, sequence, upsert(&format!("t{sequence}")))
            .await
            .unwrap();
    }
    let actor_event = InMemoryLedger::build(4, "actor.registered", json!({}));
    store
        .apply_event(
            "actor_registry",
            &actor_event,
            4,
            vec![RecordMutation::Upsert {
                entity_id: "a1".to_string(),
                record: json!({"actor_id": "a1"}),
            }],
        )
        .await
        .unwrap();
    store
        .save_checkpoint("task_states", actor_event.event_id, &actor_event.hash, 3)
        .await
        .unwrap();

    let deleted = store.clear_projection("task_states").await.unwrap();

    assert_eq!(deleted, 3);
    assert_eq!(backend.record_count(ProjectionName::TaskStates), 0);
    assert_eq!(backend.apply_count(ProjectionName::TaskStates), 0);
    assert!(store.get_checkpoint("task_states").await.unwrap().is_none());

    // Other projections are untouched
    assert_eq!(backend.record_count(ProjectionName::ActorRegistry), 1);
    assert_eq!(backend.apply_count(ProjectionName::ActorRegistry), 1);
}

#[tokio::test]
async fn test_list_records_filters_and_limits() {
    let backend = InMemoryProjectionBackend::new();
    let store = store_over(&backend);

    let states = ["pending", "accepted", "pending", "pending"];
    for (sequence, state) in (1u64..).zip(states) {
        let event = InMemoryLedger::build(sequence, "executive.task.created", json!({}));
        let entity_id = format!("t{sequence}");
        store
            .apply_event(
                "task_states",
                &event,
                sequence,
                vec![RecordMutation::Upsert {
                    entity_id: entity_id.clone(),
                    record: json!({"task_id": entity_id, "current_state": state}),
                }],
            )
            .await
            .unwrap();
    }

    let pending = store
        .list_records(
            "task_states",
            Some(RecordFilter::eq("current_state", "pending")),
            2,
        )
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|r| r["current_state"] == "pending"));

    let all = store.list_records("task_states", None, 100).await.unwrap();
    assert_eq!(all.len(), 4);

    let record = store.get_record("task_states", "t2").await.unwrap().unwrap();
    assert_eq!(record["current_state"], "accepted");
    assert!(store.get_record("task_states", "t9").await.unwrap().is_none());
}

#[test]
fn test_projection_names_are_the_closed_registry() {
    let store = ProjectionStore::new(Arc::new(InMemoryProjectionBackend::new()));
    let names: Vec<&str> = store
        .get_projection_names()
        .into_iter()
        .map(ProjectionName::as_str)
        .collect();
    assert_eq!(
        names,
        [
            "task_states",
            "legitimacy_states",
            "panel_registry",
            "petition_index",
            "actor_registry"
        ]
    );
}
