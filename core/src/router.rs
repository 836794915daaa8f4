//! Event router: event → projection updates.
//!
//! # Overview
//!
//! The router is a pure function. Given an event, its ledger sequence and a
//! processing timestamp, it computes the field-level updates the event implies
//! for its projection. It reads nothing else: no clock, no randomness, no
//! stored state. The same `(event, sequence, now)` always yields the same
//! updates.
//!
//! # Dispatch
//!
//! The event type was classified into an [`EventFamily`] when the event was
//! parsed, so routing is an exhaustive `match` over the family followed by a
//! `match` over the action string.
//!
//! ```text
//! executive.task.accepted ─▶ EventFamily::Task, "accepted" ─▶ task_states / update
//! petition.review.started ─▶ EventFamily::Petition, "review.started" ─▶ petition_index / update
//! treasury.budget.approved ─▶ (no family) ─▶ []
//! ```
//!
//! # Forward Compatibility
//!
//! Event types with no known prefix, and unknown actions under a known prefix,
//! produce **no updates** rather than an error. A projector running behind the
//! ledger's schema must not halt replay.
//!
//! A known action whose payload lacks a required field is different: that is
//! a malformed event and surfaces as [`ProjectionError::MalformedEvent`].

use crate::event::{EventFamily, GovernanceEvent};
use crate::projection::{FieldMap, ProjectionError, ProjectionName, ProjectionUpdate, Result, UpdateType};
use crate::records::{BandTransition, TaskState};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Maps governance events to projection updates.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use governance_core::event::{EventType, GovernanceEvent};
/// use governance_core::projection::{ProjectionName, UpdateType};
/// use governance_core::router::EventRouter;
///
/// let event = GovernanceEvent {
///     event_id: uuid::Uuid::nil(),
///     event_type: EventType::new("executive.task.created"),
///     timestamp: Utc::now(),
///     actor_id: "earl-1".to_string(),
///     trace_id: "trace-1".to_string(),
///     payload: serde_json::json!({"task_id": "task-1"}).as_object().cloned().unwrap(),
///     hash: "h1".to_string(),
///     sequence: 1,
/// };
///
/// let updates = EventRouter::new().route(&event, 1, Utc::now()).unwrap();
/// assert_eq!(updates.len(), 1);
/// assert_eq!(updates[0].projection_name, ProjectionName::TaskStates);
/// assert_eq!(updates[0].update_type, UpdateType::Create);
/// assert_eq!(updates[0].fields["current_state"], "pending");
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct EventRouter;

impl EventRouter {
    /// Create a router.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compute the updates implied by `event`.
    ///
    /// Every update carries `last_event_sequence`, `last_event_id` and
    /// `updated_at` for traceability.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::MalformedEvent`] when a routable event is
    /// missing a required payload field.
    pub fn route(
        &self,
        event: &GovernanceEvent,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProjectionUpdate>> {
        let (Some(family), Some(action)) = (event.event_type.family(), event.event_type.action())
        else {
            tracing::trace!(
                event_type = %event.event_type,
                sequence,
                "No projection handles this event type"
            );
            return Ok(Vec::new());
        };

        let route = Route {
            event,
            sequence,
            now,
        };
        let update = match family {
            EventFamily::Task => route.task(action)?,
            EventFamily::Legitimacy => route.legitimacy(action)?,
            EventFamily::Panel => route.panel(action)?,
            EventFamily::Petition => route.petition(action)?,
            EventFamily::Actor => route.actor(action)?,
        };

        if update.is_none() {
            tracing::debug!(
                event_type = %event.event_type,
                projection = %family.projection(),
                action,
                sequence,
                "Unknown action for projection, ignoring"
            );
        }

        Ok(update.into_iter().collect())
    }
}

/// One routing invocation.
struct Route<'a> {
    event: &'a GovernanceEvent,
    sequence: u64,
    now: DateTime<Utc>,
}

impl Route<'_> {
    fn task(&self, action: &str) -> Result<Option<ProjectionUpdate>> {
        let task_id = match action {
            "created" => self.required_str("task_id")?,
            other => match other.parse::<TaskState>() {
                Ok(state) if state != TaskState::Pending => {
                    let task_id = self.required_str("task_id")?;
                    let mut fields = FieldMap::new();
                    fields.insert("current_state".into(), state.as_str().into());
                    fields.insert("state_entered_at".into(), self.event_time());
                    self.copy_if_present(&mut fields, "cluster_id");
                    return Ok(Some(self.update(
                        ProjectionName::TaskStates,
                        task_id,
                        UpdateType::Update,
                        fields,
                    )));
                }
                _ => return Ok(None),
            },
        };

        let mut fields = FieldMap::new();
        fields.insert("current_state".into(), TaskState::Pending.as_str().into());
        fields.insert("earl_id".into(), self.optional("earl_id"));
        fields.insert("cluster_id".into(), self.optional("cluster_id"));
        fields.insert("created_at".into(), self.event_time());
        fields.insert("state_entered_at".into(), self.event_time());
        Ok(Some(self.update(
            ProjectionName::TaskStates,
            task_id,
            UpdateType::Create,
            fields,
        )))
    }

    fn legitimacy(&self, action: &str) -> Result<Option<ProjectionUpdate>> {
        let mut fields = FieldMap::new();
        let update_type = match action {
            "entity.registered" => {
                fields.insert("entity_type".into(), self.optional("entity_type"));
                fields.insert(
                    "current_band".into(),
                    self.event.payload_str("band").unwrap_or("full").into(),
                );
                fields.insert("band_entered_at".into(), self.event_time());
                fields.insert("last_transition_reason".into(), Value::Null);
                fields.insert("last_transition".into(), Value::Null);
                UpdateType::Create
            }
            "band.decayed" | "band.restored" => {
                let transition = if action == "band.decayed" {
                    BandTransition::Decay
                } else {
                    BandTransition::Restoration
                };
                fields.insert("current_band".into(), self.required_str("new_band")?.into());
                fields.insert("band_entered_at".into(), self.event_time());
                fields.insert("last_transition_reason".into(), self.optional("reason"));
                fields.insert("last_transition".into(), transition.as_str().into());
                UpdateType::Update
            }
            _ => return Ok(None),
        };

        let entity_id = self.required_str("entity_id")?;
        Ok(Some(self.update(
            ProjectionName::LegitimacyStates,
            entity_id,
            update_type,
            fields,
        )))
    }

    fn panel(&self, action: &str) -> Result<Option<ProjectionUpdate>> {
        let mut fields = FieldMap::new();
        let update_type = match action {
            "created" => {
                fields.insert("status".into(), "pending".into());
                fields.insert(
                    "members".into(),
                    self.optional_or("members", Value::Array(Vec::new())),
                );
                fields.insert("subject_ref".into(), self.optional("subject_ref"));
                UpdateType::Create
            }
            "convened" => {
                fields.insert("status".into(), "convened".into());
                fields.insert("convened_at".into(), self.event_time());
                self.copy_if_present(&mut fields, "members");
                UpdateType::Update
            }
            "deliberation.started" => {
                fields.insert("status".into(), "deliberating".into());
                UpdateType::Update
            }
            "finding.issued" => {
                fields.insert("status".into(), "finding_issued".into());
                fields.insert("finding_id".into(), self.required_str("finding_id")?.into());
                fields.insert("finding_issued_at".into(), self.event_time());
                UpdateType::Update
            }
            "dissolved" => {
                fields.insert("status".into(), "dissolved".into());
                fields.insert("dissolved_at".into(), self.event_time());
                UpdateType::Update
            }
            _ => return Ok(None),
        };

        let panel_id = self.required_str("panel_id")?;
        Ok(Some(self.update(
            ProjectionName::PanelRegistry,
            panel_id,
            update_type,
            fields,
        )))
    }

    fn petition(&self, action: &str) -> Result<Option<ProjectionUpdate>> {
        let mut fields = FieldMap::new();
        let update_type = match action {
            "filed" => {
                // The filer is the petitioner unless the payload names someone else
                let petitioner = self
                    .event
                    .payload_str("petitioner_id")
                    .unwrap_or(&self.event.actor_id);
                fields.insert("status".into(), "filed".into());
                fields.insert("petitioner_id".into(), petitioner.into());
                fields.insert("subject".into(), self.optional("subject"));
                fields.insert("filed_at".into(), self.event_time());
                UpdateType::Create
            }
            "acknowledged" => {
                fields.insert("status".into(), "acknowledged".into());
                fields.insert("acknowledged_at".into(), self.event_time());
                UpdateType::Update
            }
            "review.started" => {
                fields.insert("status".into(), "under_review".into());
                UpdateType::Update
            }
            "resolved" => {
                fields.insert("status".into(), "resolved".into());
                fields.insert("resolution".into(), self.required_str("resolution")?.into());
                fields.insert("resolved_at".into(), self.event_time());
                UpdateType::Update
            }
            _ => return Ok(None),
        };

        let petition_id = self.required_str("petition_id")?;
        Ok(Some(self.update(
            ProjectionName::PetitionIndex,
            petition_id,
            update_type,
            fields,
        )))
    }

    fn actor(&self, action: &str) -> Result<Option<ProjectionUpdate>> {
        let mut fields = FieldMap::new();
        let update_type = match action {
            "registered" => {
                fields.insert("actor_type".into(), self.required_str("actor_type")?.into());
                fields.insert("branch".into(), self.optional("branch"));
                fields.insert("display_name".into(), self.optional("display_name"));
                fields.insert("active".into(), Value::Bool(true));
                fields.insert("registered_at".into(), self.event_time());
                UpdateType::Create
            }
            "deactivated" => {
                fields.insert("active".into(), Value::Bool(false));
                fields.insert("deactivated_at".into(), self.event_time());
                fields.insert("deactivation_reason".into(), self.optional("reason"));
                UpdateType::Update
            }
            "reactivated" => {
                fields.insert("active".into(), Value::Bool(true));
                fields.insert("deactivated_at".into(), Value::Null);
                fields.insert("deactivation_reason".into(), Value::Null);
                UpdateType::Update
            }
            "branch.reassigned" => {
                fields.insert("branch".into(), self.required_str("branch")?.into());
                UpdateType::Update
            }
            "erased" => UpdateType::Delete,
            _ => return Ok(None),
        };

        let actor_id = self.required_str("actor_id")?;
        Ok(Some(self.update(
            ProjectionName::ActorRegistry,
            actor_id,
            update_type,
            fields,
        )))
    }

    /// Assemble an update, stamping the traceability fields.
    fn update(
        &self,
        projection_name: ProjectionName,
        entity_id: &str,
        update_type: UpdateType,
        mut fields: FieldMap,
    ) -> ProjectionUpdate {
        fields.insert("last_event_sequence".into(), self.sequence.into());
        fields.insert(
            "last_event_id".into(),
            self.event.event_id.to_string().into(),
        );
        fields.insert("updated_at".into(), timestamp(self.now));

        ProjectionUpdate {
            projection_name,
            entity_id: entity_id.to_string(),
            update_type,
            fields,
        }
    }

    fn required_str(&self, key: &str) -> Result<&str> {
        match self.event.payload_value(key) {
            Some(Value::String(value)) if !value.is_empty() => Ok(value),
            Some(other) => Err(self.malformed(format!(
                "payload field {key} must be a non-empty string, got {other}"
            ))),
            None => Err(self.malformed(format!("payload field {key} is required"))),
        }
    }

    fn optional(&self, key: &str) -> Value {
        self.optional_or(key, Value::Null)
    }

    fn optional_or(&self, key: &str, default: Value) -> Value {
        self.event.payload_value(key).cloned().unwrap_or(default)
    }

    fn copy_if_present(&self, fields: &mut FieldMap, key: &str) {
        if let Some(value) = self.event.payload_value(key) {
            fields.insert(key.to_string(), value.clone());
        }
    }

    fn event_time(&self) -> Value {
        timestamp(self.event.timestamp)
    }

    fn malformed(&self, reason: String) -> ProjectionError {
        ProjectionError::MalformedEvent {
            event_id: self.event.event_id,
            event_type: self.event.event_type.to_string(),
            reason,
        }
    }
}

/// RFC 3339 in the same form chrono's serde support writes.
fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use serde_json::json;
    use uuid::Uuid;

    fn event(event_type: &str, payload: Value) -> GovernanceEvent {
        GovernanceEvent {
            event_id: Uuid::from_u128(7),
            event_type: EventType::new(event_type),
            timestamp: DateTime::parse_from_rfc3339("2025-01-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            actor_id: "actor-0".to_string(),
            trace_id: "trace".to_string(),
            payload: payload.as_object().cloned().unwrap(),
            hash: "hash".to_string(),
            sequence: 7,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_unknown_prefix_yields_no_updates() {
        let updates = EventRouter::new()
            .route(&event("treasury.budget.approved", json!({})), 1, now())
            .unwrap();
        assert!(updates.is_empty());
    }

    #[test]
    fn test_unknown_action_under_known_prefix_yields_no_updates() {
        let updates = EventRouter::new()
            .route(&event("executive.task.reminder.sent", json!({"task_id": "t"})), 1, now())
            .unwrap();
        assert!(updates.is_empty());

        // "pending" is a state but not a verb
        let updates = EventRouter::new()
            .route(&event("executive.task.pending", json!({"task_id": "t"})), 1, now())
            .unwrap();
        assert!(updates.is_empty());
    }

    #[test]
    fn test_every_update_is_traceable() {
        let cases = [
            ("executive.task.created", json!({"task_id": "t1"})),
            ("legitimacy.entity.registered", json!({"entity_id": "realm-1"})),
            ("judicial.panel.created", json!({"panel_id": "p1"})),
            ("petition.filed", json!({"petition_id": "pe1"})),
            ("actor.registered", json!({"actor_id": "a1", "actor_type": "earl"})),
            ("actor.erased", json!({"actor_id": "a1"})),
        ];

        for (event_type, payload) in cases {
            let updates = EventRouter::new()
                .route(&event(event_type, payload), 42, now())
                .unwrap();
            assert_eq!(updates.len(), 1, "{event_type}");
            let fields = &updates[0].fields;
            assert_eq!(fields["last_event_sequence"], 42, "{event_type}");
            assert_eq!(fields["last_event_id"], Uuid::from_u128(7).to_string());
            assert_eq!(fields["updated_at"], "2025-06-01T00:00:00Z");
        }
    }

    #[test]
    fn test_task_transitions_map_verbs_to_states() {
        for (verb, state) in [
            ("authorized", "authorized"),
            ("activated", "activated"),
            ("accepted", "accepted"),
            ("completed", "completed"),
            ("declined", "declined"),
            ("expired", "expired"),
        ] {
            let updates = EventRouter::new()
                .route(
                    &event(&format!("executive.task.{verb}"), json!({"task_id": "t1"})),
                    3,
                    now(),
                )
                .unwrap();
            assert_eq!(updates[0].update_type, UpdateType::Update);
            assert_eq!(updates[0].entity_id, "t1");
            assert_eq!(updates[0].fields["current_state"], state);
            assert_eq!(updates[0].fields["state_entered_at"], "2025-01-01T12:00:00Z");
        }
    }

    #[test]
    fn test_missing_entity_id_is_malformed() {
        let err = EventRouter::new()
            .route(&event("executive.task.accepted", json!({})), 1, now())
            .unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedEvent { ref reason, .. } if reason.contains("task_id")));

        let err = EventRouter::new()
            .route(&event("petition.resolved", json!({"petition_id": "p"})), 1, now())
            .unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedEvent { ref reason, .. } if reason.contains("resolution")));
    }

    #[test]
    fn test_non_string_id_is_malformed() {
        let err = EventRouter::new()
            .route(&event("actor.deactivated", json!({"actor_id": 12})), 1, now())
            .unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedEvent { .. }));
    }

    #[test]
    fn test_legitimacy_band_defaults_to_full() {
        let updates = EventRouter::new()
            .route(&event("legitimacy.entity.registered", json!({"entity_id": "realm-1"})), 1, now())
            .unwrap();
        assert_eq!(updates[0].fields["current_band"], "full");
    }

    #[test]
    fn test_petitioner_defaults_to_filing_actor() {
        let updates = EventRouter::new()
            .route(&event("petition.filed", json!({"petition_id": "pe1"})), 1, now())
            .unwrap();
        assert_eq!(updates[0].fields["petitioner_id"], "actor-0");
    }

    #[test]
    fn test_actor_erasure_is_a_delete() {
        let updates = EventRouter::new()
            .route(&event("actor.erased", json!({"actor_id": "a1"})), 1, now())
            .unwrap();
        assert_eq!(updates[0].update_type, UpdateType::Delete);
    }

    fn route_one(event_type: &str, payload: Value) -> ProjectionUpdate {
        let mut updates = EventRouter::new()
            .route(&event(event_type, payload), 9, now())
            .unwrap();
        assert_eq!(updates.len(), 1, "{event_type}");
        updates.remove(0)
    }

    #[test]
    fn test_panel_lifecycle_actions() {
        let deliberating = route_one(
            "judicial.panel.deliberation.started",
            json!({"panel_id": "p1"}),
        );
        assert_eq!(deliberating.projection_name, ProjectionName::PanelRegistry);
        assert_eq!(deliberating.entity_id, "p1");
        assert_eq!(deliberating.update_type, UpdateType::Update);
        assert_eq!(deliberating.fields["status"], "deliberating");
        assert!(!deliberating.fields.contains_key("finding_id"));

        let finding = route_one(
            "judicial.panel.finding.issued",
            json!({"panel_id": "p1", "finding_id": "f-1"}),
        );
        assert_eq!(finding.update_type, UpdateType::Update);
        assert_eq!(finding.fields["status"], "finding_issued");
        assert_eq!(finding.fields["finding_id"], "f-1");
        assert_eq!(finding.fields["finding_issued_at"], "2025-01-01T12:00:00Z");

        let dissolved = route_one("judicial.panel.dissolved", json!({"panel_id": "p1"}));
        assert_eq!(dissolved.update_type, UpdateType::Update);
        assert_eq!(dissolved.fields["status"], "dissolved");
        assert_eq!(dissolved.fields["dissolved_at"], "2025-01-01T12:00:00Z");
    }

    #[test]
    fn test_finding_without_id_is_malformed() {
        let err = EventRouter::new()
            .route(&event("judicial.panel.finding.issued", json!({"panel_id": "p1"})), 1, now())
            .unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedEvent { ref reason, .. } if reason.contains("finding_id")));
    }

    #[test]
    fn test_petition_review_and_resolution() {
        let review = route_one("petition.review.started", json!({"petition_id": "pe1"}));
        assert_eq!(review.projection_name, ProjectionName::PetitionIndex);
        assert_eq!(review.update_type, UpdateType::Update);
        assert_eq!(review.fields["status"], "under_review");
        assert!(!review.fields.contains_key("resolved_at"));

        let resolved = route_one(
            "petition.resolved",
            json!({"petition_id": "pe1", "resolution": "granted"}),
        );
        assert_eq!(resolved.entity_id, "pe1");
        assert_eq!(resolved.update_type, UpdateType::Update);
        assert_eq!(resolved.fields["status"], "resolved");
        assert_eq!(resolved.fields["resolution"], "granted");
        assert_eq!(resolved.fields["resolved_at"], "2025-01-01T12:00:00Z");
    }

    #[test]
    fn test_actor_reactivation_clears_deactivation() {
        let reactivated = route_one("actor.reactivated", json!({"actor_id": "a1"}));
        assert_eq!(reactivated.projection_name, ProjectionName::ActorRegistry);
        assert_eq!(reactivated.update_type, UpdateType::Update);
        assert_eq!(reactivated.fields["active"], true);
        assert_eq!(reactivated.fields["deactivated_at"], Value::Null);
        assert_eq!(reactivated.fields["deactivation_reason"], Value::Null);
    }

    #[test]
    fn test_actor_branch_reassignment() {
        let reassigned = route_one(
            "actor.branch.reassigned",
            json!({"actor_id": "a1", "branch": "judicial"}),
        );
        assert_eq!(reassigned.update_type, UpdateType::Update);
        assert_eq!(reassigned.fields["branch"], "judicial");
        assert!(!reassigned.fields.contains_key("active"));

        let err = EventRouter::new()
            .route(&event("actor.branch.reassigned", json!({"actor_id": "a1"})), 1, now())
            .unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedEvent { ref reason, .. } if reason.contains("branch")));
    }

    #[test]
    fn test_band_changes_carry_their_direction() {
        let restored = route_one(
            "legitimacy.band.restored",
            json!({"entity_id": "realm-1", "new_band": "provisional", "reason": "audit passed"}),
        );
        assert_eq!(restored.projection_name, ProjectionName::LegitimacyStates);
        assert_eq!(restored.update_type, UpdateType::Update);
        assert_eq!(restored.fields["current_band"], "provisional");
        assert_eq!(restored.fields["band_entered_at"], "2025-01-01T12:00:00Z");
        assert_eq!(restored.fields["last_transition_reason"], "audit passed");
        assert_eq!(restored.fields["last_transition"], "restoration");

        let decayed = route_one(
            "legitimacy.band.decayed",
            json!({"entity_id": "realm-1", "new_band": "suspended"}),
        );
        assert_eq!(decayed.fields["last_transition"], "decay");
        assert_eq!(decayed.fields["last_transition_reason"], Value::Null);

        let registered = route_one("legitimacy.entity.registered", json!({"entity_id": "realm-1"}));
        assert_eq!(registered.fields["last_transition"], Value::Null);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn event_type_strategy() -> impl Strategy<Value = String> {
            prop_oneof![
                Just("executive.task.created".to_string()),
                Just("executive.task.accepted".to_string()),
                Just("legitimacy.band.decayed".to_string()),
                Just("judicial.panel.finding.issued".to_string()),
                Just("petition.resolved".to_string()),
                Just("actor.deactivated".to_string()),
                "[a-z]{1,8}(\\.[a-z]{1,8}){0,3}",
            ]
        }

        proptest! {
            #[test]
            fn route_is_deterministic(
                event_type in event_type_strategy(),
                id in "[a-z0-9-]{1,12}",
                sequence in 0u64..1_000_000,
                now_secs in 0i64..4_000_000_000,
            ) {
                let payload = json!({
                    "task_id": id, "entity_id": id, "panel_id": id,
                    "petition_id": id, "actor_id": id,
                    "new_band": "provisional", "finding_id": "f",
                    "resolution": "granted",
                });
                let event = event(&event_type, payload);
                let now = DateTime::from_timestamp(now_secs, 0).unwrap();
                let router = EventRouter::new();

                let first = router.route(&event, sequence, now).ok();
                let second = router.route(&event, sequence, now).ok();
                prop_assert_eq!(first, second);
            }
        }
    }
}
