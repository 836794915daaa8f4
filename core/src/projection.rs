//! Projection vocabulary and the storage port.
//!
//! # Overview
//!
//! Projections are the **query side** of the governance platform. The ledger
//! is the write side; every projection is a derived, rebuildable view that is
//! never authoritative.
//!
//! ## Key Concepts
//!
//! - **Projection name**: one of a fixed, closed registry ([`ProjectionName`])
//! - **Apply record**: marks that an event was already folded into a projection
//! - **Checkpoint**: last ledger position fully incorporated into a projection
//! - **Projection update**: field-level change computed by the event router
//! - **Record mutation**: storage-level write committed with an apply record
//!
//! ## Storage Separation
//!
//! ```text
//! Write Side:                  Read Side:
//! ┌─────────────────┐         ┌──────────────────────┐
//! │  Ledger         │         │  projections schema  │
//! │                 │  replay │                      │
//! │  events         │ ──────▶ │  task_states         │
//! │  (append-only)  │         │  actor_registry ...  │
//! └─────────────────┘         │  projection_applies  │
//!                             │  projection_checkpoints
//!                             └──────────────────────┘
//! ```
//!
//! The [`ProjectionBackend`] trait only ever receives projection data; it has
//! no method that could touch ledger storage.

use crate::ledger::LedgerError;
use crate::records::RecordError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use uuid::Uuid;

/// Field name → new value map produced by the router.
pub type FieldMap = Map<String, Value>;

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Projection name is not part of the registry
    #[error("Unknown projection: {0}")]
    UnknownProjection(String),

    /// Rebuild requested for a projection without a registered handler
    #[error("No handler registered for projection {0}")]
    HandlerNotRegistered(ProjectionName),

    /// A routable event is missing data its handler needs
    #[error("Malformed event {event_id} ({event_type}): {reason}")]
    MalformedEvent {
        /// Offending event
        event_id: Uuid,
        /// Its type string
        event_type: String,
        /// What is missing or wrong
        reason: String,
    },

    /// A projection record failed validation
    #[error("Invalid {projection} record {entity_id}: {source}")]
    InvalidRecord {
        /// Projection the record belongs to
        projection: ProjectionName,
        /// Entity the record describes
        entity_id: String,
        /// Validation failure
        #[source]
        source: RecordError,
    },

    /// A registered handler failed while processing an event
    #[error("Handler for {projection} failed on event {event_id} at sequence {sequence}: {source}")]
    Handler {
        /// Projection being processed
        projection: ProjectionName,
        /// Event being handled
        event_id: Uuid,
        /// Ledger position of the event
        sequence: u64,
        /// Underlying failure, kept typed
        #[source]
        source: Box<ProjectionError>,
    },

    /// Attempt to move a checkpoint backwards
    #[error("Checkpoint for {projection} is at {current}, refusing to move it to {attempted}")]
    CheckpointRegression {
        /// Projection whose checkpoint was targeted
        projection: ProjectionName,
        /// Stored `last_sequence`
        current: u64,
        /// Rejected `last_sequence`
        attempted: u64,
    },

    /// A rebuild stopped between batches on request
    #[error("Rebuild of {projection} interrupted (last committed sequence: {last_sequence:?})")]
    RebuildInterrupted {
        /// Projection being rebuilt
        projection: ProjectionName,
        /// Sequence of the last committed checkpoint in this run
        last_sequence: Option<u64>,
    },

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Ledger read failure
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ProjectionError {
    /// Whether this error is a configuration error raised before any I/O.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownProjection(_) | Self::HandlerNotRegistered(_)
        )
    }

    /// The innermost error, looking through `Handler` wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Handler { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether the ledger or a stored record holds data this engine refuses
    /// to project.
    #[must_use]
    pub fn is_data_integrity_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::MalformedEvent { .. } | Self::InvalidRecord { .. }
        )
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// The closed registry of projections.
///
/// # Example
///
/// ```
/// use governance_core::projection::ProjectionName;
///
/// let name: ProjectionName = "task_states".parse().unwrap();
/// assert_eq!(name, ProjectionName::TaskStates);
/// assert!("bogus_projection".parse::<ProjectionName>().is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionName {
    /// Executive task lifecycle
    TaskStates,
    /// Legitimacy bands per entity
    LegitimacyStates,
    /// Judicial panels
    PanelRegistry,
    /// Citizen petitions
    PetitionIndex,
    /// Registered actors
    ActorRegistry,
}

impl ProjectionName {
    /// Registry order.
    pub const ALL: [Self; 5] = [
        Self::TaskStates,
        Self::LegitimacyStates,
        Self::PanelRegistry,
        Self::PetitionIndex,
        Self::ActorRegistry,
    ];

    /// Stable name (also the table name).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskStates => "task_states",
            Self::LegitimacyStates => "legitimacy_states",
            Self::PanelRegistry => "panel_registry",
            Self::PetitionIndex => "petition_index",
            Self::ActorRegistry => "actor_registry",
        }
    }
}

impl fmt::Display for ProjectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectionName {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ProjectionError::UnknownProjection(s.to_string()))
    }
}

/// Anything that can name a projection.
///
/// Lets operational entry points accept raw strings (from config or a CLI)
/// while typed callers pass [`ProjectionName`] directly. Resolution happens
/// before any I/O.
pub trait AsProjectionName {
    /// Resolve to a registered projection.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::UnknownProjection`] for names outside the registry.
    fn to_projection_name(&self) -> Result<ProjectionName>;
}

impl AsProjectionName for ProjectionName {
    fn to_projection_name(&self) -> Result<ProjectionName> {
        Ok(*self)
    }
}

impl AsProjectionName for str {
    fn to_projection_name(&self) -> Result<ProjectionName> {
        self.parse()
    }
}

impl AsProjectionName for String {
    fn to_projection_name(&self) -> Result<ProjectionName> {
        self.parse()
    }
}

impl<T: AsProjectionName + ?Sized> AsProjectionName for &T {
    fn to_projection_name(&self) -> Result<ProjectionName> {
        (**self).to_projection_name()
    }
}

/// Marks that an event has been incorporated into a projection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRecord {
    /// Projection the event was applied to
    pub projection_name: ProjectionName,
    /// Applied event
    pub event_id: Uuid,
    /// Content digest of the applied event
    pub event_hash: String,
    /// Ledger position of the applied event
    pub sequence: u64,
    /// When it was applied
    pub applied_at: DateTime<Utc>,
}

/// Last ledger position fully incorporated into a projection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionCheckpoint {
    /// Projection this checkpoint belongs to
    pub projection_name: ProjectionName,
    /// Last event of the last committed batch
    pub last_event_id: Uuid,
    /// Its content digest
    pub last_hash: String,
    /// Its sequence
    pub last_sequence: u64,
    /// When the checkpoint was written
    pub updated_at: DateTime<Utc>,
}

/// Kind of change a [`ProjectionUpdate`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// A new entity appears
    Create,
    /// An existing entity changes
    Update,
    /// An entity is removed
    Delete,
}

/// Field-level change computed by the event router.
///
/// Transient: produced by routing and immediately consumed by a handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionUpdate {
    /// Target projection
    pub projection_name: ProjectionName,
    /// Target entity
    pub entity_id: String,
    /// Create, update or delete
    pub update_type: UpdateType,
    /// New field values
    pub fields: FieldMap,
}

/// Storage write committed together with an apply record.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordMutation {
    /// Replace (or insert) the whole record for an entity
    Upsert {
        /// Entity id
        entity_id: String,
        /// Serialized record
        record: Value,
    },
    /// Remove the record for an entity
    Delete {
        /// Entity id
        entity_id: String,
    },
}

impl RecordMutation {
    /// Entity this mutation touches.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Upsert { entity_id, .. } | Self::Delete { entity_id } => entity_id,
        }
    }
}

/// Equality filter on a top-level string field of a stored record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFilter {
    /// Field name
    pub field: String,
    /// Required value
    pub value: String,
}

impl RecordFilter {
    /// `field == value`
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether a stored record satisfies the filter.
    #[must_use]
    pub fn matches(&self, record: &Value) -> bool {
        record.get(&self.field).and_then(Value::as_str) == Some(self.value.as_str())
    }
}

/// Storage backend for projection data, apply records and checkpoints.
///
/// Implementations must keep this data in storage isolated from the ledger.
/// All methods take an already-validated [`ProjectionName`]; name resolution
/// happens in the `ProjectionStore` facade before any call reaches a backend.
///
/// # Atomicity
///
/// [`ProjectionBackend::commit_apply`] must make the apply record and the
/// mutations visible together or not at all. Idempotence under crash-recovery
/// depends on it.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `impl Future` so the store can hold an `Arc<dyn ProjectionBackend>`.
pub trait ProjectionBackend: Send + Sync {
    /// Whether an apply record exists for `(projection, event_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the lookup fails.
    fn has_apply_record(
        &self,
        projection: ProjectionName,
        event_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Load the apply record for `(projection, event_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the lookup fails.
    fn get_apply_record(
        &self,
        projection: ProjectionName,
        event_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ApplyRecord>>> + Send + '_>>;

    /// Insert the apply record and the mutations as one unit.
    ///
    /// Returns `false` without touching anything if the apply record already
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the unit cannot be committed;
    /// in that case nothing is visible.
    fn commit_apply(
        &self,
        record: ApplyRecord,
        mutations: Vec<RecordMutation>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Load the checkpoint for a projection.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the lookup fails.
    fn get_checkpoint(
        &self,
        projection: ProjectionName,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectionCheckpoint>>> + Send + '_>>;

    /// Upsert a checkpoint keyed by projection name.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::CheckpointRegression`] if the stored
    /// `last_sequence` is greater than the new one, or
    /// [`ProjectionError::Storage`] on failure.
    fn save_checkpoint(
        &self,
        checkpoint: ProjectionCheckpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Delete every record, apply record and the checkpoint of a projection.
    ///
    /// Returns the number of projection records deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on failure.
    fn clear_projection(
        &self,
        projection: ProjectionName,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Load one stored record.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the lookup fails.
    fn get_record(
        &self,
        projection: ProjectionName,
        entity_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>>> + Send + '_>>;

    /// List stored records ordered by entity id.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    fn list_records(
        &self,
        projection: ProjectionName,
        filter: Option<RecordFilter>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Value>>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_round_trip() {
        for name in ProjectionName::ALL {
            assert_eq!(name.as_str().parse::<ProjectionName>().ok(), Some(name));
        }
    }

    #[test]
    fn test_unknown_name_is_configuration_error() {
        let err = "bogus_projection".to_projection_name().err();
        assert!(matches!(
            err,
            Some(ProjectionError::UnknownProjection(ref name)) if name == "bogus_projection"
        ));
        assert!(err.is_some_and(|e| e.is_configuration_error()));
    }

    #[test]
    fn test_handler_error_keeps_its_cause() {
        use std::error::Error as _;

        let err = ProjectionError::Handler {
            projection: ProjectionName::TaskStates,
            event_id: Uuid::nil(),
            sequence: 2,
            source: Box::new(ProjectionError::MalformedEvent {
                event_id: Uuid::nil(),
                event_type: "executive.task.authorized".to_string(),
                reason: "payload field task_id is required".to_string(),
            }),
        };

        assert!(matches!(err.root_cause(), ProjectionError::MalformedEvent { .. }));
        assert!(err.is_data_integrity_error());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("task_id is required"));

        let storage = ProjectionError::Handler {
            projection: ProjectionName::TaskStates,
            event_id: Uuid::nil(),
            sequence: 2,
            source: Box::new(ProjectionError::Storage("connection reset".to_string())),
        };
        assert!(matches!(storage.root_cause(), ProjectionError::Storage(_)));
        assert!(!storage.is_data_integrity_error());
    }

    #[test]
    fn test_record_filter_matches_string_fields_only() {
        let filter = RecordFilter::eq("current_state", "pending");
        assert!(filter.matches(&serde_json::json!({"current_state": "pending"})));
        assert!(!filter.matches(&serde_json::json!({"current_state": "accepted"})));
        assert!(!filter.matches(&serde_json::json!({"current_state": 1})));
        assert!(!filter.matches(&serde_json::json!({})));
    }
}
