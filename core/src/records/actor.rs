//! Actor registry record.

use super::{ProjectionRecord, RecordError, RecordTrace, require_id};
use crate::projection::ProjectionName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

closed_set! {
    /// Kind of governance actor.
    ActorType, field = "actor_type" {
        /// Head of the legislative assembly
        King => "king",
        /// Head of the executive
        President => "president",
        /// Executive officer overseeing earls
        Duke => "duke",
        /// Executive officer assigning tasks
        Earl => "earl",
        /// Judicial officer
        Prince => "prince",
        /// Advisory officer
        Marquis => "marquis",
        /// Witness to governance acts
        Knight => "knight",
        /// Ordinary participant
        Citizen => "citizen",
    }
}

closed_set! {
    /// Governance branch an actor serves in.
    Branch, field = "branch" {
        /// Law making
        Legislative => "legislative",
        /// Task execution
        Executive => "executive",
        /// Adjudication
        Judicial => "judicial",
        /// Counsel
        Advisory => "advisory",
        /// Observation and attestation
        Witness => "witness",
        /// Citizenry
        Civic => "civic",
    }
}

impl ActorType {
    /// Branch an actor of this type joins unless told otherwise.
    #[must_use]
    pub const fn default_branch(self) -> Branch {
        match self {
            Self::King => Branch::Legislative,
            Self::President | Self::Duke | Self::Earl => Branch::Executive,
            Self::Prince => Branch::Judicial,
            Self::Marquis => Branch::Advisory,
            Self::Knight => Branch::Witness,
            Self::Citizen => Branch::Civic,
        }
    }
}

/// Registry entry for one actor.
///
/// `active` is always the negation of `deactivated_at.is_some()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ActorRegistryRow")]
pub struct ActorRegistryRecord {
    actor_id: String,
    actor_type: ActorType,
    branch: Branch,
    display_name: Option<String>,
    active: bool,
    registered_at: DateTime<Utc>,
    deactivated_at: Option<DateTime<Utc>>,
    deactivation_reason: Option<String>,
    #[serde(flatten)]
    trace: RecordTrace,
}

#[derive(Deserialize)]
struct ActorRegistryRow {
    actor_id: String,
    actor_type: ActorType,
    #[serde(default)]
    branch: Option<Branch>,
    #[serde(default)]
    display_name: Option<String>,
    active: bool,
    registered_at: DateTime<Utc>,
    #[serde(default)]
    deactivated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    deactivation_reason: Option<String>,
    #[serde(flatten)]
    trace: RecordTrace,
}

impl TryFrom<ActorRegistryRow> for ActorRegistryRecord {
    type Error = RecordError;

    fn try_from(row: ActorRegistryRow) -> Result<Self, Self::Error> {
        require_id("actor_id", &row.actor_id)?;
        if row.active != row.deactivated_at.is_none() {
            return Err(RecordError::Inconsistent(format!(
                "active={} contradicts deactivated_at={:?}",
                row.active, row.deactivated_at
            )));
        }
        if row.deactivation_reason.is_some() && row.deactivated_at.is_none() {
            return Err(RecordError::Inconsistent(
                "deactivation_reason requires deactivated_at".to_string(),
            ));
        }

        Ok(Self {
            branch: row
                .branch
                .unwrap_or_else(|| row.actor_type.default_branch()),
            actor_id: row.actor_id,
            actor_type: row.actor_type,
            display_name: row.display_name,
            active: row.active,
            registered_at: row.registered_at,
            deactivated_at: row.deactivated_at,
            deactivation_reason: row.deactivation_reason,
            trace: row.trace,
        })
    }
}

impl ActorRegistryRecord {
    /// Actor identifier.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Kind of actor.
    #[must_use]
    pub const fn actor_type(&self) -> ActorType {
        self.actor_type
    }

    /// Branch served.
    #[must_use]
    pub const fn branch(&self) -> Branch {
        self.branch
    }

    /// Human-readable name.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Whether the actor is currently active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// When the actor was registered.
    #[must_use]
    pub const fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// When the actor was deactivated.
    #[must_use]
    pub const fn deactivated_at(&self) -> Option<DateTime<Utc>> {
        self.deactivated_at
    }

    /// Why the actor was deactivated.
    #[must_use]
    pub fn deactivation_reason(&self) -> Option<&str> {
        self.deactivation_reason.as_deref()
    }
}

impl ProjectionRecord for ActorRegistryRecord {
    const PROJECTION: ProjectionName = ProjectionName::ActorRegistry;
    const ID_FIELD: &'static str = "actor_id";

    fn entity_id(&self) -> &str {
        &self.actor_id
    }

    fn trace(&self) -> &RecordTrace {
        &self.trace
    }

    fn lifecycle_state(&self) -> Option<&'static str> {
        Some(if self.active { "active" } else { "inactive" })
    }

    // The kind of an actor never changes once registered.
    fn allows_transition_to(&self, next: &Self) -> bool {
        self.actor_type == next.actor_type
    }
}
