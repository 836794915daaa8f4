//! Executive task lifecycle record.

use super::{ProjectionRecord, RecordError, RecordTrace, require_id};
use crate::projection::ProjectionName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

closed_set! {
    /// Lifecycle stage of an executive task.
    TaskState, field = "current_state" {
        /// Created, waiting for authorization
        Pending => "pending",
        /// Authorized by the assigning earl
        Authorized => "authorized",
        /// Offered to the executing cluster
        Activated => "activated",
        /// Accepted by the executing cluster
        Accepted => "accepted",
        /// Finished (terminal)
        Completed => "completed",
        /// Refused (terminal)
        Declined => "declined",
        /// Ran out of time (terminal)
        Expired => "expired",
    }
}

/// Fixed task lifecycle adjacency map.
///
/// Terminal states have no outgoing edges.
pub const ALLOWED_TRANSITIONS: &[(TaskState, &[TaskState])] = &[
    (
        TaskState::Pending,
        &[TaskState::Authorized, TaskState::Declined, TaskState::Expired],
    ),
    (
        TaskState::Authorized,
        &[TaskState::Activated, TaskState::Declined, TaskState::Expired],
    ),
    (
        TaskState::Activated,
        &[TaskState::Accepted, TaskState::Declined, TaskState::Expired],
    ),
    (TaskState::Accepted, &[TaskState::Completed, TaskState::Expired]),
    (TaskState::Completed, &[]),
    (TaskState::Declined, &[]),
    (TaskState::Expired, &[]),
];

impl TaskState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Declined | Self::Expired)
    }

    /// States reachable in one step.
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [Self] {
        ALLOWED_TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .map_or(&[][..], |&(_, targets)| targets)
    }

    /// Whether `next` is reachable in one step.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

/// Current state of one executive task.
///
/// # Example
///
/// ```
/// use governance_core::records::{ProjectionRecord, TaskState, TaskStateRecord};
///
/// let fields = serde_json::json!({
///     "current_state": "completed",
///     "state_entered_at": "2025-01-01T00:00:00Z",
///     "last_event_id": "00000000-0000-0000-0000-00000000000a",
///     "last_event_sequence": 10,
///     "updated_at": "2025-01-01T00:00:00Z"
/// });
/// let record = TaskStateRecord::from_fields("task-1", fields.as_object().unwrap()).unwrap();
///
/// assert_eq!(record.current_state(), TaskState::Completed);
/// assert!(record.is_terminal());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TaskStateRow")]
pub struct TaskStateRecord {
    task_id: String,
    current_state: TaskState,
    earl_id: Option<String>,
    cluster_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    state_entered_at: DateTime<Utc>,
    #[serde(flatten)]
    trace: RecordTrace,
}

#[derive(Deserialize)]
struct TaskStateRow {
    task_id: String,
    current_state: TaskState,
    #[serde(default)]
    earl_id: Option<String>,
    #[serde(default)]
    cluster_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    state_entered_at: DateTime<Utc>,
    #[serde(flatten)]
    trace: RecordTrace,
}

impl TryFrom<TaskStateRow> for TaskStateRecord {
    type Error = RecordError;

    fn try_from(row: TaskStateRow) -> Result<Self, Self::Error> {
        require_id("task_id", &row.task_id)?;
        Ok(Self {
            task_id: row.task_id,
            current_state: row.current_state,
            earl_id: row.earl_id,
            cluster_id: row.cluster_id,
            created_at: row.created_at,
            state_entered_at: row.state_entered_at,
            trace: row.trace,
        })
    }
}

impl TaskStateRecord {
    /// Task identifier.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Current lifecycle stage.
    #[must_use]
    pub const fn current_state(&self) -> TaskState {
        self.current_state
    }

    /// Earl that assigned the task.
    #[must_use]
    pub fn earl_id(&self) -> Option<&str> {
        self.earl_id.as_deref()
    }

    /// Cluster executing the task.
    #[must_use]
    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }

    /// When the task was created.
    #[must_use]
    pub const fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// When the current state was entered.
    #[must_use]
    pub const fn state_entered_at(&self) -> DateTime<Utc> {
        self.state_entered_at
    }

    /// Whether the task reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.current_state.is_terminal()
    }
}

impl ProjectionRecord for TaskStateRecord {
    const PROJECTION: ProjectionName = ProjectionName::TaskStates;
    const ID_FIELD: &'static str = "task_id";

    fn entity_id(&self) -> &str {
        &self.task_id
    }

    fn trace(&self) -> &RecordTrace {
        &self.trace
    }

    fn lifecycle_state(&self) -> Option<&'static str> {
        Some(self.current_state.as_str())
    }

    fn allows_transition_to(&self, next: &Self) -> bool {
        self.current_state == next.current_state
            || self.current_state.can_transition_to(next.current_state)
    }
}
