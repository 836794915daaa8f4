//! # Governance Core
//!
//! Core types and ports for the governance projection engine.
//!
//! The governance ledger is an append-only, hash-chained log of events. This
//! crate holds everything needed to turn those events into read models
//! without touching storage:
//!
//! ## Core Concepts
//!
//! - **Event**: immutable ledger entry ([`event::GovernanceEvent`])
//! - **Ledger reader**: read-only port onto the ledger ([`ledger::LedgerReader`])
//! - **Router**: pure function `(event, sequence, now) → updates` ([`router::EventRouter`])
//! - **Records**: typed, self-validating projection rows ([`records`])
//! - **Projection backend**: storage port for read models ([`projection::ProjectionBackend`])
//! - **Environment**: injected clock ([`environment::Clock`])
//!
//! ## Architecture Principles
//!
//! - The ledger is the only source of truth; projections are disposable
//! - Routing is pure and deterministic
//! - Storage is behind dyn-compatible traits so it can be swapped for tests
//!
//! ## Example
//!
//! ```
//! use chrono::Utc;
//! use governance_core::event::{EventType, GovernanceEvent};
//! use governance_core::records::{ProjectionRecord, TaskState, TaskStateRecord};
//! use governance_core::router::EventRouter;
//!
//! let event = GovernanceEvent {
//!     event_id: uuid::Uuid::nil(),
//!     event_type: EventType::new("executive.task.created"),
//!     timestamp: Utc::now(),
//!     actor_id: "earl-1".to_string(),
//!     trace_id: "trace-1".to_string(),
//!     payload: serde_json::json!({"task_id": "task-1"}).as_object().cloned().unwrap(),
//!     hash: "h1".to_string(),
//!     sequence: 1,
//! };
//!
//! let update = EventRouter::new().route(&event, 1, Utc::now()).unwrap().remove(0);
//! let record = TaskStateRecord::from_fields(&update.entity_id, &update.fields).unwrap();
//! assert_eq!(record.current_state(), TaskState::Pending);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod event;
pub mod ledger;
pub mod projection;
pub mod records;
pub mod router;

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Processing timestamps (`applied_at`, `updated_at`) come from a clock;
    /// event timestamps always come from the event.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use environment::{Clock, SystemClock};
pub use event::{EventFamily, EventType, GovernanceEvent};
pub use ledger::{LedgerError, LedgerReader, ReadOptions};
pub use projection::{
    ApplyRecord, AsProjectionName, FieldMap, ProjectionBackend, ProjectionCheckpoint,
    ProjectionError, ProjectionName, ProjectionUpdate, RecordFilter, RecordMutation, UpdateType,
};
pub use router::EventRouter;
