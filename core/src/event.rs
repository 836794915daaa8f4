//! Governance events as they are read from the ledger.
//!
//! # Overview
//!
//! The ledger is the single source of truth. Every event it hands out is an
//! immutable fact with a ledger-assigned, gapless `sequence`. This crate never
//! creates events on the write side; it only reads them and derives
//! projections from them.
//!
//! # Event Types
//!
//! Event type strings follow a `branch.noun.verb` convention, for example
//! `executive.task.accepted` or `petition.review.started`. The string is
//! parsed **once**, when the event is constructed or deserialized, into an
//! [`EventType`] that already knows which [`EventFamily`] (and therefore which
//! projection) it belongs to. Routing later is a `match` over the family, not
//! repeated string comparison.
//!
//! Parsing never fails: an event type nobody understands yet simply has no
//! family, and the router produces no updates for it.

use crate::projection::ProjectionName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque key-value payload attached to every event.
pub type Payload = Map<String, Value>;

/// An immutable event read from the governance ledger.
///
/// This is the persisted wire shape:
///
/// ```text
/// {event_id, event_type, timestamp, actor_id, trace_id, payload, hash, sequence}
/// ```
///
/// # Example
///
/// ```
/// use governance_core::event::GovernanceEvent;
///
/// let json = serde_json::json!({
///     "event_id": "7d0c4c36-61f5-4d51-9cf4-7f8a0c5f0e11",
///     "event_type": "executive.task.created",
///     "timestamp": "2025-01-01T00:00:00Z",
///     "actor_id": "earl-7",
///     "trace_id": "trace-1",
///     "payload": { "task_id": "task-1" },
///     "hash": "abc123",
///     "sequence": 1
/// });
///
/// let event: GovernanceEvent = serde_json::from_value(json).unwrap();
/// assert_eq!(event.event_type.action(), Some("created"));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GovernanceEvent {
    /// Unique event identifier
    pub event_id: Uuid,
    /// Parsed event type
    pub event_type: EventType,
    /// When the event happened (producer time)
    pub timestamp: DateTime<Utc>,
    /// Actor that caused the event
    pub actor_id: String,
    /// Correlation id across services
    pub trace_id: String,
    /// Event body
    #[serde(default)]
    pub payload: Payload,
    /// Content digest assigned by the ledger
    pub hash: String,
    /// Ledger position (strictly increasing, gapless)
    pub sequence: u64,
}

impl GovernanceEvent {
    /// Get a string field from the payload.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Get a raw payload value, treating JSON `null` as absent.
    #[must_use]
    pub fn payload_value(&self, key: &str) -> Option<&Value> {
        self.payload.get(key).filter(|value| !value.is_null())
    }
}

/// Event families the engine knows how to project.
///
/// Each family owns exactly one projection. The family of an event is decided
/// by the longest matching prefix in [`EventFamily::ALL`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventFamily {
    /// `executive.task.*`
    Task,
    /// `legitimacy.*`
    Legitimacy,
    /// `judicial.panel.*`
    Panel,
    /// `petition.*`
    Petition,
    /// `actor.*`
    Actor,
}

impl EventFamily {
    /// Every family, in routing-table order.
    pub const ALL: [Self; 5] = [
        Self::Task,
        Self::Legitimacy,
        Self::Panel,
        Self::Petition,
        Self::Actor,
    ];

    /// Event type prefix owned by this family (including the trailing dot).
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Task => "executive.task.",
            Self::Legitimacy => "legitimacy.",
            Self::Panel => "judicial.panel.",
            Self::Petition => "petition.",
            Self::Actor => "actor.",
        }
    }

    /// Projection this family writes to.
    #[must_use]
    pub const fn projection(self) -> ProjectionName {
        match self {
            Self::Task => ProjectionName::TaskStates,
            Self::Legitimacy => ProjectionName::LegitimacyStates,
            Self::Panel => ProjectionName::PanelRegistry,
            Self::Petition => ProjectionName::PetitionIndex,
            Self::Actor => ProjectionName::ActorRegistry,
        }
    }

    /// Longest-prefix classification of a raw event type.
    ///
    /// Returns the family and the byte offset where the action starts.
    /// A prefix only matches when something follows it.
    fn classify(raw: &str) -> Option<(Self, usize)> {
        Self::ALL
            .into_iter()
            .filter(|family| {
                let prefix = family.prefix();
                raw.len() > prefix.len() && raw.starts_with(prefix)
            })
            .max_by_key(|family| family.prefix().len())
            .map(|family| (family, family.prefix().len()))
    }
}

/// A parsed event type string.
///
/// Holds the raw string plus its routing classification, computed once.
///
/// # Example
///
/// ```
/// use governance_core::event::{EventFamily, EventType};
///
/// let parsed = EventType::new("petition.review.started");
/// assert_eq!(parsed.family(), Some(EventFamily::Petition));
/// assert_eq!(parsed.action(), Some("review.started"));
/// assert_eq!(parsed.branch(), "petition");
/// assert_eq!(parsed.verb(), "started");
///
/// let unknown = EventType::new("treasury.budget.approved");
/// assert_eq!(unknown.family(), None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EventType {
    raw: String,
    route: Option<(EventFamily, usize)>,
}

impl EventType {
    /// Parse an event type string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let route = EventFamily::classify(&raw);
        Self { raw, route }
    }

    /// The original type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Dot-separated segments of the type string.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.raw.split('.')
    }

    /// First segment (the governance branch).
    #[must_use]
    pub fn branch(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }

    /// Last segment.
    #[must_use]
    pub fn verb(&self) -> &str {
        self.raw.rsplit('.').next().unwrap_or_default()
    }

    /// Family this event routes to, if any.
    #[must_use]
    pub fn family(&self) -> Option<EventFamily> {
        self.route.map(|(family, _)| family)
    }

    /// Everything after the family prefix, e.g. `band.decayed`.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.route.map(|(_, start)| &self.raw[start..])
    }
}

impl From<String> for EventType {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for EventType {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.raw
    }
}

impl FromStr for EventType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
