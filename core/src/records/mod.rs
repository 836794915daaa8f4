//! Typed projection records.
//!
//! # Overview
//!
//! Each projection materializes one record type. Records are immutable value
//! snapshots: an update never mutates a stored record field by field, it
//! produces a whole new record that replaces the old one.
//!
//! | Projection          | Record                    | Id field      |
//! |---------------------|---------------------------|---------------|
//! | `task_states`       | [`TaskStateRecord`]       | `task_id`     |
//! | `legitimacy_states` | [`LegitimacyStateRecord`] | `entity_id`   |
//! | `panel_registry`    | [`PanelRegistryRecord`]   | `panel_id`    |
//! | `petition_index`    | [`PetitionIndexRecord`]   | `petition_id` |
//! | `actor_registry`    | [`ActorRegistryRecord`]   | `actor_id`    |
//!
//! # Validation
//!
//! A record validates its own internal consistency (closed-set membership,
//! paired nullable fields) whenever it is constructed, including when it is
//! deserialized. There is no way to observe an invalid record.
//!
//! A record does **not** check that the move from the previously stored
//! record to the new one is legal. [`ProjectionRecord::allows_transition_to`]
//! answers that question for whoever wants to know; the projection itself
//! trusts the ledger.

use crate::projection::{FieldMap, ProjectionName};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Defines a closed string enumeration stored as its snake_case name.
///
/// Generates `ALL`, `as_str`, `FromStr` (failing with
/// [`RecordError::InvalidValue`] for the given field), `Display`, and serde
/// support through the string form.
macro_rules! closed_set {
    (
        $(#[$meta:meta])*
        $name:ident, field = $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every member of the set.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Stored name.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::records::RecordError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::records::RecordError::InvalidValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::records::RecordError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for &'static str {
            fn from(value: $name) -> Self {
                value.as_str()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

mod actor;
mod legitimacy;
mod panel;
mod petition;
mod task;

pub use actor::{ActorRegistryRecord, ActorType, Branch};
pub use legitimacy::{BandTransition, LegitimacyBand, LegitimacyStateRecord};
pub use panel::{PanelRegistryRecord, PanelStatus};
pub use petition::{PetitionIndexRecord, PetitionStatus};
pub use task::{ALLOWED_TRANSITIONS, TaskState, TaskStateRecord};

/// Record validation and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// A closed-set field holds a value outside the set
    #[error("invalid {field}: {value:?}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Rejected value
        value: String,
    },

    /// Fields that must agree with each other do not
    #[error("inconsistent record: {0}")]
    Inconsistent(String),

    /// Stored form could not be decoded
    #[error("record decode error: {0}")]
    Decode(String),

    /// Record could not be encoded
    #[error("record encode error: {0}")]
    Encode(String),
}

/// Traceability fields carried by every record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTrace {
    /// Event that produced this snapshot
    pub last_event_id: Uuid,
    /// Ledger position of that event
    pub last_event_sequence: u64,
    /// Processing time of that event
    pub updated_at: DateTime<Utc>,
}

/// A materialized-view record type.
///
/// Implementors get JSON-backed construction from router fields
/// ([`ProjectionRecord::from_fields`]) and wholesale replacement
/// ([`ProjectionRecord::merge`]) for free; both paths run the record's
/// validation.
pub trait ProjectionRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Projection storing this record type.
    const PROJECTION: ProjectionName;

    /// Name of the identifying field.
    const ID_FIELD: &'static str;

    /// Identifier of the described entity.
    fn entity_id(&self) -> &str;

    /// Traceability fields.
    fn trace(&self) -> &RecordTrace;

    /// Name of the current lifecycle stage, for records that have one.
    fn lifecycle_state(&self) -> Option<&'static str> {
        None
    }

    /// Whether moving from `self` to `next` follows the record's lifecycle.
    ///
    /// Records without a lifecycle accept every transition.
    fn allows_transition_to(&self, _next: &Self) -> bool {
        true
    }

    /// Ledger position of the event behind this snapshot.
    fn last_event_sequence(&self) -> u64 {
        self.trace().last_event_sequence
    }

    /// Decode (and validate) a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Decode`] when the value is not a valid record.
    fn from_value(value: Value) -> Result<Self, RecordError> {
        serde_json::from_value(value).map_err(|e| RecordError::Decode(e.to_string()))
    }

    /// Encode for storage.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Encode`] if serialization fails.
    fn to_value(&self) -> Result<Value, RecordError> {
        serde_json::to_value(self).map_err(|e| RecordError::Encode(e.to_string()))
    }

    /// Build a fresh record from router fields.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if required fields are missing or invalid.
    fn from_fields(entity_id: &str, fields: &FieldMap) -> Result<Self, RecordError> {
        let mut object = fields.clone();
        object.insert(
            Self::ID_FIELD.to_string(),
            Value::String(entity_id.to_string()),
        );
        Self::from_value(Value::Object(object))
    }

    /// Produce the replacement snapshot after applying router fields.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the merged record is invalid.
    fn merge(&self, fields: &FieldMap) -> Result<Self, RecordError> {
        let Value::Object(mut object) = self.to_value()? else {
            return Err(RecordError::Encode(format!(
                "{} record did not encode to an object",
                Self::PROJECTION
            )));
        };
        for (field, value) in fields {
            object.insert(field.clone(), value.clone());
        }
        Self::from_value(Value::Object(object))
    }
}

/// Require a non-empty identifier.
fn require_id(field: &'static str, value: &str) -> Result<(), RecordError> {
    if value.trim().is_empty() {
        return Err(RecordError::InvalidValue {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Require that two nullable fields are either both set or both absent.
fn require_paired<A, B>(
    left: (&str, &Option<A>),
    right: (&str, &Option<B>),
) -> Result<(), RecordError> {
    if left.1.is_some() == right.1.is_some() {
        Ok(())
    } else {
        Err(RecordError::Inconsistent(format!(
            "{} and {} must be set together",
            left.0, right.0
        )))
    }
}
