//! Legitimacy band record.
//!
//! Bands are ordered `full > provisional > suspended`. Decay moves exactly one
//! band down and restoration exactly one band up; neither can skip a band.

use super::{ProjectionRecord, RecordError, RecordTrace, require_id};
use crate::projection::ProjectionName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

closed_set! {
    /// Legitimacy standing of an entity.
    LegitimacyBand, field = "current_band" {
        /// Full standing
        Full => "full",
        /// Standing under observation
        Provisional => "provisional",
        /// Standing withdrawn
        Suspended => "suspended",
    }
}

closed_set! {
    /// Direction of the last band change.
    BandTransition, field = "last_transition" {
        /// Moved down one band
        Decay => "decay",
        /// Moved up one band
        Restoration => "restoration",
    }
}

impl LegitimacyBand {
    /// Band one step below, if any.
    #[must_use]
    pub const fn decayed(self) -> Option<Self> {
        match self {
            Self::Full => Some(Self::Provisional),
            Self::Provisional => Some(Self::Suspended),
            Self::Suspended => None,
        }
    }

    /// Band one step above, if any.
    #[must_use]
    pub const fn restored(self) -> Option<Self> {
        match self {
            Self::Full => None,
            Self::Provisional => Some(Self::Full),
            Self::Suspended => Some(Self::Provisional),
        }
    }

    /// Whether `next` is exactly one band below.
    #[must_use]
    pub fn is_decay_to(self, next: Self) -> bool {
        self.decayed() == Some(next)
    }

    /// Whether `next` is exactly one band above.
    #[must_use]
    pub fn is_restoration_to(self, next: Self) -> bool {
        self.restored() == Some(next)
    }
}

/// Current legitimacy band of one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LegitimacyStateRow")]
pub struct LegitimacyStateRecord {
    entity_id: String,
    entity_type: Option<String>,
    current_band: LegitimacyBand,
    band_entered_at: DateTime<Utc>,
    last_transition_reason: Option<String>,
    last_transition: Option<BandTransition>,
    #[serde(flatten)]
    trace: RecordTrace,
}

#[derive(Deserialize)]
struct LegitimacyStateRow {
    entity_id: String,
    #[serde(default)]
    entity_type: Option<String>,
    current_band: LegitimacyBand,
    band_entered_at: DateTime<Utc>,
    #[serde(default)]
    last_transition_reason: Option<String>,
    #[serde(default)]
    last_transition: Option<BandTransition>,
    #[serde(flatten)]
    trace: RecordTrace,
}

impl TryFrom<LegitimacyStateRow> for LegitimacyStateRecord {
    type Error = RecordError;

    fn try_from(row: LegitimacyStateRow) -> Result<Self, Self::Error> {
        require_id("entity_id", &row.entity_id)?;
        Ok(Self {
            entity_id: row.entity_id,
            entity_type: row.entity_type,
            current_band: row.current_band,
            band_entered_at: row.band_entered_at,
            last_transition_reason: row.last_transition_reason,
            last_transition: row.last_transition,
            trace: row.trace,
        })
    }
}

impl LegitimacyStateRecord {
    /// Entity identifier.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Kind of entity (realm, cluster, office, ...).
    #[must_use]
    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    /// Current band.
    #[must_use]
    pub const fn current_band(&self) -> LegitimacyBand {
        self.current_band
    }

    /// When the current band was entered.
    #[must_use]
    pub const fn band_entered_at(&self) -> DateTime<Utc> {
        self.band_entered_at
    }

    /// Reason given for the last band change.
    #[must_use]
    pub fn last_transition_reason(&self) -> Option<&str> {
        self.last_transition_reason.as_deref()
    }

    /// Direction of the last band change, if the band ever changed.
    #[must_use]
    pub const fn last_transition(&self) -> Option<BandTransition> {
        self.last_transition
    }
}

impl ProjectionRecord for LegitimacyStateRecord {
    const PROJECTION: ProjectionName = ProjectionName::LegitimacyStates;
    const ID_FIELD: &'static str = "entity_id";

    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn trace(&self) -> &RecordTrace {
        &self.trace
    }

    fn lifecycle_state(&self) -> Option<&'static str> {
        Some(self.current_band.as_str())
    }

    /// A decay must move exactly one band down and a restoration exactly one
    /// band up. Without a stated direction any single step is accepted.
    fn allows_transition_to(&self, next: &Self) -> bool {
        let (from, to) = (self.current_band, next.current_band);
        match next.last_transition {
            Some(BandTransition::Decay) => from.is_decay_to(to),
            Some(BandTransition::Restoration) => from.is_restoration_to(to),
            None => from == to || from.is_decay_to(to) || from.is_restoration_to(to),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn record(band: &str) -> LegitimacyStateRecord {
        moved(band, None)
    }

    fn moved(band: &str, transition: Option<&str>) -> LegitimacyStateRecord {
        let fields = json!({
            "current_band": band,
            "last_transition": transition,
            "band_entered_at": "2025-01-01T00:00:00Z",
            "last_event_id": Uuid::nil(),
            "last_event_sequence": 3,
            "updated_at": "2025-01-01T00:00:00Z"
        });
        LegitimacyStateRecord::from_fields("realm-1", fields.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_decay_and_restoration_move_one_band() {
        use LegitimacyBand::{Full, Provisional, Suspended};

        assert_eq!(Full.decayed(), Some(Provisional));
        assert_eq!(Provisional.decayed(), Some(Suspended));
        assert_eq!(Suspended.decayed(), None);

        assert_eq!(Suspended.restored(), Some(Provisional));
        assert_eq!(Provisional.restored(), Some(Full));
        assert_eq!(Full.restored(), None);
    }

    #[test]
    fn test_skipping_a_band_is_not_an_allowed_transition() {
        let full = record("full");
        let provisional = record("provisional");
        let suspended = record("suspended");

        assert!(full.allows_transition_to(&provisional));
        assert!(provisional.allows_transition_to(&suspended));
        assert!(suspended.allows_transition_to(&provisional));
        assert!(!full.allows_transition_to(&suspended));
        assert!(!suspended.allows_transition_to(&full));
    }

    #[test]
    fn test_transition_direction_must_match_the_band_change() {
        let full = record("full");
        let provisional = record("provisional");

        assert!(full.allows_transition_to(&moved("provisional", Some("decay"))));
        assert!(provisional.allows_transition_to(&moved("full", Some("restoration"))));

        // A decay that raises the band, or a restoration that lowers it
        assert!(!provisional.allows_transition_to(&moved("full", Some("decay"))));
        assert!(!full.allows_transition_to(&moved("provisional", Some("restoration"))));
        assert!(!full.allows_transition_to(&moved("full", Some("decay"))));

        assert_eq!(
            moved("provisional", Some("decay")).last_transition(),
            Some(BandTransition::Decay)
        );
        assert_eq!(full.last_transition(), None);
    }

    #[test]
    fn test_unknown_band_is_rejected() {
        assert!("revoked".parse::<LegitimacyBand>().is_err());
        let fields = json!({
            "current_band": "revoked",
            "band_entered_at": "2025-01-01T00:00:00Z",
            "last_event_id": Uuid::nil(),
            "last_event_sequence": 3,
            "updated_at": "2025-01-01T00:00:00Z"
        });
        assert!(
            LegitimacyStateRecord::from_fields("realm-1", fields.as_object().unwrap()).is_err()
        );
    }
}
