//! Petition index record.

use super::{ProjectionRecord, RecordError, RecordTrace, require_id, require_paired};
use crate::projection::ProjectionName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

closed_set! {
    /// Processing stage of a petition.
    PetitionStatus, field = "status" {
        /// Submitted
        Filed => "filed",
        /// Receipt confirmed
        Acknowledged => "acknowledged",
        /// Being examined
        UnderReview => "under_review",
        /// Closed with a resolution (terminal)
        Resolved => "resolved",
    }
}

impl PetitionStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Whether `next` is reachable in one step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Filed, Self::Acknowledged | Self::Resolved)
                | (Self::Acknowledged, Self::UnderReview | Self::Resolved)
                | (Self::UnderReview, Self::Resolved)
        )
    }
}

/// Index entry for one petition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PetitionIndexRow")]
pub struct PetitionIndexRecord {
    petition_id: String,
    petitioner_id: String,
    status: PetitionStatus,
    subject: Option<String>,
    filed_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
    resolution: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    trace: RecordTrace,
}

#[derive(Deserialize)]
struct PetitionIndexRow {
    petition_id: String,
    petitioner_id: String,
    status: PetitionStatus,
    #[serde(default)]
    subject: Option<String>,
    filed_at: DateTime<Utc>,
    #[serde(default)]
    acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    resolved_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    trace: RecordTrace,
}

impl TryFrom<PetitionIndexRow> for PetitionIndexRecord {
    type Error = RecordError;

    fn try_from(row: PetitionIndexRow) -> Result<Self, Self::Error> {
        require_id("petition_id", &row.petition_id)?;
        require_id("petitioner_id", &row.petitioner_id)?;
        require_paired(
            ("resolution", &row.resolution),
            ("resolved_at", &row.resolved_at),
        )?;
        if row.resolved_at.is_some() != (row.status == PetitionStatus::Resolved) {
            return Err(RecordError::Inconsistent(
                "resolved_at must be set exactly when status is resolved".to_string(),
            ));
        }

        Ok(Self {
            petition_id: row.petition_id,
            petitioner_id: row.petitioner_id,
            status: row.status,
            subject: row.subject,
            filed_at: row.filed_at,
            acknowledged_at: row.acknowledged_at,
            resolution: row.resolution,
            resolved_at: row.resolved_at,
            trace: row.trace,
        })
    }
}

impl PetitionIndexRecord {
    /// Petition identifier.
    #[must_use]
    pub fn petition_id(&self) -> &str {
        &self.petition_id
    }

    /// Who filed the petition.
    #[must_use]
    pub fn petitioner_id(&self) -> &str {
        &self.petitioner_id
    }

    /// Current stage.
    #[must_use]
    pub const fn status(&self) -> PetitionStatus {
        self.status
    }

    /// Short description of the petition.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// When the petition was filed.
    #[must_use]
    pub const fn filed_at(&self) -> DateTime<Utc> {
        self.filed_at
    }

    /// When receipt was confirmed.
    #[must_use]
    pub const fn acknowledged_at(&self) -> Option<DateTime<Utc>> {
        self.acknowledged_at
    }

    /// Outcome text.
    #[must_use]
    pub fn resolution(&self) -> Option<&str> {
        self.resolution.as_deref()
    }

    /// When the petition was resolved.
    #[must_use]
    pub const fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }
}

impl ProjectionRecord for PetitionIndexRecord {
    const PROJECTION: ProjectionName = ProjectionName::PetitionIndex;
    const ID_FIELD: &'static str = "petition_id";

    fn entity_id(&self) -> &str {
        &self.petition_id
    }

    fn trace(&self) -> &RecordTrace {
        &self.trace
    }

    fn lifecycle_state(&self) -> Option<&'static str> {
        Some(self.status.as_str())
    }

    fn allows_transition_to(&self, next: &Self) -> bool {
        self.status == next.status || self.status.can_transition_to(next.status)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn build(mut extra: Value) -> Result<PetitionIndexRecord, RecordError> {
        let object = extra.as_object_mut().unwrap();
        object.insert("petitioner_id".into(), json!("citizen-9"));
        object.insert("filed_at".into(), json!("2025-01-01T00:00:00Z"));
        object.insert("last_event_id".into(), json!(Uuid::nil()));
        object.insert("last_event_sequence".into(), json!(2));
        object.insert("updated_at".into(), json!("2025-01-01T00:00:00Z"));
        PetitionIndexRecord::from_fields("petition-1", object)
    }

    #[test]
    fn test_lifecycle_edges() {
        use PetitionStatus::{Acknowledged, Filed, Resolved, UnderReview};

        assert!(Filed.can_transition_to(Acknowledged));
        assert!(Filed.can_transition_to(Resolved));
        assert!(Acknowledged.can_transition_to(UnderReview));
        assert!(UnderReview.can_transition_to(Resolved));
        assert!(!Filed.can_transition_to(UnderReview));
        assert!(!Resolved.can_transition_to(Filed));
    }

    #[test]
    fn test_resolution_pairing() {
        assert!(build(json!({"status": "resolved", "resolution": "granted"})).is_err());
        assert!(build(json!({"status": "filed", "resolved_at": "2025-01-05T00:00:00Z", "resolution": "x"})).is_err());

        let resolved = build(json!({
            "status": "resolved",
            "resolution": "granted",
            "resolved_at": "2025-01-05T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(resolved.resolution(), Some("granted"));
        assert!(resolved.status().is_terminal());
    }

    #[test]
    fn test_missing_petitioner_is_rejected() {
        let fields = json!({
            "status": "filed",
            "filed_at": "2025-01-01T00:00:00Z",
            "last_event_id": Uuid::nil(),
            "last_event_sequence": 2,
            "updated_at": "2025-01-01T00:00:00Z"
        });
        assert!(PetitionIndexRecord::from_fields("petition-1", fields.as_object().unwrap()).is_err());
    }
}
