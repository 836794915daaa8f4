//! Judicial panel registry record.

use super::{ProjectionRecord, RecordError, RecordTrace, require_id, require_paired};
use crate::projection::ProjectionName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

closed_set! {
    /// Lifecycle stage of a judicial panel.
    PanelStatus, field = "status" {
        /// Announced, members not yet seated
        Pending => "pending",
        /// Members seated
        Convened => "convened",
        /// Hearing the matter
        Deliberating => "deliberating",
        /// Finding published
        FindingIssued => "finding_issued",
        /// Disbanded (terminal)
        Dissolved => "dissolved",
    }
}

impl PanelStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Dissolved)
    }

    /// Whether `next` is reachable in one step.
    ///
    /// The lifecycle is linear, and dissolution is reachable from every
    /// non-terminal stage.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Convened)
                | (Self::Convened, Self::Deliberating)
                | (Self::Deliberating, Self::FindingIssued)
                | (
                    Self::Pending | Self::Convened | Self::Deliberating | Self::FindingIssued,
                    Self::Dissolved
                )
        )
    }
}

/// Registry entry for one judicial panel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PanelRegistryRow")]
pub struct PanelRegistryRecord {
    panel_id: String,
    status: PanelStatus,
    members: Vec<String>,
    subject_ref: Option<String>,
    convened_at: Option<DateTime<Utc>>,
    finding_id: Option<String>,
    finding_issued_at: Option<DateTime<Utc>>,
    dissolved_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    trace: RecordTrace,
}

#[derive(Deserialize)]
struct PanelRegistryRow {
    panel_id: String,
    status: PanelStatus,
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    subject_ref: Option<String>,
    #[serde(default)]
    convened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    finding_id: Option<String>,
    #[serde(default)]
    finding_issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    dissolved_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    trace: RecordTrace,
}

impl TryFrom<PanelRegistryRow> for PanelRegistryRecord {
    type Error = RecordError;

    fn try_from(row: PanelRegistryRow) -> Result<Self, Self::Error> {
        require_id("panel_id", &row.panel_id)?;
        require_paired(
            ("finding_id", &row.finding_id),
            ("finding_issued_at", &row.finding_issued_at),
        )?;
        if row.status == PanelStatus::FindingIssued && row.finding_id.is_none() {
            return Err(RecordError::Inconsistent(
                "status finding_issued requires finding_id".to_string(),
            ));
        }
        if row.dissolved_at.is_some() != (row.status == PanelStatus::Dissolved) {
            return Err(RecordError::Inconsistent(
                "dissolved_at must be set exactly when status is dissolved".to_string(),
            ));
        }

        Ok(Self {
            panel_id: row.panel_id,
            status: row.status,
            members: row.members,
            subject_ref: row.subject_ref,
            convened_at: row.convened_at,
            finding_id: row.finding_id,
            finding_issued_at: row.finding_issued_at,
            dissolved_at: row.dissolved_at,
            trace: row.trace,
        })
    }
}

impl PanelRegistryRecord {
    /// Panel identifier.
    #[must_use]
    pub fn panel_id(&self) -> &str {
        &self.panel_id
    }

    /// Current lifecycle stage.
    #[must_use]
    pub const fn status(&self) -> PanelStatus {
        self.status
    }

    /// Seated members.
    #[must_use]
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Matter under review.
    #[must_use]
    pub fn subject_ref(&self) -> Option<&str> {
        self.subject_ref.as_deref()
    }

    /// When the panel convened.
    #[must_use]
    pub const fn convened_at(&self) -> Option<DateTime<Utc>> {
        self.convened_at
    }

    /// Published finding.
    #[must_use]
    pub fn finding_id(&self) -> Option<&str> {
        self.finding_id.as_deref()
    }

    /// When the finding was published.
    #[must_use]
    pub const fn finding_issued_at(&self) -> Option<DateTime<Utc>> {
        self.finding_issued_at
    }

    /// When the panel was dissolved.
    #[must_use]
    pub const fn dissolved_at(&self) -> Option<DateTime<Utc>> {
        self.dissolved_at
    }
}

impl ProjectionRecord for PanelRegistryRecord {
    const PROJECTION: ProjectionName = ProjectionName::PanelRegistry;
    const ID_FIELD: &'static str = "panel_id";

    fn entity_id(&self) -> &str {
        &self.panel_id
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

    fn build(mut extra: Value) -> Result<PanelRegistryRecord, RecordError> {
        let object = extra.as_object_mut().unwrap();
        object.insert("last_event_id".into(), json!(Uuid::nil()));
        object.insert("last_event_sequence".into(), json!(4));
        object.insert("updated_at".into(), json!("2025-01-01T00:00:00Z"));
        PanelRegistryRecord::from_fields("panel-1", object)
    }

    #[test]
    fn test_dissolved_reachable_from_every_non_terminal_status() {
        for status in PanelStatus::ALL {
            if !status.is_terminal() {
                assert!(status.can_transition_to(PanelStatus::Dissolved), "{status}");
            }
        }
        assert!(!PanelStatus::Dissolved.can_transition_to(PanelStatus::Pending));
    }

    #[test]
    fn test_linear_lifecycle() {
        assert!(PanelStatus::Pending.can_transition_to(PanelStatus::Convened));
        assert!(PanelStatus::Convened.can_transition_to(PanelStatus::Deliberating));
        assert!(PanelStatus::Deliberating.can_transition_to(PanelStatus::FindingIssued));
        assert!(!PanelStatus::Pending.can_transition_to(PanelStatus::FindingIssued));
    }

    #[test]
    fn test_finding_fields_are_paired() {
        let err = build(json!({
            "status": "deliberating",
            "finding_id": "finding-1"
        }));
        assert!(err.is_err());

        let ok = build(json!({
            "status": "finding_issued",
            "finding_id": "finding-1",
            "finding_issued_at": "2025-01-03T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(ok.finding_id(), Some("finding-1"));
    }

    #[test]
    fn test_finding_issued_requires_a_finding() {
        assert!(build(json!({"status": "finding_issued"})).is_err());
    }

    #[test]
    fn test_dissolved_at_tracks_status() {
        assert!(build(json!({"status": "dissolved"})).is_err());
        assert!(
            build(json!({"status": "convened", "dissolved_at": "2025-01-03T00:00:00Z"})).is_err()
        );
        assert!(
            build(json!({"status": "dissolved", "dissolved_at": "2025-01-03T00:00:00Z"})).is_ok()
        );
    }
}
