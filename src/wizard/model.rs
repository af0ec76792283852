//! Session, record, and collaborator data models.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::{StepCatalog, StepKey, lenient_step_key};

/// Opaque per-step form data. The wizard never looks inside beyond the
/// fields its validation rules name.
pub type StepData = serde_json::Map<String, serde_json::Value>;

/// The accumulated state of one registrant's progress.
///
/// This is also the exact shape of the local cache document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub founder_id: Option<Uuid>,
    /// Advisory only; the landing step is always recomputed.
    #[serde(default, deserialize_with = "lenient_step_key")]
    pub current_step_key: StepKey,
    #[serde(default)]
    pub completed_steps: BTreeSet<StepKey>,
    #[serde(default)]
    pub step_data: BTreeMap<StepKey, StepData>,
    #[serde(default)]
    pub is_complete: bool,
    pub last_updated: DateTime<Utc>,
    /// Reservation claim to bind once the founder step is persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_token: Option<String>,
}

impl Session {
    /// A brand-new, empty session.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            founder_id: None,
            current_step_key: StepKey::default(),
            completed_steps: BTreeSet::new(),
            step_data: BTreeMap::new(),
            is_complete: false,
            last_updated: Utc::now(),
            reservation_token: None,
        }
    }

    /// Whether every catalog step has been completed.
    pub fn all_steps_completed(&self) -> bool {
        StepCatalog::steps()
            .iter()
            .all(|d| self.completed_steps.contains(&d.key))
    }

    /// Data recorded so far for `step`, if any.
    pub fn data_for(&self, step: StepKey) -> Option<&StepData> {
        self.step_data.get(&step)
    }

    /// Check the structural invariants a cached document must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.is_complete && !self.all_steps_completed() {
            return Err("marked complete with unfinished steps".to_string());
        }
        Ok(())
    }
}

/// Output of the external scoring collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub score: f64,
    #[serde(default)]
    pub has_error: bool,
}

impl ProcessingResult {
    /// Present, positive, and error-free.
    pub fn is_valid(&self) -> bool {
        !self.has_error && self.score > 0.0
    }
}

/// Validation state the step resolver consumes alongside completed steps.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AuxiliaryState {
    pub processing_result: Option<ProcessingResult>,
}

impl AuxiliaryState {
    pub fn with_processing(result: Option<ProcessingResult>) -> Self {
        Self {
            processing_result: result,
        }
    }

    pub fn has_valid_score(&self) -> bool {
        self.processing_result.is_some_and(|r| r.is_valid())
    }
}

/// Payment state of a pre-registration reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Completed,
    Claimed,
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Claimed => "claimed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "claimed" => Ok(Self::Claimed),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

/// A pre-registration payment claim, owned by the payment collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub token: String,
    pub email: String,
    pub status: ReservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub founder_id: Option<Uuid>,
}

impl Reservation {
    /// Paid for and not yet bound to a founder.
    pub fn is_claimable(&self) -> bool {
        self.status == ReservationStatus::Completed && self.founder_id.is_none()
    }
}

/// The server's authoritative copy of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: Session,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub founder_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn session_id(&self) -> Uuid {
        self.session.session_id
    }
}

/// Keys inside step data that the wizard itself interprets.
pub mod fields {
    /// Founder step: registrant's full name.
    pub const FULL_NAME: &str = "full_name";
    /// Founder step: identity used for resume-by-email.
    pub const EMAIL: &str = "email";
    /// Venture step: company name.
    pub const VENTURE_NAME: &str = "name";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_empty() {
        let s = Session::new(Uuid::new_v4());
        assert!(s.completed_steps.is_empty());
        assert!(s.step_data.is_empty());
        assert!(!s.is_complete);
        assert_eq!(s.current_step_key, StepKey::Founder);
        assert!(s.founder_id.is_none());
    }

    #[test]
    fn cache_document_uses_snake_case_keys() {
        let mut s = Session::new(Uuid::new_v4());
        s.completed_steps.insert(StepKey::Venture);
        let mut data = StepData::new();
        data.insert("name".into(), serde_json::json!("Acme"));
        s.step_data.insert(StepKey::Venture, data);

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["completed_steps"], serde_json::json!(["venture"]));
        assert_eq!(json["step_data"]["venture"]["name"], "Acme");
        assert!(json.get("founder_id").is_none());
    }

    #[test]
    fn unknown_completed_step_is_rejected() {
        let doc = serde_json::json!({
            "session_id": Uuid::new_v4(),
            "completed_steps": ["founder", "billing"],
            "last_updated": Utc::now(),
        });
        assert!(serde_json::from_value::<Session>(doc).is_err());
    }

    #[test]
    fn unknown_current_step_is_tolerated() {
        let doc = serde_json::json!({
            "session_id": Uuid::new_v4(),
            "current_step_key": "checkout",
            "last_updated": Utc::now(),
        });
        let s: Session = serde_json::from_value(doc).unwrap();
        assert_eq!(s.current_step_key, StepKey::Founder);
    }

    #[test]
    fn invariants_catch_premature_completion() {
        let mut s = Session::new(Uuid::new_v4());
        s.is_complete = true;
        assert!(s.check_invariants().is_err());

        for d in StepCatalog::steps() {
            s.completed_steps.insert(d.key);
        }
        assert!(s.check_invariants().is_ok());
    }

    #[test]
    fn processing_validity() {
        let ok = ProcessingResult { score: 72.5, has_error: false };
        let zero = ProcessingResult { score: 0.0, has_error: false };
        let failed = ProcessingResult { score: 80.0, has_error: true };
        assert!(ok.is_valid());
        assert!(!zero.is_valid());
        assert!(!failed.is_valid());
        assert!(!AuxiliaryState::default().has_valid_score());
        assert!(AuxiliaryState::with_processing(Some(ok)).has_valid_score());
    }

    #[test]
    fn reservation_claimability() {
        let mut r = Reservation {
            token: "res_1".into(),
            email: "ada@example.com".into(),
            status: ReservationStatus::Completed,
            founder_id: None,
        };
        assert!(r.is_claimable());
        r.founder_id = Some(Uuid::new_v4());
        assert!(!r.is_claimable());
        r.founder_id = None;
        r.status = ReservationStatus::Pending;
        assert!(!r.is_claimable());
    }

    #[test]
    fn reservation_status_roundtrip_str() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::Completed,
            ReservationStatus::Claimed,
        ] {
            assert_eq!(status.to_string().parse::<ReservationStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<ReservationStatus>().is_err());
    }
}
