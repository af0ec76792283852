//! Per-step completion rules, checked against the merged step data.

use std::sync::LazyLock;

use regex::Regex;

use super::catalog::StepKey;
use super::model::{StepData, fields};
use crate::error::WizardError;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// Check whether `data` is enough to mark `step` complete.
pub fn validate_step(step: StepKey, data: &StepData) -> Result<(), WizardError> {
    match step {
        StepKey::Founder => {
            require_text(step, data, fields::FULL_NAME)?;
            let email = require_text(step, data, fields::EMAIL)?;
            if !is_valid_email(email) {
                return Err(invalid(step, format!("'{email}' is not a valid email address")));
            }
            Ok(())
        }
        StepKey::Venture => require_text(step, data, fields::VENTURE_NAME).map(|_| ()),
        // Owned by the upload, scoring, and report collaborators.
        StepKey::Team | StepKey::Upload | StepKey::Processing | StepKey::Analysis => Ok(()),
    }
}

pub fn is_valid_email(candidate: &str) -> bool {
    EMAIL_RE.is_match(candidate.trim())
}

/// Normalized form used as the resume-by-email identity.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Email recorded in a founder step, if present and well-formed.
pub fn founder_email(data: &StepData) -> Option<String> {
    data.get(fields::EMAIL)
        .and_then(|v| v.as_str())
        .filter(|e| is_valid_email(e))
        .map(normalize_email)
}

fn require_text<'a>(step: StepKey, data: &'a StepData, field: &str) -> Result<&'a str, WizardError> {
    match data.get(field).and_then(|v| v.as_str()).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(invalid(step, format!("missing required field '{field}'"))),
    }
}

fn invalid(step: StepKey, reason: String) -> WizardError {
    WizardError::StepValidation {
        step: step.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(v: serde_json::Value) -> StepData {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn founder_requires_name_and_email() {
        assert!(validate_step(
            StepKey::Founder,
            &data(json!({"full_name": "Ada Lovelace", "email": "ada@example.com"}))
        )
        .is_ok());

        let err = validate_step(StepKey::Founder, &data(json!({"email": "ada@example.com"})))
            .unwrap_err();
        assert!(err.to_string().contains("full_name"));

        let err = validate_step(
            StepKey::Founder,
            &data(json!({"full_name": "Ada", "email": "not-an-email"})),
        )
        .unwrap_err();
        assert!(matches!(err, WizardError::StepValidation { ref step, .. } if step == "founder"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = validate_step(StepKey::Venture, &data(json!({"name": "   "}))).unwrap_err();
        assert!(err.to_string().contains("name"));
        assert!(validate_step(StepKey::Venture, &data(json!({"name": 42}))).is_err());
    }

    #[test]
    fn collaborator_steps_have_no_required_fields() {
        for step in [StepKey::Team, StepKey::Upload, StepKey::Processing, StepKey::Analysis] {
            assert!(validate_step(step, &StepData::new()).is_ok());
        }
    }

    #[test]
    fn founder_email_is_normalized() {
        let d = data(json!({"email": "  Ada@Example.COM "}));
        assert_eq!(founder_email(&d).as_deref(), Some("ada@example.com"));
        assert_eq!(founder_email(&data(json!({"email": "nope"}))), None);
        assert_eq!(founder_email(&StepData::new()), None);
    }
}
