//! Merge engine — folds a step submission into a session.

use super::catalog::StepKey;
use super::model::{Session, StepData};
use crate::error::WizardError;

/// Shallow merge: keys in `partial` overwrite, keys absent from it survive.
pub fn shallow_merge(existing: &StepData, partial: &StepData) -> StepData {
    let mut merged = existing.clone();
    for (k, v) in partial {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Apply a completed step submission.
///
/// Returns a new session with the step's data merged and the step added to
/// `completed_steps`. The input is untouched, so callers swap the result in
/// as one unit. `last_updated` is left alone; stamping is the caller's job.
pub fn apply(session: &Session, step_key: &str, partial: &StepData) -> Result<Session, WizardError> {
    let key: StepKey = step_key.parse()?;
    let mut next = merge_data(session, key, partial);
    next.completed_steps.insert(key);
    Ok(next)
}

/// Merge a draft without marking the step complete.
pub fn draft(session: &Session, step_key: &str, partial: &StepData) -> Result<Session, WizardError> {
    let key: StepKey = step_key.parse()?;
    Ok(merge_data(session, key, partial))
}

/// Mark the session complete if every step has been completed.
///
/// Returns the session unchanged otherwise; completion is set exactly once.
pub fn finalize(session: &Session) -> Session {
    let mut next = session.clone();
    if !next.is_complete && next.all_steps_completed() {
        next.is_complete = true;
    }
    next
}

fn merge_data(session: &Session, key: StepKey, partial: &StepData) -> Session {
    let mut next = session.clone();
    let merged = match session.step_data.get(&key) {
        Some(existing) => shallow_merge(existing, partial),
        None => partial.clone(),
    };
    next.step_data.insert(key, merged);
    next
}
