//! Step resolver — computes the step a user should land on.
//!
//! The stored `current_step_key` is only a hint. Every bootstrap and every
//! transition recomputes the landing index from the completed steps and the
//! processing result, so a stale cache can never park a user on a step they
//! are not entitled to see.

use std::collections::BTreeSet;

use super::catalog::{STEP_COUNT, StepCatalog, StepKey};
use super::model::{AuxiliaryState, Session};

/// Resolve the zero-based landing index.
///
/// Pure and total: equal inputs always give equal outputs. The hint is
/// accepted for signature parity with the stored session and never changes
/// the result.
pub fn resolve_step_index(
    completed_steps: &BTreeSet<StepKey>,
    _current_step_hint: Option<StepKey>,
    aux: &AuxiliaryState,
) -> usize {
    if completed_steps.is_empty() {
        return 0;
    }

    let Some(last_completed) = StepCatalog::steps()
        .iter()
        .rposition(|d| completed_steps.contains(&d.key))
    else {
        return 0;
    };

    let mut candidate = last_completed + 1;

    if candidate == StepCatalog::analysis_index() {
        let analysis_visited = completed_steps.contains(&StepKey::Analysis);
        if !aux.has_valid_score() && !analysis_visited {
            candidate = StepCatalog::processing_index();
        }
    }

    // Once analysis has been reached it stays reachable.
    if completed_steps.contains(&StepKey::Analysis) {
        candidate = StepCatalog::analysis_index();
    }

    candidate.min(STEP_COUNT - 1)
}

/// Convenience wrapper over a whole session.
pub fn resolve_for_session(session: &Session, aux: &AuxiliaryState) -> usize {
    resolve_step_index(
        &session.completed_steps,
        Some(session.current_step_key),
        aux,
    )
}

/// Whether the processing result can influence the resolved index, i.e. the
/// highest completed step is processing. Lets callers skip the lookup.
pub fn needs_processing_result(completed_steps: &BTreeSet<StepKey>) -> bool {
    StepCatalog::steps()
        .iter()
        .rposition(|d| completed_steps.contains(&d.key))
        == Some(StepCatalog::processing_index())
}

/// Whether the analysis step may be shown right now.
pub fn analysis_reachable(completed_steps: &BTreeSet<StepKey>, aux: &AuxiliaryState) -> bool {
    completed_steps.contains(&StepKey::Analysis) || aux.has_valid_score()
}
