//! WizardManager — the host-facing façade over the intake flow.
//!
//! Owns the active session value, commits bootstrap outcomes, and drives step
//! transitions: validate, merge, save the optimistic local copy, persist to
//! the record server, then recompute the landing step.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::catalog::{StepCatalog, StepKey};
use super::merge;
use super::model::{AuxiliaryState, Session, StepData};
use super::reconcile::{BootstrapContext, BootstrapOutcome, EmailLookup, Reconciler};
use super::resolver::{analysis_reachable, needs_processing_result, resolve_for_session};
use super::validation::validate_step;
use crate::error::{DatabaseError, WizardError};
use crate::store::RecordStore;
use crate::store::local_cache::SessionStore;

/// The session a host is currently showing, and where.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    pub session: Session,
    pub step_index: usize,
}

/// Result of a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step_index: usize,
    pub session: Session,
}

impl From<ActiveSession> for StepOutcome {
    fn from(a: ActiveSession) -> Self {
        Self {
            step_index: a.step_index,
            session: a.session,
        }
    }
}

/// Coordinates bootstrap, step submission, and navigation for one host.
pub struct WizardManager {
    records: Arc<dyn RecordStore>,
    sessions: Arc<SessionStore>,
    reconciler: Reconciler,
    active: RwLock<Option<ActiveSession>>,
    /// Ticket of the most recently initiated bootstrap.
    generation: AtomicU64,
    /// Serializes commits of bootstrap outcomes and transitions.
    commit: Mutex<()>,
}

impl WizardManager {
    pub fn new(records: Arc<dyn RecordStore>, sessions: Arc<SessionStore>) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&records), Arc::clone(&sessions));
        Self {
            records,
            sessions,
            reconciler,
            active: RwLock::new(None),
            generation: AtomicU64::new(0),
            commit: Mutex::new(()),
        }
    }

    /// Whether a session has reached its terminal, immutable state.
    pub fn is_terminal(session: &Session) -> bool {
        session.is_complete
    }

    /// Snapshot of the active session, if bootstrapped.
    pub async fn current(&self) -> Option<ActiveSession> {
        self.active.read().await.clone()
    }

    /// Reconcile the available sources and make the result active.
    ///
    /// Only the most recently initiated bootstrap commits; an older one that
    /// finishes later returns [`WizardError::Superseded`] and leaves no trace.
    pub async fn bootstrap(&self, ctx: &BootstrapContext) -> Result<BootstrapOutcome, WizardError> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.reconciler.bootstrap(ctx).await;

        let _guard = self.commit.lock().await;
        if self.generation.load(Ordering::SeqCst) != ticket {
            debug!(ticket, "Discarding superseded bootstrap");
            return Err(WizardError::Superseded);
        }
        let outcome = result?;
        self.commit_local(&outcome.session, outcome.step_index).await;
        Ok(outcome)
    }

    /// "Continue where you left off" by email.
    ///
    /// A found session becomes active and supersedes any bootstrap still in
    /// flight. A claimable reservation is returned as-is; the host bootstraps
    /// with its token to start the claim. A lookup that commits nothing leaves
    /// in-flight bootstraps alone.
    pub async fn resume_by_email(&self, email: &str) -> Result<EmailLookup, WizardError> {
        let seen = self.generation.load(Ordering::SeqCst);
        let found = self.reconciler.resume_by_email(email).await?;

        if let EmailLookup::Resumable(outcome) = &found {
            let _guard = self.commit.lock().await;
            if self.generation.load(Ordering::SeqCst) != seen {
                debug!(seen, "Discarding email resume overtaken by a bootstrap");
                return Err(WizardError::Superseded);
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.commit_local(&outcome.session, outcome.step_index).await;
        }
        Ok(found)
    }

    /// Complete one step with `data` and advance.
    ///
    /// On a persistence failure the merged local copy stays active and cached
    /// and the call returns `TransientIo`; resubmitting is safe.
    pub async fn submit_step(&self, step_key: &str, data: StepData) -> Result<StepOutcome, WizardError> {
        let _guard = self.commit.lock().await;
        let session = self.open_session().await?;
        let key: StepKey = step_key.parse()?;

        let merged = match session.data_for(key) {
            Some(existing) => merge::shallow_merge(existing, &data),
            None => data.clone(),
        };
        validate_step(key, &merged)?;

        if key == StepKey::Analysis && !session.completed_steps.contains(&StepKey::Analysis) {
            let aux = self.fetch_processing(&session).await?;
            if !analysis_reachable(&session.completed_steps, &aux) {
                return Err(WizardError::PreconditionFailed {
                    reason: "analysis requires a successful processing result".to_string(),
                });
            }
        }

        let mut next = merge::apply(&session, key.as_str(), &data)?;
        next.last_updated = Utc::now();
        let optimistic_index = resolve_for_session(&next, &AuxiliaryState::default());
        self.commit_local(&next, optimistic_index).await;

        let record = self
            .records
            .persist_step_update(next.session_id, key, &merged)
            .await
            .map_err(|e| {
                warn!(session_id = %next.session_id, step = %key, error = %e, "Step persistence failed, keeping local copy");
                WizardError::transient("persist_step_update", e)
            })?;

        if next.founder_id.is_none() {
            next.founder_id = record.session.founder_id;
        }
        self.bind_reservation(&mut next).await;

        if next.completed_steps.contains(&StepKey::Analysis) {
            let finalized = merge::finalize(&next);
            if Self::is_terminal(&finalized) {
                self.records
                    .mark_complete(finalized.session_id)
                    .await
                    .map_err(|e| WizardError::transient("mark_complete", e))?;
                next = finalized;
                info!(session_id = %next.session_id, "Intake complete");
            }
        }

        let aux = if needs_processing_result(&next.completed_steps) {
            self.fetch_processing(&next).await.unwrap_or_else(|e| {
                warn!(session_id = %next.session_id, error = %e, "Processing lookup failed, holding at processing");
                AuxiliaryState::default()
            })
        } else {
            AuxiliaryState::default()
        };
        let step_index = resolve_for_session(&next, &aux);
        self.commit_local(&next, step_index).await;

        info!(
            session_id = %next.session_id,
            step = %key,
            step_index,
            "Step completed"
        );
        Ok(self.snapshot(next, step_index))
    }

    /// Merge `data` into a step without completing it. Local only.
    pub async fn save_draft(&self, step_key: &str, data: StepData) -> Result<StepOutcome, WizardError> {
        let _guard = self.commit.lock().await;
        let session = self.open_session().await?;
        let step_index = self.current_index().await;

        let mut next = merge::draft(&session, step_key, &data)?;
        next.last_updated = Utc::now();
        self.commit_local(&next, step_index).await;
        Ok(self.snapshot(next, step_index))
    }

    /// Step back one page. Completed steps are untouched.
    pub async fn go_back(&self) -> Result<StepOutcome, WizardError> {
        let _guard = self.commit.lock().await;
        let current = self.current().await.ok_or(WizardError::NoActiveSession)?;

        let step_index = current.step_index.saturating_sub(1);
        let mut session = current.session;
        if !Self::is_terminal(&session) {
            session.current_step_key = StepCatalog::key_at_or_first(step_index);
            session.last_updated = Utc::now();
        }
        self.commit_local(&session, step_index).await;
        Ok(self.snapshot(session, step_index))
    }

    // ── Internals ───────────────────────────────────────────────────

    /// The active session, provided it still accepts transitions.
    async fn open_session(&self) -> Result<Session, WizardError> {
        let current = self.current().await.ok_or(WizardError::NoActiveSession)?;
        if Self::is_terminal(&current.session) {
            return Err(WizardError::SessionExpiredOrInvalid {
                reason: "session is already complete".to_string(),
            });
        }
        Ok(current.session)
    }

    async fn current_index(&self) -> usize {
        self.active
            .read()
            .await
            .as_ref()
            .map(|a| a.step_index)
            .unwrap_or(0)
    }

    async fn fetch_processing(&self, session: &Session) -> Result<AuxiliaryState, WizardError> {
        self.records
            .get_processing_result(session.session_id)
            .await
            .map(AuxiliaryState::with_processing)
            .map_err(|e| WizardError::transient("get_processing_result", e))
    }

    /// Bind a pending reservation once the server has issued a founder id.
    ///
    /// A claim the server refuses is dropped; a transport failure keeps the
    /// token so the next submission retries.
    async fn bind_reservation(&self, session: &mut Session) {
        let (Some(token), Some(founder_id)) = (session.reservation_token.clone(), session.founder_id)
        else {
            return;
        };
        match self.records.claim_reservation(&token, founder_id).await {
            Ok(_) => {
                info!(session_id = %session.session_id, founder_id = %founder_id, "Reservation claimed");
                session.reservation_token = None;
            }
            Err(DatabaseError::Conflict(reason)) | Err(DatabaseError::NotFound { id: reason, .. }) => {
                warn!(session_id = %session.session_id, reason = %reason, "Reservation could not be claimed, dropping");
                session.reservation_token = None;
            }
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "Reservation claim failed, will retry");
            }
        }
    }

    /// Swap in the new active session and mirror it to the cache. A complete
    /// session is never cached.
    async fn commit_local(&self, session: &Session, step_index: usize) {
        let mut session = session.clone();
        if !Self::is_terminal(&session) {
            session.current_step_key = StepCatalog::key_at_or_first(step_index);
        }

        let cached = if Self::is_terminal(&session) {
            self.sessions.clear().await
        } else {
            self.sessions.save(&session).await
        };
        if let Err(e) = cached {
            warn!(session_id = %session.session_id, error = %e, "Local session cache write failed");
        }

        *self.active.write().await = Some(ActiveSession {
            session,
            step_index,
        });
    }

    fn snapshot(&self, mut session: Session, step_index: usize) -> StepOutcome {
        if !Self::is_terminal(&session) {
            session.current_step_key = StepCatalog::key_at_or_first(step_index);
        }
        StepOutcome {
            step_index,
            session,
        }
    }
}
