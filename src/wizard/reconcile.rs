//! Reconciliation protocol — decides which state source seeds a bootstrap.
//!
//! Sources are tried as an ordered list of named strategies:
//! resume-by-token, resume-by-cache, fresh session. Each strategy either
//! produces a ready outcome or falls through, recording why as a
//! [`Degradation`] so the host can tell the user what happened.
//!
//! The reconciler only reads the local cache. Committing the outcome (cache
//! write, active session swap) is the manager's job, so a superseded
//! bootstrap leaves nothing behind.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::catalog::StepCatalog;
use super::merge;
use super::model::{AuxiliaryState, Reservation, Session, SessionRecord, StepData, fields};
use super::resolver::{needs_processing_result, resolve_for_session};
use crate::error::WizardError;
use crate::store::local_cache::{CachedSession, SessionStore};
use crate::store::RecordStore;

/// Inbound request context for a bootstrap.
#[derive(Debug, Clone, Default)]
pub struct BootstrapContext {
    /// Resume token from the link the user followed, if any.
    pub resume_token: Option<String>,
}

impl BootstrapContext {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            resume_token: Some(token.into()),
        }
    }
}

/// How the session handed to the host came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapMode {
    Resumed,
    ClaimReservation,
    Fresh,
    /// A resume attempt failed and a fresh session was started instead.
    Expired,
}

impl std::fmt::Display for BootstrapMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Resumed => "resumed",
            Self::ClaimReservation => "claim_reservation",
            Self::Fresh => "fresh",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// The named bootstrap sources, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ResumeByToken,
    ResumeByCache,
    FreshSession,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [
        Strategy::ResumeByToken,
        Strategy::ResumeByCache,
        Strategy::FreshSession,
    ];
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ResumeByToken => "resume_by_token",
            Self::ResumeByCache => "resume_by_cache",
            Self::FreshSession => "fresh_session",
        };
        write!(f, "{s}")
    }
}

/// One observable fallback taken during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degradation {
    pub strategy: Strategy,
    pub error: WizardError,
}

impl Degradation {
    fn new(strategy: Strategy, error: WizardError) -> Self {
        Self { strategy, error }
    }

    /// The user's explicit resume link could not be honoured.
    pub fn is_expiry(&self) -> bool {
        self.strategy == Strategy::ResumeByToken
            && matches!(
                self.error,
                WizardError::SessionNotFound { .. } | WizardError::SessionExpiredOrInvalid { .. }
            )
    }
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

/// A paid reservation the registrant can bind during the founder step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationClaim {
    pub token: String,
    pub email: String,
}

impl From<&Reservation> for ReservationClaim {
    fn from(r: &Reservation) -> Self {
        Self {
            token: r.token.clone(),
            email: r.email.clone(),
        }
    }
}

/// A ready-to-use session plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapOutcome {
    pub step_index: usize,
    pub session: Session,
    pub mode: BootstrapMode,
    pub notices: Vec<Degradation>,
    pub claim: Option<ReservationClaim>,
}

impl BootstrapOutcome {
    fn new(session: Session, step_index: usize, mode: BootstrapMode) -> Self {
        Self {
            step_index,
            session,
            mode,
            notices: Vec::new(),
            claim: None,
        }
    }
}

/// Result of a "continue where you left off" lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum EmailLookup {
    /// An open session exists for this identity.
    Resumable(BootstrapOutcome),
    /// No session, but a paid reservation is waiting to be claimed. The host
    /// bootstraps with the claim token to start the flow.
    Claim(ReservationClaim),
}

enum Attempt {
    Ready(BootstrapOutcome),
    FallThrough,
}

/// Runs the bootstrap strategies against the record store and local cache.
pub struct Reconciler {
    records: Arc<dyn RecordStore>,
    sessions: Arc<SessionStore>,
}

impl Reconciler {
    pub fn new(records: Arc<dyn RecordStore>, sessions: Arc<SessionStore>) -> Self {
        Self { records, sessions }
    }

    /// Produce a ready session from the best available source.
    pub async fn bootstrap(&self, ctx: &BootstrapContext) -> Result<BootstrapOutcome, WizardError> {
        let mut notices = Vec::new();

        for strategy in Strategy::ORDER {
            let attempt = match strategy {
                Strategy::ResumeByToken => self.resume_by_token(ctx, &mut notices).await,
                Strategy::ResumeByCache => self.resume_by_cache(&mut notices).await,
                Strategy::FreshSession => self.fresh_session(&notices).await?,
            };

            if let Attempt::Ready(mut outcome) = attempt {
                for n in &notices {
                    warn!(strategy = %n.strategy, error = %n.error, "Bootstrap degraded");
                }
                outcome.notices = notices;
                info!(
                    session_id = %outcome.session.session_id,
                    mode = %outcome.mode,
                    strategy = %strategy,
                    step_index = outcome.step_index,
                    "Bootstrap resolved"
                );
                return Ok(outcome);
            }
        }

        Err(WizardError::SessionNotFound {
            lookup: "any bootstrap source".to_string(),
        })
    }

    /// Look up an open session or a claimable reservation for `email`.
    ///
    /// Never creates anything.
    pub async fn resume_by_email(&self, email: &str) -> Result<EmailLookup, WizardError> {
        let email = super::validation::normalize_email(email);
        let mut lookup_failure = None;

        match self.records.find_session_by_identity(&email).await {
            Ok(Some(record)) if !record.session.is_complete => {
                let mut notices = Vec::new();
                let outcome = self.adopt_record(record, &mut notices).await;
                return Ok(EmailLookup::Resumable(BootstrapOutcome { notices, ..outcome }));
            }
            Ok(Some(record)) => {
                info!(session_id = %record.session_id(), "Latest session for identity is already complete");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Identity lookup failed, trying reservations");
                lookup_failure = Some(WizardError::transient("find_session_by_identity", e));
            }
        }

        match self.records.find_reservation_by_email(&email).await {
            Ok(Some(reservation)) if reservation.is_claimable() => {
                return Ok(EmailLookup::Claim(ReservationClaim::from(&reservation)));
            }
            Ok(_) => {}
            Err(e) => {
                return Err(lookup_failure
                    .unwrap_or_else(|| WizardError::transient("find_reservation_by_email", e)));
            }
        }

        Err(lookup_failure.unwrap_or(WizardError::SessionNotFound { lookup: email }))
    }

    // ── Strategies ──────────────────────────────────────────────────

    async fn resume_by_token(
        &self,
        ctx: &BootstrapContext,
        notices: &mut Vec<Degradation>,
    ) -> Attempt {
        let Some(token) = ctx.resume_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
        else {
            return Attempt::FallThrough;
        };
        let degrade = |error| Degradation::new(Strategy::ResumeByToken, error);

        if let Ok(session_id) = Uuid::parse_str(token) {
            match self.records.get_session(session_id).await {
                Ok(Some(record)) => return Attempt::Ready(self.adopt_record(record, notices).await),
                Ok(None) => {}
                Err(e) => {
                    notices.push(degrade(WizardError::transient("get_session", e)));
                    return Attempt::FallThrough;
                }
            }
        }

        match self.records.find_reservation(token).await {
            Ok(Some(reservation)) if reservation.is_claimable() => {
                match self.prepare_claim(&reservation, notices).await {
                    Ok(outcome) => Attempt::Ready(outcome),
                    Err(e) => {
                        notices.push(degrade(e));
                        Attempt::FallThrough
                    }
                }
            }
            Ok(Some(reservation)) => {
                notices.push(degrade(WizardError::SessionExpiredOrInvalid {
                    reason: format!("reservation is {} and cannot be claimed", reservation.status),
                }));
                Attempt::FallThrough
            }
            Ok(None) => {
                notices.push(degrade(WizardError::SessionNotFound {
                    lookup: format!("resume token {token}"),
                }));
                Attempt::FallThrough
            }
            Err(e) => {
                notices.push(degrade(WizardError::transient("find_reservation", e)));
                Attempt::FallThrough
            }
        }
    }

    async fn resume_by_cache(&self, notices: &mut Vec<Degradation>) -> Attempt {
        // An unusable resume link invalidates whatever the cache holds.
        if notices.iter().any(Degradation::is_expiry) {
            return Attempt::FallThrough;
        }
        let degrade = |error| Degradation::new(Strategy::ResumeByCache, error);

        let session = match self.sessions.load().await {
            Ok(CachedSession::Empty) => return Attempt::FallThrough,
            Ok(CachedSession::Valid(session)) if !session.is_complete => session,
            Ok(CachedSession::Valid(_)) => {
                notices.push(degrade(WizardError::SessionExpiredOrInvalid {
                    reason: "cached session is already complete".to_string(),
                }));
                return Attempt::FallThrough;
            }
            Ok(CachedSession::Malformed(reason)) => {
                notices.push(degrade(WizardError::SessionExpiredOrInvalid { reason }));
                return Attempt::FallThrough;
            }
            Err(e) => {
                notices.push(degrade(WizardError::transient("read local cache", e)));
                return Attempt::FallThrough;
            }
        };

        let aux = self.auxiliary_state(&session, Strategy::ResumeByCache, notices).await;
        Attempt::Ready(landed(session, &aux, BootstrapMode::Resumed))
    }

    async fn fresh_session(&self, notices: &[Degradation]) -> Result<Attempt, WizardError> {
        let record = self
            .records
            .create_session()
            .await
            .map_err(|e| WizardError::transient("create_session", e))?;

        let mode = if notices.iter().any(Degradation::is_expiry) {
            BootstrapMode::Expired
        } else {
            BootstrapMode::Fresh
        };
        Ok(Attempt::Ready(BootstrapOutcome::new(record.session, 0, mode)))
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Replace local state with the server's copy and recompute the step.
    async fn adopt_record(
        &self,
        record: SessionRecord,
        notices: &mut Vec<Degradation>,
    ) -> BootstrapOutcome {
        let session = record.session;
        let aux = self.auxiliary_state(&session, Strategy::ResumeByToken, notices).await;
        landed(session, &aux, BootstrapMode::Resumed)
    }

    /// Session for a paid reservation: reuse an open cached session already
    /// tied to the same claim, otherwise start a new one, and pre-fill the
    /// founder email.
    async fn prepare_claim(
        &self,
        reservation: &Reservation,
        notices: &mut Vec<Degradation>,
    ) -> Result<BootstrapOutcome, WizardError> {
        let cached = match self.sessions.load().await {
            Ok(CachedSession::Valid(s))
                if !s.is_complete && s.reservation_token.as_deref() == Some(reservation.token.as_str()) =>
            {
                Some(s)
            }
            _ => None,
        };

        let mut outcome = match cached {
            Some(session) => {
                let aux = self.auxiliary_state(&session, Strategy::ResumeByToken, notices).await;
                landed(session, &aux, BootstrapMode::ClaimReservation)
            }
            None => {
                let record = self
                    .records
                    .create_session()
                    .await
                    .map_err(|e| WizardError::transient("create_session", e))?;
                let mut session = record.session;
                session.reservation_token = Some(reservation.token.clone());

                let mut prefill = StepData::new();
                prefill.insert(fields::EMAIL.to_string(), reservation.email.clone().into());
                let session = merge::draft(&session, StepCatalog::key_at_or_first(0).as_str(), &prefill)?;
                BootstrapOutcome::new(session, 0, BootstrapMode::ClaimReservation)
            }
        };
        outcome.claim = Some(ReservationClaim::from(reservation));
        Ok(outcome)
    }

    /// Fetch the processing result when it can affect the landing step.
    ///
    /// A failed lookup is treated as "no valid result", which keeps the user
    /// on the processing step rather than showing an unscored analysis.
    async fn auxiliary_state(
        &self,
        session: &Session,
        strategy: Strategy,
        notices: &mut Vec<Degradation>,
    ) -> AuxiliaryState {
        if !needs_processing_result(&session.completed_steps) {
            return AuxiliaryState::default();
        }
        match self.records.get_processing_result(session.session_id).await {
            Ok(result) => AuxiliaryState::with_processing(result),
            Err(e) => {
                notices.push(Degradation::new(
                    strategy,
                    WizardError::transient("get_processing_result", e),
                ));
                AuxiliaryState::default()
            }
        }
    }
}

/// Recompute the landing step for `session` and sync its advisory key.
fn landed(mut session: Session, aux: &AuxiliaryState, mode: BootstrapMode) -> BootstrapOutcome {
    let step_index = resolve_for_session(&session, aux);
    session.current_step_key = StepCatalog::key_at_or_first(step_index);
    BootstrapOutcome::new(session, step_index, mode)
}
