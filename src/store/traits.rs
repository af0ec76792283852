//! `RecordStore` trait — the async contract for the server-held session
//! records and the collaborators that hang off them.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::wizard::catalog::StepKey;
use crate::wizard::model::{ProcessingResult, Reservation, SessionRecord, StepData};

/// Backend-agnostic record storage.
///
/// Implemented by the libSQL backend on the record server and by the HTTP
/// client on the wizard side. Lookups return `Ok(None)` when nothing matches;
/// `Err` is reserved for storage or transport failures.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ── Sessions ────────────────────────────────────────────────────

    /// Create and return a fresh, empty session record.
    async fn create_session(&self) -> Result<SessionRecord, DatabaseError>;

    /// Look up a session by id.
    async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>, DatabaseError>;

    /// Most recently created session bound to `email`.
    async fn find_session_by_identity(
        &self,
        email: &str,
    ) -> Result<Option<SessionRecord>, DatabaseError>;

    /// Durably merge one step's partial data and mark the step completed.
    ///
    /// Returns the server's copy after the merge, including any identity the
    /// server bound (e.g. `founder_id` after the founder step).
    async fn persist_step_update(
        &self,
        session_id: Uuid,
        step: StepKey,
        partial: &StepData,
    ) -> Result<SessionRecord, DatabaseError>;

    /// Set the terminal completion flag.
    async fn mark_complete(&self, session_id: Uuid) -> Result<(), DatabaseError>;

    // ── Reservations ────────────────────────────────────────────────

    async fn find_reservation(&self, token: &str) -> Result<Option<Reservation>, DatabaseError>;

    async fn find_reservation_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Reservation>, DatabaseError>;

    /// Record a new pending reservation (payment started).
    async fn create_reservation(&self, email: &str) -> Result<Reservation, DatabaseError>;

    /// Mark a reservation as paid.
    async fn complete_reservation(&self, token: &str) -> Result<Reservation, DatabaseError>;

    /// Bind a reservation to the founder who claimed it.
    async fn claim_reservation(
        &self,
        token: &str,
        founder_id: Uuid,
    ) -> Result<Reservation, DatabaseError>;

    // ── Processing ──────────────────────────────────────────────────

    /// Latest scoring output for a session.
    async fn get_processing_result(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ProcessingResult>, DatabaseError>;

    /// Store scoring output (written by the scoring collaborator).
    async fn record_processing_result(
        &self,
        session_id: Uuid,
        result: &ProcessingResult,
    ) -> Result<(), DatabaseError>;
}
