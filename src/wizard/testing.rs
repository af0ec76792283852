//! Test double: an in-memory libSQL record store with switchable failures.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::{LibSqlBackend, RecordStore};
use crate::wizard::catalog::StepKey;
use crate::wizard::model::{ProcessingResult, Reservation, SessionRecord, StepData};

pub(crate) struct FlakyRecords {
    inner: LibSqlBackend,
    fail_lookups: AtomicBool,
    fail_writes: AtomicBool,
    created: AtomicUsize,
    stall: Mutex<Option<Duration>>,
}

impl FlakyRecords {
    pub(crate) async fn new() -> Self {
        Self {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            fail_lookups: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            created: AtomicUsize::new(0),
            stall: Mutex::new(None),
        }
    }

    /// Make every read fail with a transport error.
    pub(crate) fn fail_lookups(&self, on: bool) {
        self.fail_lookups.store(on, Ordering::SeqCst);
    }

    /// Make every session write fail with a transport error.
    pub(crate) fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Delay the next `create_session` call by `delay`.
    pub(crate) fn stall_next_create(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    pub(crate) fn sessions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn check_read(&self, op: &str) -> Result<(), DatabaseError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(DatabaseError::Transport(format!("{op}: connection refused")));
        }
        Ok(())
    }

    fn check_write(&self, op: &str) -> Result<(), DatabaseError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Transport(format!("{op}: connection refused")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyRecords {
    async fn create_session(&self) -> Result<SessionRecord, DatabaseError> {
        self.check_write("create_session")?;
        let stall = self.stall.lock().unwrap().take();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        let record = self.inner.create_session().await?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>, DatabaseError> {
        self.check_read("get_session")?;
        self.inner.get_session(session_id).await
    }

    async fn find_session_by_identity(
        &self,
        email: &str,
    ) -> Result<Option<SessionRecord>, DatabaseError> {
        self.check_read("find_session_by_identity")?;
        self.inner.find_session_by_identity(email).await
    }

    async fn persist_step_update(
        &self,
        session_id: Uuid,
        step: StepKey,
        partial: &StepData,
    ) -> Result<SessionRecord, DatabaseError> {
        self.check_write("persist_step_update")?;
        self.inner.persist_step_update(session_id, step, partial).await
    }

    async fn mark_complete(&self, session_id: Uuid) -> Result<(), DatabaseError> {
        self.check_write("mark_complete")?;
        self.inner.mark_complete(session_id).await
    }

    async fn find_reservation(&self, token: &str) -> Result<Option<Reservation>, DatabaseError> {
        self.check_read("find_reservation")?;
        self.inner.find_reservation(token).await
    }

    async fn find_reservation_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Reservation>, DatabaseError> {
        self.check_read("find_reservation_by_email")?;
        self.inner.find_reservation_by_email(email).await
    }

    async fn create_reservation(&self, email: &str) -> Result<Reservation, DatabaseError> {
        self.inner.create_reservation(email).await
    }

    async fn complete_reservation(&self, token: &str) -> Result<Reservation, DatabaseError> {
        self.inner.complete_reservation(token).await
    }

    async fn claim_reservation(
        &self,
        token: &str,
        founder_id: Uuid,
    ) -> Result<Reservation, DatabaseError> {
        self.check_write("claim_reservation")?;
        self.inner.claim_reservation(token, founder_id).await
    }

    async fn get_processing_result(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ProcessingResult>, DatabaseError> {
        self.check_read("get_processing_result")?;
        self.inner.get_processing_result(session_id).await
    }

    async fn record_processing_result(
        &self,
        session_id: Uuid,
        result: &ProcessingResult,
    ) -> Result<(), DatabaseError> {
        self.inner.record_processing_result(session_id, result).await
    }
}
