//! libSQL backend — async `RecordStore` implementation for the record server.
//!
//! Supports local file and in-memory databases.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::RecordStore;
use crate::wizard::catalog::StepKey;
use crate::wizard::merge::shallow_merge;
use crate::wizard::model::{
    ProcessingResult, Reservation, ReservationStatus, Session, SessionRecord, StepData,
};
use crate::wizard::validation::founder_email;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// Read-modify-write operations are serialized through `write_lock`.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn write_session(&self, record: &SessionRecord) -> Result<(), DatabaseError> {
        let s = &record.session;
        let completed = serde_json::to_string(&s.completed_steps)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let step_data = serde_json::to_string(&s.step_data)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "UPDATE sessions SET founder_id = ?1, founder_email = ?2, current_step = ?3,
                    completed_steps = ?4, step_data = ?5, is_complete = ?6,
                    reservation_token = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    opt_text_owned(s.founder_id.map(|id| id.to_string())),
                    opt_text_owned(record.founder_email.clone()),
                    s.current_step_key.as_str(),
                    completed,
                    step_data,
                    s.is_complete as i64,
                    opt_text_owned(s.reservation_token.clone()),
                    s.last_updated.to_rfc3339(),
                    s.session_id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("write_session: {e}")))?;
        Ok(())
    }

    async fn require_session(&self, session_id: Uuid) -> Result<SessionRecord, DatabaseError> {
        self.get_session(session_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "session".into(),
                id: session_id.to_string(),
            })
    }

    async fn require_reservation(&self, token: &str) -> Result<Reservation, DatabaseError> {
        self.find_reservation(token)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "reservation".into(),
                id: token.to_string(),
            })
    }

    async fn query_one_reservation(
        &self,
        sql: &str,
        arg: &str,
        op: &str,
    ) -> Result<Option<Reservation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![arg])
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_reservation(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    async fn query_one_session(
        &self,
        sql: &str,
        arg: &str,
        op: &str,
    ) -> Result<Option<SessionRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![arg])
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|e| DatabaseError::Query(format!("{field} parse: {e}")))
}

/// Map a libsql Row to a SessionRecord.
///
/// Column order matches SESSION_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<SessionRecord, DatabaseError> {
    let id_str: String = row.get(0).map_err(|e| DatabaseError::Query(format!("session.id: {e}")))?;
    let founder_id = match row.get::<String>(1).ok() {
        Some(raw) => Some(parse_uuid(&raw, "session.founder_id")?),
        None => None,
    };
    let founder_email: Option<String> = row.get(2).ok();
    let current_step: String = row.get(3).unwrap_or_default();
    let completed_str: String = row.get(4).unwrap_or_else(|_| "[]".to_string());
    let step_data_str: String = row.get(5).unwrap_or_else(|_| "{}".to_string());
    let is_complete: i64 = row.get(6).unwrap_or(0);
    let reservation_token: Option<String> = row.get(7).ok();
    let created_str: String = row.get(8).unwrap_or_default();
    let updated_str: String = row.get(9).unwrap_or_default();

    let completed_steps: BTreeSet<StepKey> = serde_json::from_str(&completed_str)
        .map_err(|e| DatabaseError::Serialization(format!("session.completed_steps: {e}")))?;
    let step_data: BTreeMap<StepKey, StepData> = serde_json::from_str(&step_data_str)
        .map_err(|e| DatabaseError::Serialization(format!("session.step_data: {e}")))?;

    Ok(SessionRecord {
        session: Session {
            session_id: parse_uuid(&id_str, "session.id")?,
            founder_id,
            current_step_key: current_step.parse().unwrap_or_default(),
            completed_steps,
            step_data,
            is_complete: is_complete != 0,
            last_updated: parse_datetime(&updated_str),
            reservation_token,
        },
        founder_email,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_reservation(row: &libsql::Row) -> Result<Reservation, DatabaseError> {
    let token: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("reservation.token: {e}")))?;
    let email: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("reservation.email: {e}")))?;
    let status_str: String = row.get(2).unwrap_or_else(|_| "pending".to_string());
    let founder_id = match row.get::<String>(3).ok() {
        Some(raw) => Some(parse_uuid(&raw, "reservation.founder_id")?),
        None => None,
    };

    Ok(Reservation {
        token,
        email,
        status: status_str.parse().unwrap_or(ReservationStatus::Pending),
        founder_id,
    })
}

// ── Trait implementation ────────────────────────────────────────────

const SESSION_COLUMNS: &str = "id, founder_id, founder_email, current_step, completed_steps, step_data, is_complete, reservation_token, created_at, updated_at";

const RESERVATION_COLUMNS: &str = "token, email, status, founder_id";

#[async_trait]
impl RecordStore for LibSqlBackend {
    // ── Sessions ────────────────────────────────────────────────────

    async fn create_session(&self) -> Result<SessionRecord, DatabaseError> {
        let session = Session::new(Uuid::new_v4());
        let now = session.last_updated;

        self.conn()
            .execute(
                "INSERT INTO sessions (id, current_step, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.session_id.to_string(),
                    session.current_step_key.as_str(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_session: {e}")))?;

        info!(session_id = %session.session_id, "Session record created");
        Ok(SessionRecord {
            session,
            founder_email: None,
            created_at: now,
        })
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>, DatabaseError> {
        self.query_one_session(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            &session_id.to_string(),
            "get_session",
        )
        .await
    }

    async fn find_session_by_identity(
        &self,
        email: &str,
    ) -> Result<Option<SessionRecord>, DatabaseError> {
        self.query_one_session(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE founder_email = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ),
            &crate::wizard::validation::normalize_email(email),
            "find_session_by_identity",
        )
        .await
    }

    async fn persist_step_update(
        &self,
        session_id: Uuid,
        step: StepKey,
        partial: &StepData,
    ) -> Result<SessionRecord, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.require_session(session_id).await?;

        if record.session.is_complete {
            // Completed sessions are inert; report the stored copy unchanged.
            debug!(session_id = %session_id, step = %step, "Ignoring update to completed session");
            return Ok(record);
        }

        let merged = match record.session.step_data.get(&step) {
            Some(existing) => shallow_merge(existing, partial),
            None => partial.clone(),
        };

        if step == StepKey::Founder {
            if let Some(email) = founder_email(&merged) {
                record.founder_email = Some(email);
                if record.session.founder_id.is_none() {
                    let founder_id = Uuid::new_v4();
                    record.session.founder_id = Some(founder_id);
                    info!(session_id = %session_id, founder_id = %founder_id, "Founder bound to session");
                }
            }
        }

        record.session.step_data.insert(step, merged);
        record.session.completed_steps.insert(step);
        record.session.current_step_key = step;
        record.session.last_updated = Utc::now();
        self.write_session(&record).await?;

        debug!(session_id = %session_id, step = %step, "Step update persisted");
        Ok(record)
    }

    async fn mark_complete(&self, session_id: Uuid) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.require_session(session_id).await?;
        if record.session.is_complete {
            return Ok(());
        }
        if !record.session.all_steps_completed() {
            return Err(DatabaseError::Conflict(format!(
                "session {session_id} has unfinished steps"
            )));
        }
        record.session.is_complete = true;
        record.session.last_updated = Utc::now();
        self.write_session(&record).await?;
        info!(session_id = %session_id, "Session marked complete");
        Ok(())
    }

    // ── Reservations ────────────────────────────────────────────────

    async fn find_reservation(&self, token: &str) -> Result<Option<Reservation>, DatabaseError> {
        self.query_one_reservation(
            &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE token = ?1"),
            token,
            "find_reservation",
        )
        .await
    }

    async fn find_reservation_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Reservation>, DatabaseError> {
        self.query_one_reservation(
            &format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE email = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ),
            &crate::wizard::validation::normalize_email(email),
            "find_reservation_by_email",
        )
        .await
    }

    async fn create_reservation(&self, email: &str) -> Result<Reservation, DatabaseError> {
        let reservation = Reservation {
            token: format!("res_{}", Uuid::new_v4().simple()),
            email: crate::wizard::validation::normalize_email(email),
            status: ReservationStatus::Pending,
            founder_id: None,
        };
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO reservations (token, email, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    reservation.token.clone(),
                    reservation.email.clone(),
                    reservation.status.to_string(),
                    now.clone(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_reservation: {e}")))?;

        debug!(token = %reservation.token, "Reservation created");
        Ok(reservation)
    }

    async fn complete_reservation(&self, token: &str) -> Result<Reservation, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let mut reservation = self.require_reservation(token).await?;
        if reservation.status != ReservationStatus::Pending {
            return Ok(reservation);
        }

        self.conn()
            .execute(
                "UPDATE reservations SET status = ?1, updated_at = ?2 WHERE token = ?3",
                params![
                    ReservationStatus::Completed.to_string(),
                    Utc::now().to_rfc3339(),
                    token,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_reservation: {e}")))?;

        reservation.status = ReservationStatus::Completed;
        info!(token = %token, "Reservation payment completed");
        Ok(reservation)
    }

    async fn claim_reservation(
        &self,
        token: &str,
        founder_id: Uuid,
    ) -> Result<Reservation, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let mut reservation = self.require_reservation(token).await?;

        match reservation.founder_id {
            Some(existing) if existing == founder_id => return Ok(reservation),
            Some(existing) => {
                return Err(DatabaseError::Conflict(format!(
                    "reservation {token} already claimed by {existing}"
                )));
            }
            None => {}
        }
        if reservation.status != ReservationStatus::Completed {
            return Err(DatabaseError::Conflict(format!(
                "reservation {token} is {} and cannot be claimed",
                reservation.status
            )));
        }

        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE reservations SET status = ?1, founder_id = ?2, updated_at = ?3 WHERE token = ?4",
                params![
                    ReservationStatus::Claimed.to_string(),
                    founder_id.to_string(),
                    now.clone(),
                    token,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_reservation: {e}")))?;

        self.conn()
            .execute(
                "UPDATE sessions SET reservation_token = ?1, updated_at = ?2 WHERE founder_id = ?3",
                params![token, now, founder_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_reservation link: {e}")))?;

        reservation.status = ReservationStatus::Claimed;
        reservation.founder_id = Some(founder_id);
        info!(token = %token, founder_id = %founder_id, "Reservation claimed");
        Ok(reservation)
    }

    // ── Processing ──────────────────────────────────────────────────

    async fn get_processing_result(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ProcessingResult>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT score, has_error FROM processing_results WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_processing_result: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let score: f64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("processing.score: {e}")))?;
                let has_error: i64 = row.get(1).unwrap_or(0);
                Ok(Some(ProcessingResult {
                    score,
                    has_error: has_error != 0,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_processing_result: {e}"))),
        }
    }

    async fn record_processing_result(
        &self,
        session_id: Uuid,
        result: &ProcessingResult,
    ) -> Result<(), DatabaseError> {
        self.require_session(session_id).await?;
        self.conn()
            .execute(
                "INSERT INTO processing_results (session_id, score, has_error, recorded_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (session_id) DO UPDATE SET score = ?2, has_error = ?3, recorded_at = ?4",
                params![
                    session_id.to_string(),
                    result.score,
                    result.has_error as i64,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_processing_result: {e}")))?;

        debug!(session_id = %session_id, score = result.score, has_error = result.has_error, "Processing result recorded");
        Ok(())
    }
}
