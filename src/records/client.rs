//! HTTP client for the record server — the wizard side of the record API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::RecordStore;
use crate::wizard::catalog::StepKey;
use crate::wizard::model::{ProcessingResult, Reservation, SessionRecord, StepData};

/// `RecordStore` backed by a remote record server.
pub struct HttpRecordClient {
    http: Client,
    base: Url,
}

impl HttpRecordClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DatabaseError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DatabaseError::Transport(format!("Failed to build HTTP client: {e}")))?;
        let base_url = base_url.into();
        let base = Url::parse(&base_url)
            .map_err(|e| DatabaseError::Transport(format!("Invalid record server URL '{base_url}': {e}")))?;
        Ok(Self { http, base })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.as_str().trim_end_matches('/'), path)
    }

    /// URL of a reservation resource. The token is percent-encoded as a
    /// single path segment, so `/` or `?` in it cannot reach another route.
    fn reservation_url(&self, token: &str, action: Option<&str>) -> Result<Url, DatabaseError> {
        // Dot segments would be dropped by the URL normalizer.
        if matches!(token, "" | "." | "..") {
            return Err(DatabaseError::NotFound {
                entity: "reservation".to_string(),
                id: token.to_string(),
            });
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| DatabaseError::Transport(format!("Record server URL '{}' cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(["api", "reservations", token])
            .extend(action);
        Ok(url)
    }
}

fn transport(op: &str, e: reqwest::Error) -> DatabaseError {
    DatabaseError::Transport(format!("{op}: {e}"))
}

/// Map a non-success status to a storage error.
async fn status_error(op: &str, resp: Response) -> DatabaseError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or(body);

    match status {
        StatusCode::NOT_FOUND => DatabaseError::NotFound {
            entity: op.to_string(),
            id: message,
        },
        StatusCode::CONFLICT => DatabaseError::Conflict(message),
        _ => DatabaseError::Transport(format!("{op}: HTTP {status}: {message}")),
    }
}

async fn decode<T: DeserializeOwned>(op: &str, resp: Response) -> Result<T, DatabaseError> {
    if !resp.status().is_success() {
        return Err(status_error(op, resp).await);
    }
    resp.json::<T>()
        .await
        .map_err(|e| DatabaseError::Serialization(format!("{op}: {e}")))
}

/// Like `decode`, but 404 means "nothing there".
async fn decode_optional<T: DeserializeOwned>(
    op: &str,
    resp: Response,
) -> Result<Option<T>, DatabaseError> {
    if resp.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    decode(op, resp).await.map(Some)
}

async fn expect_empty(op: &str, resp: Response) -> Result<(), DatabaseError> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(status_error(op, resp).await)
    }
}

#[async_trait]
impl RecordStore for HttpRecordClient {
    async fn create_session(&self) -> Result<SessionRecord, DatabaseError> {
        let resp = self
            .http
            .post(self.url("/api/sessions"))
            .send()
            .await
            .map_err(|e| transport("create_session", e))?;
        decode("create_session", resp).await
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>, DatabaseError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/sessions/{session_id}")))
            .send()
            .await
            .map_err(|e| transport("get_session", e))?;
        decode_optional("get_session", resp).await
    }

    async fn find_session_by_identity(
        &self,
        email: &str,
    ) -> Result<Option<SessionRecord>, DatabaseError> {
        let resp = self
            .http
            .get(self.url("/api/sessions"))
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|e| transport("find_session_by_identity", e))?;
        decode_optional("find_session_by_identity", resp).await
    }

    async fn persist_step_update(
        &self,
        session_id: Uuid,
        step: StepKey,
        partial: &StepData,
    ) -> Result<SessionRecord, DatabaseError> {
        debug!(session_id = %session_id, step = %step, "Persisting step update to record server");
        let resp = self
            .http
            .post(self.url(&format!("/api/sessions/{session_id}/steps/{step}")))
            .json(partial)
            .send()
            .await
            .map_err(|e| transport("persist_step_update", e))?;
        decode("persist_step_update", resp).await
    }

    async fn mark_complete(&self, session_id: Uuid) -> Result<(), DatabaseError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/sessions/{session_id}/complete")))
            .send()
            .await
            .map_err(|e| transport("mark_complete", e))?;
        expect_empty("mark_complete", resp).await
    }

    async fn find_reservation(&self, token: &str) -> Result<Option<Reservation>, DatabaseError> {
        let url = match self.reservation_url(token, None) {
            Ok(url) => url,
            Err(DatabaseError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport("find_reservation", e))?;
        decode_optional("find_reservation", resp).await
    }

    async fn find_reservation_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Reservation>, DatabaseError> {
        let resp = self
            .http
            .get(self.url("/api/reservations"))
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|e| transport("find_reservation_by_email", e))?;
        decode_optional("find_reservation_by_email", resp).await
    }

    async fn create_reservation(&self, email: &str) -> Result<Reservation, DatabaseError> {
        let resp = self
            .http
            .post(self.url("/api/reservations"))
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await
            .map_err(|e| transport("create_reservation", e))?;
        decode("create_reservation", resp).await
    }

    async fn complete_reservation(&self, token: &str) -> Result<Reservation, DatabaseError> {
        let resp = self
            .http
            .post(self.reservation_url(token, Some("complete"))?)
            .send()
            .await
            .map_err(|e| transport("complete_reservation", e))?;
        decode("complete_reservation", resp).await
    }

    async fn claim_reservation(
        &self,
        token: &str,
        founder_id: Uuid,
    ) -> Result<Reservation, DatabaseError> {
        let resp = self
            .http
            .post(self.reservation_url(token, Some("claim"))?)
            .json(&serde_json::json!({ "founder_id": founder_id }))
            .send()
            .await
            .map_err(|e| transport("claim_reservation", e))?;
        decode("claim_reservation", resp).await
    }

    async fn get_processing_result(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ProcessingResult>, DatabaseError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/sessions/{session_id}/processing")))
            .send()
            .await
            .map_err(|e| transport("get_processing_result", e))?;
        decode_optional("get_processing_result", resp).await
    }

    async fn record_processing_result(
        &self,
        session_id: Uuid,
        result: &ProcessingResult,
    ) -> Result<(), DatabaseError> {
        let resp = self
            .http
            .put(self.url(&format!("/api/sessions/{session_id}/processing")))
            .json(result)
            .send()
            .await
            .map_err(|e| transport("record_processing_result", e))?;
        expect_empty("record_processing_result", resp).await
    }
}
