//! REST endpoints exposing a `RecordStore` to wizard clients and to the
//! payment and scoring collaborators.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::RecordStore;
use crate::wizard::catalog::StepKey;
use crate::wizard::model::{ProcessingResult, StepData};

/// Shared state for record routes.
#[derive(Clone)]
pub struct RecordRouteState {
    pub store: Arc<dyn RecordStore>,
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub founder_id: Uuid,
}

/// Build the record REST routes.
pub fn record_routes(store: Arc<dyn RecordStore>) -> Router {
    let state = RecordRouteState { store };

    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session).get(find_session_by_email))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/steps/{step}", post(persist_step))
        .route("/api/sessions/{id}/complete", post(mark_complete))
        .route(
            "/api/sessions/{id}/processing",
            get(get_processing).put(put_processing),
        )
        .route(
            "/api/reservations",
            post(create_reservation).get(find_reservation_by_email),
        )
        .route("/api/reservations/{token}", get(get_reservation))
        .route("/api/reservations/{token}/complete", post(complete_reservation))
        .route("/api/reservations/{token}/claim", post(claim_reservation))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

fn not_found(what: &str) -> Response {
    error_body(StatusCode::NOT_FOUND, format!("{what} not found"))
}

fn store_error(op: &str, err: DatabaseError) -> Response {
    match err {
        DatabaseError::NotFound { entity, .. } => not_found(&entity),
        DatabaseError::Conflict(msg) => error_body(StatusCode::CONFLICT, msg),
        other => {
            warn!(operation = op, error = %other, "Record store failure");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn ok_or_404<T: serde::Serialize>(
    op: &str,
    what: &str,
    result: Result<Option<T>, DatabaseError>,
) -> Response {
    match result {
        Ok(Some(value)) => Json(value).into_response(),
        Ok(None) => not_found(what),
        Err(e) => store_error(op, e),
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "founder-intake-records"
    }))
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn create_session(State(state): State<RecordRouteState>) -> Response {
    match state.store.create_session().await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => store_error("create_session", e),
    }
}

async fn get_session(State(state): State<RecordRouteState>, Path(id): Path<Uuid>) -> Response {
    ok_or_404("get_session", "session", state.store.get_session(id).await)
}

async fn find_session_by_email(
    State(state): State<RecordRouteState>,
    Query(q): Query<EmailQuery>,
) -> Response {
    ok_or_404(
        "find_session_by_identity",
        "session",
        state.store.find_session_by_identity(&q.email).await,
    )
}

async fn persist_step(
    State(state): State<RecordRouteState>,
    Path((id, step)): Path<(Uuid, String)>,
    Json(partial): Json<StepData>,
) -> Response {
    let step: StepKey = match step.parse() {
        Ok(s) => s,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match state.store.persist_step_update(id, step, &partial).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => store_error("persist_step_update", e),
    }
}

async fn mark_complete(State(state): State<RecordRouteState>, Path(id): Path<Uuid>) -> Response {
    match state.store.mark_complete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error("mark_complete", e),
    }
}

async fn get_processing(State(state): State<RecordRouteState>, Path(id): Path<Uuid>) -> Response {
    ok_or_404(
        "get_processing_result",
        "processing result",
        state.store.get_processing_result(id).await,
    )
}

async fn put_processing(
    State(state): State<RecordRouteState>,
    Path(id): Path<Uuid>,
    Json(result): Json<ProcessingResult>,
) -> Response {
    match state.store.record_processing_result(id, &result).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error("record_processing_result", e),
    }
}

// ── Reservations ────────────────────────────────────────────────────────

async fn create_reservation(
    State(state): State<RecordRouteState>,
    Json(req): Json<CreateReservationRequest>,
) -> Response {
    if !crate::wizard::validation::is_valid_email(&req.email) {
        return error_body(StatusCode::BAD_REQUEST, "invalid email address");
    }
    match state.store.create_reservation(&req.email).await {
        Ok(r) => (StatusCode::CREATED, Json(r)).into_response(),
        Err(e) => store_error("create_reservation", e),
    }
}

async fn get_reservation(
    State(state): State<RecordRouteState>,
    Path(token): Path<String>,
) -> Response {
    ok_or_404(
        "find_reservation",
        "reservation",
        state.store.find_reservation(&token).await,
    )
}

async fn find_reservation_by_email(
    State(state): State<RecordRouteState>,
    Query(q): Query<EmailQuery>,
) -> Response {
    ok_or_404(
        "find_reservation_by_email",
        "reservation",
        state.store.find_reservation_by_email(&q.email).await,
    )
}

async fn complete_reservation(
    State(state): State<RecordRouteState>,
    Path(token): Path<String>,
) -> Response {
    match state.store.complete_reservation(&token).await {
        Ok(r) => Json(r).into_response(),
        Err(e) => store_error("complete_reservation", e),
    }
}

async fn claim_reservation(
    State(state): State<RecordRouteState>,
    Path(token): Path<String>,
    Json(req): Json<ClaimRequest>,
) -> Response {
    match state.store.claim_reservation(&token, req.founder_id).await {
        Ok(r) => Json(r).into_response(),
        Err(e) => store_error("claim_reservation", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::store::LibSqlBackend;

    async fn read_json(body: Body) -> serde_json::Value {
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        }
    }

    async fn app() -> Router {
        let store: Arc<dyn RecordStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        record_routes(store)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let resp = app().await.oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_json(resp.into_body()).await["status"], "ok");
    }

    #[tokio::test]
    async fn create_then_get_session() {
        let app = app().await;
        let resp = app
            .clone()
            .oneshot(empty_request("POST", "/api/sessions"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = read_json(resp.into_body()).await;
        let id = created["session"]["session_id"].as_str().unwrap().to_string();

        let resp = app
            .oneshot(empty_request("GET", &format!("/api/sessions/{id}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_json(resp.into_body()).await["session"]["session_id"], id.as_str());
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let resp = app()
            .await
            .oneshot(empty_request("GET", &format!("/api/sessions/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_step_is_400() {
        let app = app().await;
        let resp = app
            .clone()
            .oneshot(empty_request("POST", "/api/sessions"))
            .await
            .unwrap();
        let id = read_json(resp.into_body()).await["session"]["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        let resp = app
            .oneshot(json_request(
                "POST",
                &format!("/api/sessions/{id}/steps/billing"),
                serde_json::json!({"card": "4242"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn claim_before_payment_is_conflict() {
        let app = app().await;
        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/reservations",
                serde_json::json!({"email": "ada@example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let token = read_json(resp.into_body()).await["token"]
            .as_str()
            .unwrap()
            .to_string();

        let resp = app
            .oneshot(json_request(
                "POST",
                &format!("/api/reservations/{token}/claim"),
                serde_json::json!({"founder_id": Uuid::new_v4()}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_reservation_email_is_400() {
        let resp = app()
            .await
            .oneshot(json_request(
                "POST",
                "/api/reservations",
                serde_json::json!({"email": "nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
