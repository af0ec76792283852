//! Integration tests for the intake wizard against a live record server.
//!
//! Each test spins up the Axum record API on a random port backed by an
//! in-memory libSQL database, then drives `WizardManager` through the real
//! HTTP client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use founder_intake::records::{HttpRecordClient, record_routes};
use founder_intake::store::{CachedSession, LibSqlBackend, MemoryCache, RecordStore, SessionStore};
use founder_intake::wizard::{
    BootstrapContext, BootstrapMode, EmailLookup, ProcessingResult, StepData, StepKey,
    WizardManager,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Start the record server on a random port, return its base URL.
async fn start_server() -> String {
    let store: Arc<dyn RecordStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let app = record_routes(store);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}")
}

fn client(base_url: &str) -> Arc<HttpRecordClient> {
    Arc::new(HttpRecordClient::new(base_url, Duration::from_secs(5)).unwrap())
}

/// A wizard host with its own local cache (one browser, one device).
fn device(base_url: &str) -> (WizardManager, Arc<SessionStore>) {
    let sessions = Arc::new(SessionStore::new(Arc::new(MemoryCache::new())));
    (WizardManager::new(client(base_url), sessions.clone()), sessions)
}

fn data(v: Value) -> StepData {
    v.as_object().cloned().unwrap()
}

async fn fill_to_processing(m: &WizardManager) {
    m.submit_step("founder", data(json!({"full_name": "Ada Lovelace", "email": "ada@example.com"})))
        .await
        .unwrap();
    m.submit_step("venture", data(json!({"name": "Analytical Engines"}))).await.unwrap();
    m.submit_step("team", data(json!({"members": 1}))).await.unwrap();
    m.submit_step("upload", data(json!({"deck": "engine.pdf"}))).await.unwrap();
    m.submit_step("processing", StepData::new()).await.unwrap();
}

#[tokio::test]
async fn full_flow_reaches_completion() {
    timeout(TEST_TIMEOUT, async {
        let url = start_server().await;
        let (m, sessions) = device(&url);
        let records = client(&url);

        let boot = m.bootstrap(&BootstrapContext::default()).await.unwrap();
        assert_eq!(boot.mode, BootstrapMode::Fresh);
        let id = boot.session.session_id;

        fill_to_processing(&m).await;
        assert_eq!(m.current().await.unwrap().step_index, 4);

        records
            .record_processing_result(id, &ProcessingResult { score: 81.5, has_error: false })
            .await
            .unwrap();
        let out = m.submit_step("processing", StepData::new()).await.unwrap();
        assert_eq!(out.step_index, 5);

        let out = m.submit_step("analysis", StepData::new()).await.unwrap();
        assert!(WizardManager::is_terminal(&out.session));
        assert_eq!(sessions.load().await.unwrap(), CachedSession::Empty);

        let server = records.get_session(id).await.unwrap().unwrap();
        assert!(server.session.is_complete);
        assert_eq!(server.founder_email.as_deref(), Some("ada@example.com"));
        assert_eq!(server.session.step_data[&StepKey::Venture]["name"], "Analytical Engines");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failed_processing_holds_the_user() {
    timeout(TEST_TIMEOUT, async {
        let url = start_server().await;
        let (m, _) = device(&url);
        let records = client(&url);

        let id = m.bootstrap(&BootstrapContext::default()).await.unwrap().session.session_id;
        fill_to_processing(&m).await;
        records
            .record_processing_result(id, &ProcessingResult { score: 0.0, has_error: true })
            .await
            .unwrap();

        // Resume from another device: still gated.
        let (other, _) = device(&url);
        let out = other.bootstrap(&BootstrapContext::with_token(id.to_string())).await.unwrap();
        assert_eq!(out.step_index, 4);
        assert_eq!(out.session.current_step_key, StepKey::Processing);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn resume_token_moves_progress_across_devices() {
    timeout(TEST_TIMEOUT, async {
        let url = start_server().await;
        let (laptop, _) = device(&url);
        let id = laptop.bootstrap(&BootstrapContext::default()).await.unwrap().session.session_id;
        laptop
            .submit_step("founder", data(json!({"full_name": "Ada", "email": "ada@example.com"})))
            .await
            .unwrap();
        laptop.submit_step("venture", data(json!({"name": "Acme"}))).await.unwrap();

        let (phone, phone_cache) = device(&url);
        let out = phone.bootstrap(&BootstrapContext::with_token(id.to_string())).await.unwrap();
        assert_eq!(out.mode, BootstrapMode::Resumed);
        assert_eq!(out.step_index, 2);
        assert!(out.notices.is_empty());
        match phone_cache.load().await.unwrap() {
            CachedSession::Valid(s) => assert_eq!(s.session_id, id),
            other => panic!("expected cached session, got {other:?}"),
        }

        // The phone continues where the laptop stopped.
        let out = phone.submit_step("venture", data(json!({"industry": "compute"}))).await.unwrap();
        assert_eq!(out.session.step_data[&StepKey::Venture]["name"], "Acme");
        assert_eq!(out.session.step_data[&StepKey::Venture]["industry"], "compute");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_token_starts_over_as_expired() {
    timeout(TEST_TIMEOUT, async {
        let url = start_server().await;
        let (m, _) = device(&url);
        let out = m
            .bootstrap(&BootstrapContext::with_token(uuid::Uuid::new_v4().to_string()))
            .await
            .unwrap();
        assert_eq!(out.mode, BootstrapMode::Expired);
        assert_eq!(out.step_index, 0);
        assert!(out.session.completed_steps.is_empty());
        assert!(out.notices.iter().any(|n| n.is_expiry()));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn email_resume_finds_open_session() {
    timeout(TEST_TIMEOUT, async {
        let url = start_server().await;
        let (first, _) = device(&url);
        let id = first.bootstrap(&BootstrapContext::default()).await.unwrap().session.session_id;
        first
            .submit_step("founder", data(json!({"full_name": "Ada", "email": "Ada@Example.com"})))
            .await
            .unwrap();

        let (second, _) = device(&url);
        match second.resume_by_email("ada@example.com").await.unwrap() {
            EmailLookup::Resumable(out) => {
                assert_eq!(out.session.session_id, id);
                assert_eq!(out.step_index, 1);
            }
            other => panic!("expected resumable session, got {other:?}"),
        }

        let (third, _) = device(&url);
        assert!(third.resume_by_email("nobody@example.com").await.is_err());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn paid_reservation_is_claimed_by_founder_step() {
    timeout(TEST_TIMEOUT, async {
        let url = start_server().await;
        let records = client(&url);
        let reservation = records.create_reservation("grace@example.com").await.unwrap();
        records.complete_reservation(&reservation.token).await.unwrap();

        let (m, _) = device(&url);
        let claim = match m.resume_by_email("grace@example.com").await.unwrap() {
            EmailLookup::Claim(claim) => claim,
            other => panic!("expected reservation claim, got {other:?}"),
        };
        assert_eq!(claim.token, reservation.token);

        let boot = m.bootstrap(&BootstrapContext::with_token(claim.token.clone())).await.unwrap();
        assert_eq!(boot.mode, BootstrapMode::ClaimReservation);
        assert_eq!(boot.session.step_data[&StepKey::Founder]["email"], "grace@example.com");

        let out = m
            .submit_step("founder", data(json!({"full_name": "Grace Hopper"})))
            .await
            .unwrap();
        let founder_id = out.session.founder_id.expect("founder id issued");

        let bound = records.find_reservation(&reservation.token).await.unwrap().unwrap();
        assert_eq!(bound.founder_id, Some(founder_id));

        // A claimed reservation no longer opens a claim flow.
        let (other, _) = device(&url);
        let again = other
            .bootstrap(&BootstrapContext::with_token(reservation.token.clone()))
            .await
            .unwrap();
        assert_eq!(again.mode, BootstrapMode::Expired);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn token_with_path_characters_reports_expiry() {
    timeout(TEST_TIMEOUT, async {
        let url = start_server().await;
        let (m, _) = device(&url);
        let records = client(&url);

        let first = m.bootstrap(&BootstrapContext::default()).await.unwrap();
        m.submit_step("founder", data(json!({"full_name": "Ada Lovelace", "email": "ada@example.com"})))
            .await
            .unwrap();

        for token in ["bogus/complete", "res_1?email=ada@example.com", ".."] {
            assert!(records.find_reservation(token).await.unwrap().is_none(), "{token}");
        }

        let out = m
            .bootstrap(&BootstrapContext::with_token("bogus/complete"))
            .await
            .unwrap();
        assert_eq!(out.mode, BootstrapMode::Expired);
        assert_ne!(out.session.session_id, first.session.session_id);
        assert!(out.notices.iter().any(|n| n.is_expiry()));
        assert!(out.session.completed_steps.is_empty());
    })
    .await
    .expect("test timed out");
}
