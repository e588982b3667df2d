//! Sync gateway integration tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`:
//! - change log append and read-back
//! - batch validation (all or nothing)
//! - CORS origin echo with credentials
//! - password gate lockout

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use listsync::config::AuthConfig;
use listsync::server::{AuthGate, ChangeLogStore};
use listsync::{create_router, AppState};
use rusqlite::Connection;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_app() -> (Router, Arc<ChangeLogStore>) {
    let store = Arc::new(ChangeLogStore::open_in_memory().unwrap());
    let auth_config = AuthConfig {
        password: Some("correct horse".to_string()),
        ..AuthConfig::default()
    };
    let auth = Arc::new(AuthGate::open_in_memory(&auth_config).unwrap());
    let app = create_router(Arc::new(AppState {
        store: Arc::clone(&store),
        auth,
    }));
    (app, store)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

// =============================================================================
// Change Log
// =============================================================================

#[tokio::test]
async fn test_post_then_get_changes() {
    let (app, _) = test_app();

    let (status, body) = send(
        &app,
        post_json(
            "/changes",
            json!({ "changes": [
                { "id": "a", "change": "create", "name": "Milk", "completed": false, "deleted_at": null },
                { "id": "a", "change": "update", "name": "Milk", "completed": true, "deleted_at": null }
            ]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sequence_number"], 2);

    let (status, body) = send(&app, get("/changes?after_sequence=0")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_sequence"], 2);
    let changes = body["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0]["sequence_number"], 1);
    assert_eq!(changes[0]["change"], "create");
    assert_eq!(changes[1]["sequence_number"], 2);
    assert_eq!(changes[1]["completed"], true);
}

#[tokio::test]
async fn test_get_changes_after_head_echoes_cursor() {
    let (app, _) = test_app();
    let (status, body) = send(&app, get("/changes?after_sequence=42")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changes"].as_array().unwrap().len(), 0);
    assert_eq!(body["max_sequence"], 42);
}

#[tokio::test]
async fn test_get_changes_bad_cursor_reads_from_start() {
    let (app, _) = test_app();
    send(
        &app,
        post_json("/changes", json!({ "changes": [{ "id": "x", "change": "create", "name": "Eggs" }] })),
    )
    .await;

    for uri in ["/changes", "/changes?after_sequence=banana"] {
        let (status, body) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changes"].as_array().unwrap().len(), 1, "uri {}", uri);
    }
}

#[tokio::test]
async fn test_out_of_range_cursor_reads_from_start() {
    let (app, _) = test_app();
    send(
        &app,
        post_json("/changes", json!({ "changes": [{ "id": "x", "change": "create", "name": "Eggs" }] })),
    )
    .await;

    let (status, body) = send(&app, get("/changes?after_sequence=18446744073709551615")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changes"].as_array().unwrap().len(), 1);
    assert_eq!(body["max_sequence"], 1);

    let (status, body) = send(&app, get("/changes?after_sequence=-3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changes"].as_array().unwrap().len(), 1);

    // Largest valid cursor: nothing after it, cursor echoed
    let (status, body) = send(&app, get("/changes?after_sequence=9223372036854775807")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["changes"].as_array().unwrap().is_empty());
    assert_eq!(body["max_sequence"], i64::MAX);
}

#[tokio::test]
async fn test_malformed_batch_rejected_and_not_applied() {
    let (app, store) = test_app();

    let (status, body) = send(
        &app,
        post_json(
            "/changes",
            json!({ "changes": [
                { "id": "ok", "change": "create", "name": "Bread" },
                { "id": "bad", "change": "upsert", "name": "Butter" }
            ]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());
    assert_eq!(store.head().unwrap(), 0);
}

#[tokio::test]
async fn test_body_without_changes_array_is_bad_request() {
    let (app, _) = test_app();

    let (status, _) = send(&app, post_json("/changes", json!({ "items": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .method("POST")
        .uri("/changes")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_storage_failure_is_server_error() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("changes.db");
    let store = Arc::new(ChangeLogStore::open(&db_path).unwrap());
    let auth = Arc::new(AuthGate::open_in_memory(&AuthConfig::default()).unwrap());
    let app = create_router(Arc::new(AppState { store, auth }));

    // Break the log from a second connection
    Connection::open(&db_path)
        .unwrap()
        .execute_batch("DROP TABLE changes;")
        .unwrap();

    let (status, body) = send(&app, get("/changes?after_sequence=0")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().is_some());

    let (status, body) = send(
        &app,
        post_json("/changes", json!({ "changes": [{ "id": "a", "change": "create", "name": "Milk" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().is_some());
}

// =============================================================================
// CORS
// =============================================================================

#[tokio::test]
async fn test_cors_echoes_origin_with_credentials() {
    let (app, _) = test_app();

    let req = Request::builder()
        .uri("/changes")
        .header(header::ORIGIN, "https://lists.example.org")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();

    let headers = resp.headers();
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://lists.example.org"
    );
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
}

#[tokio::test]
async fn test_cors_preflight() {
    let (app, _) = test_app();

    let req = Request::builder()
        .method("OPTIONS")
        .uri("/changes")
        .header(header::ORIGIN, "http://localhost:5173")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();

    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:5173"
    );
}

// =============================================================================
// Password Gate
// =============================================================================

fn verify(ip: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/verify")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", format!("{}, 10.0.0.1", ip))
        .body(Body::from(json!({ "password": password }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_verify_correct_password() {
    let (app, _) = test_app();
    let (status, body) = send(&app, verify("203.0.113.7", "correct horse")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "valid": true }));
}

#[tokio::test]
async fn test_verify_lockout_after_five_failures() {
    let (app, _) = test_app();
    let ip = "203.0.113.9";

    for expected_left in (0..5).rev() {
        let (status, body) = send(&app, verify(ip, "wrong")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], false);
        assert_eq!(body["attemptsLeft"], expected_left);
        assert_eq!(body["locked"], expected_left == 0);
    }

    // Locked now, even with the right password
    let (status, body) = send(&app, verify(ip, "correct horse")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["resetTime"].as_i64().unwrap() > 0);

    // Other IPs are unaffected
    let (status, body) = send(&app, verify("198.51.100.1", "correct horse")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn test_verify_success_clears_failures() {
    let (app, _) = test_app();
    let ip = "203.0.113.20";

    for _ in 0..4 {
        send(&app, verify(ip, "wrong")).await;
    }
    let (_, body) = send(&app, verify(ip, "correct horse")).await;
    assert_eq!(body["valid"], true);

    let (status, body) = send(&app, verify(ip, "wrong")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attemptsLeft"], 4);
}
