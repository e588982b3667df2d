//! Gateway HTTP handlers

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::SharedState;
use crate::error::SyncError;
use crate::model::{ChangesPage, PushResponse};

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

/// GET /changes?after_sequence=N
///
/// A missing, negative or unparseable cursor reads from the start of the
/// log, as does one beyond the signed 64-bit range sequence numbers live in.
pub async fn get_changes(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ChangesPage>, SyncError> {
    let after_sequence = params
        .get("after_sequence")
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|seq| u64::try_from(seq).ok())
        .unwrap_or(0);

    let page = state.store.changes_since(after_sequence)?;
    debug!(
        after_sequence,
        count = page.changes.len(),
        max_sequence = page.max_sequence,
        "Serving changes"
    );
    Ok(Json(page))
}

/// POST /changes
///
/// The body is shape-checked by hand so malformed records produce a 400
/// rather than an extractor rejection.
pub async fn post_changes(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<PushResponse>, SyncError> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| SyncError::Validation(format!("invalid JSON body: {}", e)))?;
    let changes = value
        .get("changes")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::Validation("body must contain a \"changes\" array".to_string()))?;

    let sequence_number = state.store.append_raw(changes)?;
    info!(count = changes.len(), sequence_number, "Accepted change batch");
    Ok(Json(PushResponse { sequence_number }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub password: String,
}

/// POST /auth/verify
pub async fn verify_password(
    State(state): State<SharedState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<VerifyRequest>,
) -> Response {
    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    match state.auth.verify(&ip, &req.password, Utc::now()).into_response_body() {
        Ok(body) => Json(body).into_response(),
        Err(locked) => (StatusCode::TOO_MANY_REQUESTS, Json(locked)).into_response(),
    }
}

/// Caller address, preferring proxy headers over the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, "Request rejected");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
