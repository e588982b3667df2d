//! Sync gateway - HTTP surface over the change log
//!
//! Provides:
//! - `GET  /changes?after_sequence=N` - changes after a cursor
//! - `POST /changes` - append a batch of changes
//! - `POST /auth/verify` - password gate with per-IP lockout
//! - `GET  /health` - health check
//!
//! Every response echoes the request `Origin` and allows credentials.

pub mod auth;
pub mod routes;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::info;

pub use auth::{AuthGate, Verdict};
pub use store::{validate_batch, ChangeLogStore};

use crate::config::Config;

/// Gateway state shared across handlers
pub struct AppState {
    pub store: Arc<ChangeLogStore>,
    pub auth: Arc<AuthGate>,
}

pub type SharedState = Arc<AppState>;

/// Create the gateway router
pub fn create_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request());

    Router::new()
        .route("/health", get(routes::health))
        .route("/changes", get(routes::get_changes).post(routes::post_changes))
        .route("/auth/verify", post(routes::verify_password))
        .layer(cors)
        .with_state(state)
}

/// Open the stores named by `config` and serve until the listener fails.
pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(ChangeLogStore::open(&config.server.database_path)?);
    let auth = Arc::new(AuthGate::open(&config.server.database_path, &config.auth)?);
    let app = create_router(Arc::new(AppState { store, auth }));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
    info!("Sync gateway listening on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /changes?after_sequence=N - Changes after a cursor");
    info!("  POST /changes                  - Append a change batch");
    info!("  POST /auth/verify              - Verify the shared password");
    info!("  GET  /health                   - Health check");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
