//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Sync groups held in memory
    pub groups: usize,
    /// Open WebSocket subscriptions
    pub connections: usize,
    /// Groups with at least one subscription
    pub subscribed_groups: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        groups: state.groups.len(),
        connections: state.conn_manager.connection_count(),
        subscribed_groups: state.conn_manager.group_count(),
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Converge Sync Server"
}
