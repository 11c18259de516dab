//! Sync endpoint routes.
//!
//! A client syncs against a group by walking its trie (`node`), listing the
//! timestamps of each divergent bucket (`timestamps`), then exchanging the
//! bucket's messages (`messages`). `ws` subscribes to change notifications.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use converge_engine::clock::system_now;
use converge_engine::{Clock, Message, NodeSummary};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::db;
use crate::error::Result;
use crate::handlers::{
    handle_exchange, handle_node, handle_timestamps, handle_websocket_connection,
    MessagesRequest, MessagesResponse, NodeRequest, TimestampsRequest, TimestampsResponse,
};
use crate::websocket::ServerMessage;
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/{group}/node", post(node_handler))
        .route("/sync/{group}/timestamps", post(timestamps_handler))
        .route("/sync/{group}/messages", post(messages_handler))
        .route("/sync/{group}/ws", get(ws_handler))
}

/// POST /sync/{group}/node - Summarize one trie node.
async fn node_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(group): Path<String>,
    Json(request): Json<NodeRequest>,
) -> Result<Json<NodeSummary>> {
    let replica = state.groups.load_or_create(&state.pool, &group).await?;
    let summary = handle_node(&replica.lock(), &request);
    Ok(Json(summary))
}

/// POST /sync/{group}/timestamps - List a bucket's timestamps.
async fn timestamps_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(group): Path<String>,
    Json(request): Json<TimestampsRequest>,
) -> Result<Json<TimestampsResponse>> {
    let replica = state.groups.load_or_create(&state.pool, &group).await?;
    let response = handle_timestamps(&replica.lock(), &request);
    Ok(Json(response))
}

/// POST /sync/{group}/messages - Exchange one bucket's messages.
async fn messages_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group): Path<String>,
    Json(request): Json<MessagesRequest>,
) -> Result<Json<MessagesResponse>> {
    let replica = state.groups.load_or_create(&state.pool, &group).await?;
    let exclude = request.node_id.clone();

    let (outcome, clock) = {
        let mut replica = replica.lock();
        let outcome = handle_exchange(
            &mut replica,
            request,
            state.config.max_batch_size,
            system_now(),
        )?;
        (outcome, replica.clock().clone())
    };

    if !outcome.fresh.is_empty() {
        if let Err(e) = persist(&state, &group, &outcome.fresh, &clock).await {
            // the in-memory group is ahead of the database; reload it next time
            state.groups.evict(&group);
            return Err(e);
        }

        let notified = state.conn_manager.broadcast_group(
            &group,
            exclude.as_deref(),
            ServerMessage::sync_needed(&group, outcome.root_hash),
        );
        tracing::debug!(
            group = %group,
            fresh = outcome.fresh.len(),
            notified,
            anonymous = auth.anonymous,
            "accepted messages"
        );
    }

    Ok(Json(MessagesResponse {
        messages: outcome.reply,
    }))
}

async fn persist(state: &AppState, group: &str, fresh: &[Message], clock: &Clock) -> Result<()> {
    db::insert_messages(&state.pool, group, fresh).await?;
    db::save_clock(&state.pool, group, clock).await?;
    Ok(())
}

/// Query parameters of a WebSocket subscription.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    #[serde(default)]
    node_id: Option<String>,
}

/// GET /sync/{group}/ws - Subscribe to change notifications.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(group): Path<String>,
    Query(query): Query<WsQuery>,
) -> Result<Response> {
    let replica = state.groups.load_or_create(&state.pool, &group).await?;
    let conn_manager = state.conn_manager.clone();

    Ok(ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, group, query.node_id, replica, conn_manager)
    }))
}
