//! WebSocket handler for sync notifications.
//!
//! A connection subscribes to one group. The server pushes `sync_needed`
//! whenever another client delivers new messages to that group, and answers
//! `status` and `ping` requests.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::groups::GroupReplica;
use crate::websocket::{format_hash, ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection under its group
/// 2. Spawns a task to forward outgoing messages
/// 3. Sends the group's current status
/// 4. Processes incoming messages until the client leaves
pub async fn handle_websocket_connection(
    socket: WebSocket,
    group: String,
    node_id: Option<String>,
    replica: GroupReplica,
    conn_manager: Arc<ConnectionManager>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(&group, node_id.clone(), tx);

    tracing::info!(
        conn_id = %conn_id,
        group = %group,
        node_id = ?node_id,
        "WebSocket client connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    conn_manager.send_to(&conn_id, status(&group, &replica, None));

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &group, &replica);
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        group = %group,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return a server response.
pub fn process_message(text: &str, group: &str, replica: &GroupReplica) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Status { request_id } => status(group, replica, request_id),
        ClientMessage::Ping => ServerMessage::Pong,
    }
}

fn status(group: &str, replica: &GroupReplica, request_id: Option<String>) -> ServerMessage {
    let replica = replica.lock();
    ServerMessage::Status {
        group: group.to_string(),
        root_hash: format_hash(replica.log().trie().hash()),
        message_count: replica.log().len(),
        request_id,
    }
}
