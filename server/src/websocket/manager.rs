//! WebSocket connection manager.
//!
//! Tracks subscribers per sync group so the hub can tell them when another
//! client has delivered messages.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Sync group the connection subscribes to
    pub group: String,
    /// Client's node ID, if it announced one
    pub node_id: Option<String>,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
    /// Connection IDs per group.
    by_group: DashMap<String, Vec<String>>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection. Returns the connection ID.
    pub fn register(&self, group: &str, node_id: Option<String>, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                group: group.to_string(),
                node_id,
                sender,
            },
        );
        self.by_group
            .entry(group.to_string())
            .or_default()
            .push(conn_id.clone());

        tracing::info!(conn_id = %conn_id, group = %group, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            if let Some(mut conn_ids) = self.by_group.get_mut(&conn.group) {
                conn_ids.retain(|id| id != conn_id);
                if conn_ids.is_empty() {
                    drop(conn_ids);
                    self.by_group.remove(&conn.group);
                }
            }

            tracing::info!(
                conn_id = %conn_id,
                group = %conn.group,
                "WebSocket connection unregistered"
            );
        }
    }

    /// Send a message to every subscriber of a group, skipping connections
    /// announced by `exclude_node`.
    ///
    /// Returns the number of connections that received the message.
    pub fn broadcast_group(
        &self,
        group: &str,
        exclude_node: Option<&str>,
        message: ServerMessage,
    ) -> usize {
        let Some(conn_ids) = self.by_group.get(group).map(|ids| ids.clone()) else {
            return 0;
        };

        let mut sent_count = 0;
        for conn_id in conn_ids {
            let Some(conn) = self.connections.get(&conn_id) else {
                continue;
            };
            if exclude_node.is_some() && conn.node_id.as_deref() == exclude_node {
                continue;
            }
            if conn.sender.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        tracing::debug!(group = %group, recipients = sent_count, "Broadcast message to group");

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of groups with at least one subscriber.
    pub fn group_count(&self) -> usize {
        self.by_group.len()
    }
}
