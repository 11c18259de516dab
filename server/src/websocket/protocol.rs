//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.

use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the group's current root hash.
    Status {
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Response to a status request.
    Status {
        group: String,
        /// Root hash of the group's trie, as 16 hex digits
        root_hash: String,
        /// Messages held by the group
        message_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Another client delivered new messages; run a sync session.
    SyncNeeded {
        group: String,
        root_hash: String,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

/// Root hashes go over the wire as hex so JavaScript clients keep all 64 bits.
pub fn format_hash(hash: u64) -> String {
    format!("{:016x}", hash)
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    /// Create a sync_needed notification.
    pub fn sync_needed(group: impl Into<String>, root_hash: u64) -> Self {
        ServerMessage::SyncNeeded {
            group: group.into(),
            root_hash: format_hash(root_hash),
        }
    }
}
