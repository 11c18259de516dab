//! Unit tests for the WebSocket notification protocol.

use serde::{Deserialize, Serialize};

/// Client-side view of server messages.
#[allow(dead_code)]
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Status {
        group: String,
        root_hash: String,
        message_count: usize,
        request_id: Option<String>,
    },
    SyncNeeded {
        group: String,
        root_hash: String,
    },
    Pong,
    Error {
        message: String,
        request_id: Option<String>,
    },
}

/// Client-side view of client messages.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Status {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Ping,
}

#[cfg(test)]
mod websocket_protocol_tests {
    use super::*;

    #[test]
    fn test_sync_needed_notification() {
        let json = r#"{"type":"sync_needed","group":"household","root_hash":"00000000deadbeef"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::SyncNeeded { group, root_hash } => {
                assert_eq!(group, "household");
                assert_eq!(u64::from_str_radix(&root_hash, 16).unwrap(), 0xdead_beef);
            }
            other => panic!("Expected SyncNeeded, got {:?}", other),
        }
    }

    #[test]
    fn test_status_response() {
        let json = r#"{
            "type": "status",
            "group": "household",
            "root_hash": "0000000000000000",
            "message_count": 0,
            "request_id": "req-001"
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Status {
                group: "household".into(),
                root_hash: "0000000000000000".into(),
                message_count: 0,
                request_id: Some("req-001".into()),
            }
        );
    }

    #[test]
    fn test_status_without_request_id() {
        let json = r#"{
            "type": "status",
            "group": "g",
            "root_hash": "0000000000000001",
            "message_count": 3
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::Status { request_id: None, .. }));
    }

    #[test]
    fn test_client_messages() {
        assert_eq!(
            serde_json::to_string(&ClientMessage::Ping).unwrap(),
            r#"{"type":"ping"}"#
        );
        assert_eq!(
            serde_json::to_string(&ClientMessage::Status {
                request_id: Some("r1".into())
            })
            .unwrap(),
            r#"{"type":"status","request_id":"r1"}"#
        );
        assert_eq!(
            serde_json::to_string(&ClientMessage::Status { request_id: None }).unwrap(),
            r#"{"type":"status"}"#
        );
    }

    #[test]
    fn test_error_and_pong() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Pong);

        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"error","message":"Invalid message format"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Error { request_id: None, .. }));
    }
}
