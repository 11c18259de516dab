//! Message exchange handler.
//!
//! The client sends the messages of one divergent bucket that the group is
//! missing, and names the timestamps it wants back.

use std::collections::BTreeSet;

use converge_engine::message::parse_batch;
use converge_engine::{
    BucketKey, ExchangeRequest, MemoryStorage, Message, Millis, RawMessage, Replica, Timestamp,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Request body for `POST /sync/{group}/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRequest {
    pub bucket: BucketKey,
    /// Messages the group is missing, validated before anything is applied
    #[serde(default)]
    pub messages: Vec<RawMessage>,
    /// Timestamps the client is missing
    #[serde(default)]
    pub want: Vec<Timestamp>,
    /// The client's node id; its own subscriptions are not notified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

/// Response body for `POST /sync/{group}/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

/// Result of an exchange against a group.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    /// Messages the client asked for
    pub reply: Vec<Message>,
    /// Messages the group had not seen before, to be persisted
    pub fresh: Vec<Message>,
    /// Root hash after applying
    pub root_hash: u64,
}

/// Apply a client's messages to a group and collect the ones it wants.
pub fn handle_exchange(
    replica: &mut Replica<MemoryStorage>,
    request: MessagesRequest,
    max_batch_size: usize,
    now: Millis,
) -> Result<ExchangeOutcome> {
    if request.messages.len() > max_batch_size || request.want.len() > max_batch_size {
        return Err(AppError::BadRequest(format!(
            "batch exceeds {} messages",
            max_batch_size
        )));
    }

    let messages = parse_batch(request.messages)?;

    let mut seen = BTreeSet::new();
    let fresh: Vec<Message> = messages
        .iter()
        .filter(|m| !replica.log().contains(&m.timestamp) && seen.insert(m.timestamp.clone()))
        .cloned()
        .collect();

    let reply = replica.exchange(
        ExchangeRequest {
            bucket: request.bucket,
            messages,
            want: request.want,
        },
        now,
    )?;

    Ok(ExchangeOutcome {
        reply,
        fresh,
        root_hash: replica.log().trie().hash(),
    })
}
