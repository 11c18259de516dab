//! Trie localization handlers.
//!
//! A client walks the group's trie one node at a time, then lists the
//! timestamps of each divergent bucket before exchanging messages.

use converge_engine::{BucketKey, MemoryStorage, NodeSummary, Replica, Timestamp};
use serde::{Deserialize, Serialize};

/// Request body for `POST /sync/{group}/node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRequest {
    /// Node to summarize; the root when omitted
    #[serde(default = "BucketKey::root")]
    pub key: BucketKey,
}

/// Request body for `POST /sync/{group}/timestamps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampsRequest {
    pub bucket: BucketKey,
}

/// Response body for `POST /sync/{group}/timestamps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampsResponse {
    pub timestamps: Vec<Timestamp>,
}

/// Summarize one node of the group's trie.
pub fn handle_node(replica: &Replica<MemoryStorage>, request: &NodeRequest) -> NodeSummary {
    replica.node_summary(&request.key)
}

/// List the timestamps the group holds in a bucket.
pub fn handle_timestamps(
    replica: &Replica<MemoryStorage>,
    request: &TimestampsRequest,
) -> TimestampsResponse {
    TimestampsResponse {
        timestamps: replica.bucket_timestamps(&request.bucket),
    }
}
