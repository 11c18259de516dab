//! Snapshot types for persisting and restoring replica state.
//!
//! A snapshot holds the clock token and the full message log. Storage
//! contents are not included: they are derived from the messages and are
//! rewritten when a snapshot is restored.

use crate::{error::Result, Clock, ClockConfig, Error, Message, NodeId};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a replica.
///
/// Messages are kept in timestamp order, so two replicas holding the same
/// messages serialize to the same bytes apart from the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Node id of the replica
    pub node_id: NodeId,
    /// Serialized clock token
    pub clock: String,
    /// Every known message, ascending by timestamp
    pub messages: Vec<Message>,
}

impl ReplicaSnapshot {
    /// Create a snapshot from a clock and its log.
    pub fn new(clock: &Clock, messages: Vec<Message>) -> Result<Self> {
        Ok(Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            node_id: clock.node_id().to_string(),
            clock: clock.serialize()?,
            messages,
        })
    }

    /// Restore the clock stored in this snapshot.
    pub fn clock(&self, config: ClockConfig) -> Result<Clock> {
        let clock = Clock::deserialize(&self.clock, config)?;
        if clock.node_id() != self.node_id {
            return Err(Error::InvalidSnapshot(format!(
                "clock node '{}' does not match snapshot node '{}'",
                clock.node_id(),
                self.node_id
            )));
        }
        Ok(clock)
    }

    /// Check messages are well-formed, unique and ordered.
    pub fn validate(&self) -> Result<()> {
        for (index, message) in self.messages.iter().enumerate() {
            message
                .check()
                .map_err(|reason| Error::MalformedMessage { index, reason })?;
        }
        if let Some(pair) = self
            .messages
            .windows(2)
            .find(|pair| pair[0].timestamp >= pair[1].timestamp)
        {
            return Err(Error::InvalidSnapshot(format!(
                "messages out of order at {}",
                pair[1].timestamp
            )));
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the messages).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Snapshot format version
    pub format_version: u32,
    /// Node ID
    pub node_id: NodeId,
    /// Total message count
    pub message_count: usize,
    /// Timestamp of the newest message, if any
    pub latest: Option<String>,
}

impl From<&ReplicaSnapshot> for SnapshotMetadata {
    fn from(snapshot: &ReplicaSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            node_id: snapshot.node_id.clone(),
            message_count: snapshot.messages.len(),
            latest: snapshot.messages.last().map(|m| m.timestamp.to_string()),
        }
    }
}
