//! Hybrid logical clock for stamping messages.
//!
//! Every message carries a [`Timestamp`] made of wall-clock milliseconds, a
//! counter that disambiguates events within the same millisecond, and the id
//! of the replica that produced it. Timestamps are totally ordered by
//! `(millis, counter, node)` and unique across all replicas.
//!
//! Wall-clock time is passed in by the caller (`now`), which keeps the clock
//! deterministic under test. Use [`system_now`] for the real wall clock.

use crate::merkle::MAX_MILLIS;
use crate::{error::Result, Error, Millis, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest counter value before the clock refuses to produce timestamps.
pub const MAX_COUNTER: u16 = u16::MAX;

/// Length of a node id in characters.
pub const NODE_ID_LEN: usize = 16;

/// Length of the ISO-8601 part of the string form.
const ISO_LEN: usize = 24;

/// Default skew tolerated before a warning is raised (one minute).
pub const DEFAULT_MAX_SKEW_MS: u64 = 60_000;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn system_now() -> Millis {
    chrono::Utc::now().timestamp_millis().max(0) as Millis
}

/// Generate a fresh random node id (16 lowercase hex characters).
///
/// A replica calls this once, when it is first created. The id is then
/// persisted inside the clock token and must never change.
pub fn generate_node_id() -> NodeId {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    uuid[uuid.len() - NODE_ID_LEN..].to_string()
}

/// Check that a node id has the fixed length and hex alphabet.
pub fn validate_node_id(node: &str) -> Result<()> {
    if node.len() == NODE_ID_LEN && node.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(Error::InvalidNodeId(node.to_string()))
    }
}

/// A hybrid logical timestamp.
///
/// Ordering rules:
/// 1. Higher millis wins
/// 2. If millis equal, higher counter wins
/// 3. If both equal, lexicographically higher node id wins
///
/// Serialized as its sortable string form, e.g.
/// `2024-01-01T00:00:00.000Z-0001-0123456789abcdef`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Timestamp {
    millis: Millis,
    counter: u16,
    node: NodeId,
}

impl Timestamp {
    /// Create a timestamp from its parts.
    pub fn new(millis: Millis, counter: u16, node: impl Into<NodeId>) -> Self {
        Self {
            millis,
            counter,
            node: node.into(),
        }
    }

    /// Wall-clock component in milliseconds since the Unix epoch.
    pub fn millis(&self) -> Millis {
        self.millis
    }

    /// Same-millisecond disambiguation counter.
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Id of the replica that produced this timestamp.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Smallest timestamp with the given millis, used as a range bound.
    pub(crate) fn floor(millis: Millis) -> Self {
        Self::new(millis, 0, String::new())
    }

    /// Hash of the string form, used to fingerprint this timestamp in the
    /// merkle trie.
    pub fn hash(&self) -> u64 {
        xxhash_rust::xxh3::xxh3_64(self.to_string().as_bytes())
    }

    /// Check that every component is in range.
    pub fn validate(&self) -> Result<()> {
        if self.millis > MAX_MILLIS {
            return Err(Error::InvalidTimestamp(format!(
                "millis {} beyond supported range",
                self.millis
            )));
        }
        validate_node_id(&self.node)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iso = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.millis as i64)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
            .ok_or(fmt::Error)?;
        write!(f, "{}-{:04X}-{}", iso, self.counter, self.node)
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidTimestamp(s.to_string());

        let mut parts = s.rsplitn(3, '-');
        let node = parts.next().ok_or_else(invalid)?;
        let counter = parts.next().ok_or_else(invalid)?;
        let iso = parts.next().ok_or_else(invalid)?;

        if iso.len() != ISO_LEN || !iso.ends_with('Z') || counter.len() != 4 {
            return Err(invalid());
        }

        let millis = chrono::DateTime::parse_from_rfc3339(iso)
            .map_err(|_| invalid())?
            .timestamp_millis();
        if millis < 0 {
            return Err(invalid());
        }
        let counter = u16::from_str_radix(counter, 16).map_err(|_| invalid())?;

        let timestamp = Timestamp::new(millis as Millis, counter, node);
        timestamp.validate()?;
        Ok(timestamp)
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_string()
    }
}

impl TryFrom<String> for Timestamp {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Clock tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClockConfig {
    /// Distance into the future (relative to the wall clock) a timestamp may
    /// be before a skew warning is raised.
    pub max_skew_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_skew_ms: DEFAULT_MAX_SKEW_MS,
        }
    }
}

/// Where a skewed timestamp was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkewSource {
    /// The local clock itself ran ahead of the wall clock.
    Local,
    /// A remote message carried a timestamp ahead of the wall clock.
    Remote,
}

/// A detected clock skew. Non-fatal: the clock keeps advancing correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSkew {
    pub source: SkewSource,
    /// Millis of the offending timestamp
    pub observed: Millis,
    /// Wall-clock millis at detection time
    pub wall: Millis,
}

impl ClockSkew {
    /// How far ahead of the wall clock the observed timestamp was.
    pub fn skew_ms(&self) -> u64 {
        self.observed.saturating_sub(self.wall)
    }
}

/// Persisted clock state: `{ millis, counter, nodeId }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockState {
    pub millis: Millis,
    pub counter: u16,
    pub node_id: NodeId,
}

/// Per-replica hybrid logical clock.
///
/// Every value returned by [`Clock::send`] or [`Clock::recv`] is strictly
/// greater than any timestamp previously produced or observed by this clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clock {
    timestamp: Timestamp,
    config: ClockConfig,
    last_skew: Option<ClockSkew>,
}

impl Clock {
    /// Create a clock for a node, starting at the epoch.
    pub fn new(node_id: impl Into<NodeId>, config: ClockConfig) -> Result<Self> {
        let node_id = node_id.into();
        validate_node_id(&node_id)?;
        Ok(Self {
            timestamp: Timestamp::new(0, 0, node_id),
            config,
            last_skew: None,
        })
    }

    /// Create a clock for a brand new replica with a random node id.
    pub fn fresh(config: ClockConfig) -> Self {
        Self {
            timestamp: Timestamp::new(0, 0, generate_node_id()),
            config,
            last_skew: None,
        }
    }

    /// Resume a clock from a known timestamp.
    pub fn from_timestamp(timestamp: Timestamp, config: ClockConfig) -> Result<Self> {
        timestamp.validate()?;
        Ok(Self {
            timestamp,
            config,
            last_skew: None,
        })
    }

    /// The current clock value.
    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    pub fn node_id(&self) -> &str {
        self.timestamp.node()
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Most recently detected skew, if any.
    pub fn last_skew(&self) -> Option<&ClockSkew> {
        self.last_skew.as_ref()
    }

    /// Produce a timestamp for a locally originated message.
    pub fn send(&mut self, now: Millis) -> Result<Timestamp> {
        let current = &self.timestamp;
        let millis = current.millis.max(now);
        let counter = if millis == current.millis {
            current
                .counter
                .checked_add(1)
                .ok_or(Error::CounterOverflow { millis })?
        } else {
            0
        };
        if millis > MAX_MILLIS {
            return Err(Error::InvalidTimestamp(format!(
                "wall clock {} beyond supported range",
                millis
            )));
        }

        let node = current.node.clone();
        self.check_skew(SkewSource::Local, millis, now);
        self.timestamp = Timestamp::new(millis, counter, node);
        Ok(self.timestamp.clone())
    }

    /// Merge a timestamp observed on a remote message into this clock.
    pub fn recv(&mut self, remote: &Timestamp, now: Millis) -> Result<Timestamp> {
        let local = &self.timestamp;
        let millis = local.millis.max(now).max(remote.millis);
        let counter = match (millis == local.millis, millis == remote.millis) {
            (true, true) => local.counter.max(remote.counter).checked_add(1),
            (true, false) => local.counter.checked_add(1),
            (false, true) => remote.counter.checked_add(1),
            (false, false) => Some(0),
        }
        .ok_or(Error::CounterOverflow { millis })?;

        let node = local.node.clone();
        self.check_skew(SkewSource::Remote, remote.millis, now);
        self.timestamp = Timestamp::new(millis, counter, node);
        Ok(self.timestamp.clone())
    }

    fn check_skew(&mut self, source: SkewSource, observed: Millis, now: Millis) {
        if observed.saturating_sub(now) <= self.config.max_skew_ms {
            return;
        }
        let skew = ClockSkew {
            source,
            observed,
            wall: now,
        };
        tracing::warn!(
            node = %self.timestamp.node,
            source = ?source,
            skew_ms = skew.skew_ms(),
            max_skew_ms = self.config.max_skew_ms,
            "clock skew beyond threshold"
        );
        self.last_skew = Some(skew);
    }

    /// Snapshot of the persisted state.
    pub fn state(&self) -> ClockState {
        ClockState {
            millis: self.timestamp.millis,
            counter: self.timestamp.counter,
            node_id: self.timestamp.node.clone(),
        }
    }

    /// Serialize the clock to an opaque token for persistence.
    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string(&self.state()).map_err(|e| Error::InvalidClock(e.to_string()))
    }

    /// Restore a clock from a token produced by [`Clock::serialize`].
    pub fn deserialize(token: &str, config: ClockConfig) -> Result<Self> {
        let state: ClockState =
            serde_json::from_str(token).map_err(|e| Error::InvalidClock(e.to_string()))?;
        Self::from_timestamp(
            Timestamp::new(state.millis, state.counter, state.node_id),
            config,
        )
    }
}
