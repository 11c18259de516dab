//! Time-bucketed merkle trie for finding where two message histories diverge.
//!
//! Each message timestamp is keyed by its minute (`millis / 60_000`) written
//! as [`KEY_DIGITS`] base-3 digits. Every node stores the XOR of the hashes of
//! all timestamps below it, so two replicas holding the same set of messages
//! under a key always agree on that node's hash, regardless of arrival order.
//!
//! Shallow keys cover wide time ranges and deep keys narrow ones. Two replicas
//! compare root hashes first and only descend into children whose hashes
//! differ, which keeps the comparison cheap when most history is shared.
//!
//! Nodes are immutable and shared through `Arc`; [`MerkleTrie::insert`] copies
//! only the path it changes. Cloning a trie is therefore an O(1) snapshot that
//! can be compared while the original keeps receiving inserts.

use crate::{Error, Millis, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

/// Fan-out of every trie node.
pub const BRANCHING: usize = 3;

/// Depth of a leaf bucket.
pub const KEY_DIGITS: usize = 17;

/// Width of a leaf bucket.
pub const BUCKET_MILLIS: Millis = 60_000;

/// Number of leaf buckets addressable by a full key.
const KEY_SPAN: u64 = (BRANCHING as u64).pow(KEY_DIGITS as u32);

/// Last millisecond addressable by a bucket key.
pub const MAX_MILLIS: Millis = KEY_SPAN * BUCKET_MILLIS - 1;

/// A path from the root of the trie: up to [`KEY_DIGITS`] digits in `0..3`.
///
/// The root key is empty. A key of depth `d` covers `3^(KEY_DIGITS - d)`
/// leaf buckets. Keys order lexicographically, so disjoint keys sort by the
/// time ranges they cover.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct BucketKey(Vec<u8>);

impl BucketKey {
    /// The key of the root node.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Full-depth key of the leaf bucket containing `millis`.
    pub fn for_millis(millis: Millis) -> Self {
        let mut minutes = millis.min(MAX_MILLIS) / BUCKET_MILLIS;
        let mut digits = vec![0u8; KEY_DIGITS];
        for slot in digits.iter_mut().rev() {
            *slot = (minutes % BRANCHING as u64) as u8;
            minutes /= BRANCHING as u64;
        }
        Self(digits)
    }

    /// Key of the child under `digit`.
    pub fn child(&self, digit: u8) -> Self {
        debug_assert!((digit as usize) < BRANCHING);
        debug_assert!(!self.is_leaf());
        let mut digits = self.0.clone();
        digits.push(digit);
        Self(digits)
    }

    pub fn digits(&self) -> &[u8] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// True for full-depth (one minute wide) keys.
    pub fn is_leaf(&self) -> bool {
        self.0.len() == KEY_DIGITS
    }

    /// Half-open millisecond range covered by this key.
    pub fn range(&self) -> Range<Millis> {
        let width = (BRANCHING as u64).pow((KEY_DIGITS - self.depth()) as u32);
        let prefix = self
            .0
            .iter()
            .fold(0u64, |acc, d| acc * BRANCHING as u64 + *d as u64);
        let start = prefix * width * BUCKET_MILLIS;
        start..start + width * BUCKET_MILLIS
    }

    /// Whether a timestamp falls inside this bucket.
    pub fn contains(&self, timestamp: &Timestamp) -> bool {
        self.range().contains(&timestamp.millis())
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for digit in &self.0 {
            write!(f, "{}", digit)?;
        }
        Ok(())
    }
}

impl FromStr for BucketKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.len() > KEY_DIGITS {
            return Err(Error::InvalidTimestamp(format!(
                "bucket key '{}' deeper than {} digits",
                s, KEY_DIGITS
            )));
        }
        s.bytes()
            .map(|b| match b {
                b'0'..=b'2' => Ok(b - b'0'),
                _ => Err(Error::InvalidTimestamp(format!(
                    "bucket key '{}' is not base-3",
                    s
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl From<BucketKey> for String {
    fn from(key: BucketKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for BucketKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

/// What one side tells the other about a single trie node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    /// XOR of all timestamp hashes under the node (0 when empty)
    pub hash: u64,
    /// Hashes of the children that exist
    pub children: [Option<u64>; BRANCHING],
}

impl NodeSummary {
    /// Summary of a node holding no messages.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hash == 0 && self.children.iter().all(Option::is_none)
    }

    /// A node with messages but no children: its history was pruned.
    pub fn is_opaque(&self) -> bool {
        self.hash != 0 && self.children.iter().all(Option::is_none)
    }

    /// Hash of a child, 0 when the child is absent.
    pub fn child_hash(&self, digit: u8) -> u64 {
        self.children[digit as usize].unwrap_or(0)
    }
}

/// Outcome of comparing the two sides of one trie node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    /// Identical message sets below this key; nothing to do.
    Equal,
    /// The messages under this key must be exchanged.
    Bucket,
    /// Descend into these children, whose hashes differ.
    Descend(Vec<u8>),
}

/// Compare a local and a remote node at the same key.
///
/// Descends only while both sides can still tell their children apart. A
/// key is reported as a bucket once it is a leaf, once either side holds no
/// messages there, once either side has pruned its children, or once the
/// hashes differ without any child hash differing.
pub fn compare_nodes(key: &BucketKey, local: &NodeSummary, remote: &NodeSummary) -> Comparison {
    if local.hash == remote.hash {
        return Comparison::Equal;
    }
    if key.is_leaf()
        || local.hash == 0
        || remote.hash == 0
        || local.is_opaque()
        || remote.is_opaque()
    {
        return Comparison::Bucket;
    }

    let differing: Vec<u8> = (0..BRANCHING as u8)
        .filter(|&d| local.child_hash(d) != remote.child_hash(d))
        .collect();
    if differing.is_empty() {
        Comparison::Bucket
    } else {
        Comparison::Descend(differing)
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    hash: u64,
    children: [Option<Arc<Node>>; BRANCHING],
}

impl Node {
    fn summary(&self) -> NodeSummary {
        NodeSummary {
            hash: self.hash,
            children: [0, 1, 2].map(|d| self.children[d].as_ref().map(|c| c.hash)),
        }
    }
}

/// Persistent merkle trie over message timestamps.
#[derive(Debug, Clone, Default)]
pub struct MerkleTrie {
    root: Arc<Node>,
}

impl MerkleTrie {
    /// Create an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a trie from a set of distinct timestamps.
    pub fn build<'a>(timestamps: impl IntoIterator<Item = &'a Timestamp>) -> Self {
        let mut trie = Self::new();
        for ts in timestamps {
            trie.insert(ts);
        }
        trie
    }

    /// Root hash; 0 for an empty trie.
    pub fn hash(&self) -> u64 {
        self.root.hash
    }

    pub fn is_empty(&self) -> bool {
        self.root.summary().is_empty()
    }

    /// Record a timestamp.
    ///
    /// Hashes are combined with XOR, so each timestamp must be inserted at
    /// most once; the message log guarantees that.
    pub fn insert(&mut self, timestamp: &Timestamp) {
        let hash = timestamp.hash();
        let key = BucketKey::for_millis(timestamp.millis());

        let mut node = Arc::make_mut(&mut self.root);
        node.hash ^= hash;
        for &digit in key.digits() {
            let child = node.children[digit as usize].get_or_insert_with(Default::default);
            node = Arc::make_mut(child);
            node.hash ^= hash;
        }
    }

    fn node(&self, key: &BucketKey) -> Option<&Node> {
        key.digits()
            .iter()
            .try_fold(self.root.as_ref(), |node, &d| {
                node.children[d as usize].as_deref()
            })
    }

    /// Summary of the node at `key`, empty when the path does not exist.
    pub fn summary(&self, key: &BucketKey) -> NodeSummary {
        self.node(key)
            .map(Node::summary)
            .unwrap_or_else(NodeSummary::empty)
    }

    /// Keys of the buckets whose message sets differ between the two tries.
    ///
    /// The returned keys are disjoint. An empty result means the tries
    /// summarize identical message sets.
    pub fn diff(&self, other: &MerkleTrie) -> BTreeSet<BucketKey> {
        let mut buckets = BTreeSet::new();
        let mut stack = vec![BucketKey::root()];

        while let Some(key) = stack.pop() {
            match compare_nodes(&key, &self.summary(&key), &other.summary(&key)) {
                Comparison::Equal => {}
                Comparison::Bucket => {
                    buckets.insert(key);
                }
                Comparison::Descend(digits) => {
                    stack.extend(digits.into_iter().map(|d| key.child(d)));
                }
            }
        }

        buckets
    }

    /// Earliest millisecond from which the two histories may differ.
    pub fn divergence(&self, other: &MerkleTrie) -> Option<Millis> {
        self.diff(other).first().map(|key| key.range().start)
    }

    /// Keep only the `keep` most recent children at every level.
    ///
    /// Dropped subtrees stay accounted for in their parent's hash, so old
    /// history collapses into coarse buckets while recent history keeps
    /// minute resolution.
    pub fn prune(&mut self, keep: usize) {
        prune_node(Arc::make_mut(&mut self.root), keep.max(1));
    }

    /// Number of nodes reachable from the root, including the root.
    pub fn node_count(&self) -> usize {
        fn count(node: &Node) -> usize {
            1 + node.children.iter().flatten().map(|c| count(c)).sum::<usize>()
        }
        count(&self.root)
    }
}

fn prune_node(node: &mut Node, keep: usize) {
    let present: Vec<usize> = (0..BRANCHING)
        .filter(|&d| node.children[d].is_some())
        .collect();
    let cut = present.len().saturating_sub(keep);

    for &d in &present[..cut] {
        node.children[d] = None;
    }
    for &d in &present[cut..] {
        if let Some(child) = node.children[d].as_mut() {
            prune_node(Arc::make_mut(child), keep);
        }
    }
}
