//! The append-only message log.
//!
//! Holds every message a replica knows about, ordered by timestamp, together
//! with the merkle trie summarizing them and an index of the winning
//! timestamp per cell.

use crate::merkle::{BucketKey, MerkleTrie};
use crate::message::{CellKey, Message};
use crate::{error::Result, Clock, Error, Millis, Timestamp};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// Outcome of [`MessageLog::append`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppendResult {
    /// Timestamps of newly inserted messages, ascending
    pub inserted: Vec<Timestamp>,
    /// Messages ignored because the log already had them
    pub duplicates: usize,
    /// Cells whose winning message changed
    pub winners: BTreeSet<CellKey>,
    /// Inserted messages that lost to a newer message for the same cell
    pub superseded: usize,
}

impl AppendResult {
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty()
    }
}

/// Ordered, deduplicated collection of messages.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: BTreeMap<Timestamp, Message>,
    cells: HashMap<CellKey, Timestamp>,
    trie: MerkleTrie,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append messages, ignoring any whose timestamp is already known.
    ///
    /// Every message is checked first; a malformed one rejects the whole
    /// batch. When a new message is later than the clock, the clock observes
    /// it before anything is inserted. If that fails (counter overflow) the
    /// log is left untouched.
    pub fn append(
        &mut self,
        clock: &mut Clock,
        now: Millis,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<AppendResult> {
        let mut result = AppendResult::default();

        let mut fresh: BTreeMap<Timestamp, Message> = BTreeMap::new();
        for (index, message) in messages.into_iter().enumerate() {
            message
                .check()
                .map_err(|reason| Error::MalformedMessage { index, reason })?;
            if self.messages.contains_key(&message.timestamp)
                || fresh.contains_key(&message.timestamp)
            {
                result.duplicates += 1;
                continue;
            }
            fresh.insert(message.timestamp.clone(), message);
        }

        if let Some(latest) = fresh.keys().next_back() {
            if latest > clock.timestamp() {
                clock.recv(latest, now)?;
            }
        }

        for (timestamp, message) in fresh {
            self.trie.insert(&timestamp);

            let cell = message.cell();
            let wins = self
                .cells
                .get(&cell)
                .map_or(true, |current| *current < timestamp);
            if wins {
                self.cells.insert(cell.clone(), timestamp.clone());
                result.winners.insert(cell);
            }

            result.inserted.push(timestamp.clone());
            self.messages.insert(timestamp, message);
        }

        result.superseded = result
            .inserted
            .iter()
            .filter(|ts| {
                self.messages
                    .get(*ts)
                    .and_then(|m| self.cells.get(&m.cell()))
                    .map_or(false, |winner| winner != *ts)
            })
            .count();

        if !result.is_noop() {
            tracing::trace!(
                inserted = result.inserted.len(),
                duplicates = result.duplicates,
                root = self.trie.hash(),
                "appended messages"
            );
        }
        Ok(result)
    }

    /// Messages with a timestamp strictly after `since`, in timestamp order.
    pub fn get_since<'a>(&'a self, since: &Timestamp) -> impl Iterator<Item = &'a Message> + 'a {
        self.messages
            .range((Bound::Excluded(since.clone()), Bound::Unbounded))
            .map(|(_, m)| m)
    }

    /// Messages whose timestamp falls inside a trie bucket.
    pub fn in_bucket<'a>(&'a self, key: &BucketKey) -> impl Iterator<Item = &'a Message> + 'a {
        let range = key.range();
        self.messages
            .range(Timestamp::floor(range.start)..)
            .map(|(_, m)| m)
            .take_while(move |m| m.timestamp.millis() < range.end)
    }

    /// The newest message for a cell.
    pub fn current_message(&self, cell: &CellKey) -> Option<&Message> {
        self.cells.get(cell).and_then(|ts| self.messages.get(ts))
    }

    /// The current value of a cell.
    pub fn current_value(&self, dataset: &str, row: &str, column: &str) -> Option<&Value> {
        self.current_message(&CellKey::new(dataset, row, column))
            .map(|m| &m.value)
    }

    pub fn contains(&self, timestamp: &Timestamp) -> bool {
        self.messages.contains_key(timestamp)
    }

    pub fn get(&self, timestamp: &Timestamp) -> Option<&Message> {
        self.messages.get(timestamp)
    }

    /// All messages in timestamp order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// Every cell that has at least one message.
    pub fn cells(&self) -> impl Iterator<Item = &CellKey> {
        self.cells.keys()
    }

    pub fn latest(&self) -> Option<&Timestamp> {
        self.messages.keys().next_back()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The trie summarizing this log.
    pub fn trie(&self) -> &MerkleTrie {
        &self.trie
    }

    /// Collapse old trie history, keeping `keep` children per level.
    ///
    /// Messages stay in the log. Buckets under pruned keys are exchanged
    /// whole when a peer differs there.
    pub fn prune_trie(&mut self, keep: usize) {
        let before = self.trie.node_count();
        self.trie.prune(keep);
        tracing::debug!(
            keep,
            before,
            after = self.trie.node_count(),
            "pruned trie"
        );
    }

    /// Earliest millisecond from which this log may differ from `other`.
    pub fn divergence(&self, other: &MerkleTrie) -> Option<Millis> {
        self.trie.divergence(other)
    }
}
