//! The merge engine.
//!
//! A [`Replica`] ties together the clock, the message log (and its trie) and
//! the storage collaborator. Every mutation, local or remote, goes through
//! [`Replica::apply`]:
//!
//! 1. Validate the whole batch; reject it on the first malformed message
//! 2. Drop messages the log already has
//! 3. Let the clock observe the newest incoming timestamp
//! 4. Insert into the log and trie
//! 5. Write the winning value of every touched cell in one storage transaction
//!
//! Conflicts are resolved per cell by last-write-wins on the timestamp total
//! order, so applying the same set of messages in any order and any number of
//! times yields the same cells.
//!
//! If storage rejects the write, the log, trie and clock keep the new
//! messages and the affected cells are queued. Queued cells are rewritten
//! with their current winner on every later apply, or removed when the log
//! no longer has a message for them.

use crate::log::MessageLog;
use crate::merkle::{BucketKey, MerkleTrie, NodeSummary};
use crate::message::{parse_batch, CellKey, Change, Message, RawMessage};
use crate::snapshot::ReplicaSnapshot;
use crate::storage::Storage;
use crate::sync::ExchangeRequest;
use crate::{error::Result, Clock, ClockConfig, Error, Millis, RowId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Outcome of applying a batch of messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    /// Messages newly added to the log
    pub applied: usize,
    /// Messages already known
    pub duplicates: usize,
    /// Cells written to storage, including retried ones
    pub written: usize,
    /// New messages that lost to a newer message for the same cell
    pub superseded: usize,
}

/// One replica: clock, message log and storage.
#[derive(Debug)]
pub struct Replica<S> {
    clock: Clock,
    log: MessageLog,
    storage: S,
    unapplied: BTreeSet<CellKey>,
}

impl<S: Storage> Replica<S> {
    /// Create a replica with an existing clock and an empty log.
    pub fn new(clock: Clock, storage: S) -> Self {
        Self {
            clock,
            log: MessageLog::new(),
            storage,
            unapplied: BTreeSet::new(),
        }
    }

    /// Create a replica with a newly generated node id.
    pub fn fresh(storage: S, config: ClockConfig) -> Self {
        Self::new(Clock::fresh(config), storage)
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn node_id(&self) -> &str {
        self.clock.node_id()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Cells whose latest winner has not reached storage yet.
    pub fn unapplied(&self) -> impl Iterator<Item = &CellKey> {
        self.unapplied.iter()
    }

    /// Snapshot of the trie, safe to compare without holding the replica.
    pub fn trie(&self) -> MerkleTrie {
        self.log.trie().clone()
    }

    /// Collapse old trie history. See [`MessageLog::prune_trie`].
    pub fn prune_trie(&mut self, keep: usize) {
        self.log.prune_trie(keep);
    }

    /// Earliest millisecond from which this replica may differ from a peer.
    pub fn divergence(&self, peer: &MerkleTrie) -> Option<Millis> {
        self.log.divergence(peer)
    }

    /// Current value of a cell according to the log.
    pub fn current_value(&self, dataset: &str, row: &str, column: &str) -> Option<&Value> {
        self.log.current_value(dataset, row, column)
    }

    /// Apply a batch of messages from any source.
    pub fn apply(&mut self, messages: Vec<Message>, now: Millis) -> Result<ApplyReport> {
        let appended = self.log.append(&mut self.clock, now, messages)?;
        let mut report = ApplyReport {
            applied: appended.inserted.len(),
            duplicates: appended.duplicates,
            written: 0,
            superseded: appended.superseded,
        };

        let mut pending = std::mem::take(&mut self.unapplied);
        pending.extend(appended.winners);
        if pending.is_empty() {
            return Ok(report);
        }

        // a cell with no message left in the log is removed from storage
        let log = &self.log;
        let writes: Vec<(CellKey, Option<Value>)> = pending
            .iter()
            .map(|cell| {
                let value = log.current_message(cell).map(|m| m.value.clone());
                (cell.clone(), value)
            })
            .collect();

        let result = self.storage.transaction(|storage| {
            for (cell, value) in &writes {
                match value {
                    Some(value) => storage.write_cell(
                        &cell.dataset,
                        &cell.row,
                        &cell.column,
                        value.clone(),
                    )?,
                    None => storage.remove_cell(&cell.dataset, &cell.row, &cell.column)?,
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                report.written = writes.len();
                tracing::debug!(
                    node = %self.clock.node_id(),
                    applied = report.applied,
                    duplicates = report.duplicates,
                    written = report.written,
                    "applied messages"
                );
                Ok(report)
            }
            Err(err) => {
                tracing::warn!(
                    node = %self.clock.node_id(),
                    cells = pending.len(),
                    error = %err,
                    "storage write failed, cells queued for retry"
                );
                self.unapplied = pending;
                Err(err.into())
            }
        }
    }

    /// Apply a batch in wire form.
    pub fn apply_remote(&mut self, raw: Vec<RawMessage>, now: Millis) -> Result<ApplyReport> {
        let messages = parse_batch(raw)?;
        self.apply(messages, now)
    }

    /// Retry writing queued cells to storage. Returns how many were written.
    pub fn flush(&mut self, now: Millis) -> Result<usize> {
        self.apply(Vec::new(), now).map(|report| report.written)
    }

    /// Stamp and apply local edits, returning the new messages.
    pub fn write(&mut self, changes: Vec<Change>, now: Millis) -> Result<Vec<Message>> {
        let messages = changes
            .into_iter()
            .map(|change| Ok(change.stamp(self.clock.send(now)?)))
            .collect::<Result<Vec<_>>>()?;
        self.apply(messages.clone(), now)?;
        Ok(messages)
    }

    /// Insert a row, one message per field. Uses `fields["id"]` as the row
    /// id when it is a string, otherwise generates one.
    pub fn insert_row(
        &mut self,
        dataset: &str,
        fields: &Map<String, Value>,
        now: Millis,
    ) -> Result<RowId> {
        let id = match fields.get("id") {
            Some(Value::String(id)) => id.clone(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        self.write(Change::for_fields(dataset, &id, fields), now)?;
        Ok(id)
    }

    /// Update the given fields of a row.
    pub fn update_row(
        &mut self,
        dataset: &str,
        row: &str,
        fields: &Map<String, Value>,
        now: Millis,
    ) -> Result<()> {
        self.write(Change::for_fields(dataset, row, fields), now)
            .map(|_| ())
    }

    /// Mark a row deleted.
    pub fn delete_row(&mut self, dataset: &str, row: &str, now: Millis) -> Result<()> {
        self.write(vec![Change::tombstone(dataset, row)], now)
            .map(|_| ())
    }

    /// Summary of one trie node, answering a peer's localization request.
    pub fn node_summary(&self, key: &BucketKey) -> NodeSummary {
        self.log.trie().summary(key)
    }

    /// Timestamps of every message in a bucket.
    pub fn bucket_timestamps(&self, key: &BucketKey) -> Vec<Timestamp> {
        self.log
            .in_bucket(key)
            .map(|m| m.timestamp.clone())
            .collect()
    }

    /// Apply a peer's messages for a bucket and return the ones it asked for.
    pub fn exchange(&mut self, request: ExchangeRequest, now: Millis) -> Result<Vec<Message>> {
        let ExchangeRequest {
            bucket,
            messages,
            want,
        } = request;

        if !messages.is_empty() {
            self.apply(messages, now)?;
        }

        let reply: Vec<Message> = want
            .iter()
            .filter_map(|ts| self.log.get(ts).cloned())
            .collect();
        tracing::trace!(
            node = %self.clock.node_id(),
            bucket = %bucket,
            wanted = want.len(),
            sent = reply.len(),
            "answered exchange"
        );
        Ok(reply)
    }

    /// Messages after `since`, in timestamp order.
    pub fn messages_since(&self, since: &Timestamp) -> Vec<Message> {
        self.log.get_since(since).cloned().collect()
    }

    /// Export the clock and log for persistence.
    pub fn export_state(&self) -> Result<ReplicaSnapshot> {
        ReplicaSnapshot::new(&self.clock, self.log.iter().cloned().collect())
    }

    /// Build a replica from a snapshot, writing every cell into `storage`.
    pub fn import_state(
        snapshot: ReplicaSnapshot,
        storage: S,
        config: ClockConfig,
        now: Millis,
    ) -> Result<Self> {
        snapshot.validate()?;
        let clock = snapshot.clock(config)?;
        let mut replica = Self::new(clock, storage);
        replica.apply(snapshot.messages, now)?;
        Ok(replica)
    }

    /// Replace this replica's log with a snapshot's.
    ///
    /// Every cell of the old log and the snapshot is rewritten in one storage
    /// transaction. Cells the snapshot has no message for are removed, so
    /// storage matches the restored log. If storage fails, those cells stay
    /// queued for [`Replica::flush`]. The clock only moves forward, so
    /// timestamps already handed out are never issued again.
    pub fn restore(&mut self, snapshot: ReplicaSnapshot, now: Millis) -> Result<ApplyReport> {
        snapshot.validate()?;
        let clock = snapshot.clock(*self.clock.config())?;
        if clock.node_id() != self.clock.node_id() {
            return Err(Error::InvalidSnapshot(format!(
                "snapshot belongs to node '{}'",
                clock.node_id()
            )));
        }

        if clock.timestamp() > self.clock.timestamp() {
            self.clock = clock;
        }
        let previous = std::mem::take(&mut self.log);
        self.unapplied.extend(previous.cells().cloned());
        self.apply(snapshot.messages, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageError};
    use serde_json::json;

    const NODE_A: &str = "000000000000000a";
    const NODE_B: &str = "000000000000000b";
    const BASE: Millis = 1_704_067_200_000;

    fn replica(node: &str) -> Replica<MemoryStorage> {
        Replica::new(
            Clock::new(node, ClockConfig::default()).unwrap(),
            MemoryStorage::new(),
        )
    }

    fn msg(row: &str, column: &str, value: Value, millis: Millis, node: &str) -> Message {
        stamped(row, column, value, Timestamp::new(millis, 0, node))
    }

    fn stamped(row: &str, column: &str, value: Value, timestamp: Timestamp) -> Message {
        Message::new("accounts", row, column, value, timestamp)
    }

    /// Storage that rejects every write while `failing` is set.
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        failing: bool,
    }

    impl Storage for FlakyStorage {
        fn read_cell(
            &self,
            dataset: &str,
            row: &str,
            column: &str,
        ) -> std::result::Result<Option<Value>, StorageError> {
            self.inner.read_cell(dataset, row, column)
        }

        fn write_cell(
            &mut self,
            dataset: &str,
            row: &str,
            column: &str,
            value: Value,
        ) -> std::result::Result<(), StorageError> {
            if self.failing {
                return Err(StorageError::Rejected {
                    dataset: dataset.into(),
                    row: row.into(),
                    column: column.into(),
                    reason: "read-only".into(),
                });
            }
            self.inner.write_cell(dataset, row, column, value)
        }

        fn remove_cell(
            &mut self,
            dataset: &str,
            row: &str,
            column: &str,
        ) -> std::result::Result<(), StorageError> {
            if self.failing {
                return Err(StorageError::Unavailable("read-only".into()));
            }
            self.inner.remove_cell(dataset, row, column)
        }

        fn transaction<T, F>(&mut self, f: F) -> std::result::Result<T, StorageError>
        where
            F: FnOnce(&mut Self) -> std::result::Result<T, StorageError>,
        {
            let before = self.inner.clone();
            let result = f(self);
            if result.is_err() {
                self.inner = before;
            }
            result
        }
    }

    #[test]
    fn apply_writes_winners() {
        let mut r = replica(NODE_A);
        let report = r
            .apply(
                vec![
                    msg("a1", "name", json!("Checking"), BASE, NODE_B),
                    msg("a1", "name", json!("Savings"), BASE + 1, NODE_B),
                    stamped("a1", "balance", json!(10), Timestamp::new(BASE, 1, NODE_B)),
                ],
                BASE,
            )
            .unwrap();

        assert_eq!(report.applied, 3);
        assert_eq!(report.duplicates, 0);
        assert_eq!(report.written, 2);
        assert_eq!(report.superseded, 1);
        assert_eq!(
            r.storage().read_cell("accounts", "a1", "name").unwrap(),
            Some(json!("Savings"))
        );
    }

    #[test]
    fn older_message_does_not_overwrite_storage() {
        let mut r = replica(NODE_A);
        r.apply(vec![msg("a1", "name", json!("new"), BASE + 5, NODE_B)], BASE)
            .unwrap();
        let report = r
            .apply(vec![msg("a1", "name", json!("old"), BASE, NODE_B)], BASE)
            .unwrap();
        assert_eq!(report.written, 0);
        assert_eq!(report.superseded, 1);
        assert_eq!(r.current_value("accounts", "a1", "name"), Some(&json!("new")));
        assert_eq!(
            r.storage().read_cell("accounts", "a1", "name").unwrap(),
            Some(json!("new"))
        );
    }

    #[test]
    fn malformed_batch_is_rejected_whole() {
        let mut r = replica(NODE_A);
        let err = r
            .apply(
                vec![
                    msg("a1", "name", json!("ok"), BASE, NODE_B),
                    msg("a1", "tags", json!(["x"]), BASE + 1, NODE_B),
                ],
                BASE,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { index: 1, .. }));
        assert!(r.log().is_empty());
    }

    #[test]
    fn apply_remote_reports_wire_errors() {
        let mut r = replica(NODE_A);
        let good: RawMessage = msg("a1", "name", json!(1), BASE, NODE_B).into();
        let bad = RawMessage {
            timestamp: None,
            ..good.clone()
        };
        let err = r.apply_remote(vec![good.clone(), bad], BASE).unwrap_err();
        assert_eq!(
            err,
            Error::MalformedMessage {
                index: 1,
                reason: "missing field 'timestamp'".into()
            }
        );
        assert_eq!(r.apply_remote(vec![good], BASE).unwrap().applied, 1);
    }

    #[test]
    fn storage_failure_keeps_log_and_retries() {
        let mut r = Replica::new(
            Clock::new(NODE_A, ClockConfig::default()).unwrap(),
            FlakyStorage {
                failing: true,
                ..Default::default()
            },
        );
        let m = msg("a1", "name", json!("Checking"), BASE, NODE_B);
        let err = r.apply(vec![m.clone()], BASE).unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Rejected { .. })));

        // the fact is recorded even though storage missed it
        assert!(r.log().contains(&m.timestamp));
        assert_eq!(r.unapplied().count(), 1);
        assert_eq!(r.storage().read_cell("accounts", "a1", "name").unwrap(), None);

        // redelivery is a duplicate but still leaves the cell queued
        assert!(r.apply(vec![m.clone()], BASE).is_err());

        r.storage_mut().failing = false;
        assert_eq!(r.flush(BASE).unwrap(), 1);
        assert_eq!(r.unapplied().count(), 0);
        assert_eq!(
            r.storage().read_cell("accounts", "a1", "name").unwrap(),
            Some(json!("Checking"))
        );
    }

    #[test]
    fn local_writes_are_stamped_in_order() {
        let mut r = replica(NODE_A);
        let messages = r
            .write(
                vec![
                    Change::new("accounts", "a1", "name", json!("Checking")),
                    Change::new("accounts", "a1", "name", json!("Savings")),
                ],
                BASE,
            )
            .unwrap();
        assert!(messages[0].timestamp < messages[1].timestamp);
        assert_eq!(messages[0].timestamp.node(), NODE_A);
        assert_eq!(r.current_value("accounts", "a1", "name"), Some(&json!("Savings")));
    }

    #[test]
    fn row_helpers() {
        let mut r = replica(NODE_A);
        let fields = json!({"name": "Checking", "balance": 100})
            .as_object()
            .cloned()
            .unwrap();
        let id = r.insert_row("accounts", &fields, BASE).unwrap();
        assert_eq!(r.storage().get_row("accounts", &id).unwrap().get("balance"), Some(&json!(100)));

        let fields = json!({"id": id.clone(), "balance": 50}).as_object().cloned().unwrap();
        r.update_row("accounts", &id, &fields, BASE).unwrap();
        let row = r.storage().get_row("accounts", &id).unwrap();
        assert_eq!(row.get("balance"), Some(&json!(50)));
        assert_eq!(row.get("id"), None);

        r.delete_row("accounts", &id, BASE).unwrap();
        assert!(r.storage().get_row("accounts", &id).is_none());
        assert_eq!(r.log().len(), 4);

        let fields = json!({"id": "fixed", "name": "Cash"}).as_object().cloned().unwrap();
        assert_eq!(r.insert_row("accounts", &fields, BASE).unwrap(), "fixed");
    }

    #[test]
    fn exchange_applies_and_answers() {
        let mut server = replica(NODE_A);
        let own = server
            .write(vec![Change::new("accounts", "a1", "name", json!("Checking"))], BASE)
            .unwrap();

        let theirs = msg("a2", "name", json!("Savings"), BASE + 1, NODE_B);
        let bucket = BucketKey::for_millis(BASE);
        let reply = server
            .exchange(
                ExchangeRequest {
                    bucket: bucket.clone(),
                    messages: vec![theirs.clone()],
                    want: vec![own[0].timestamp.clone(), Timestamp::new(BASE, 9, NODE_B)],
                },
                BASE,
            )
            .unwrap();

        assert_eq!(reply, own);
        assert!(server.log().contains(&theirs.timestamp));
        assert_eq!(server.bucket_timestamps(&bucket).len(), 2);
        assert_eq!(server.node_summary(&BucketKey::root()).hash, server.trie().hash());
    }

    #[test]
    fn messages_since() {
        let mut r = replica(NODE_A);
        let sent = r
            .write(
                (0..4)
                    .map(|i| Change::new("accounts", "a1", format!("c{}", i), json!(i)))
                    .collect(),
                BASE,
            )
            .unwrap();
        let since = r.messages_since(&sent[1].timestamp);
        assert_eq!(since, sent[2..].to_vec());
    }

    #[test]
    fn export_import_roundtrip() {
        let mut r = replica(NODE_A);
        r.write(vec![Change::new("accounts", "a1", "name", json!("Checking"))], BASE)
            .unwrap();
        r.apply(vec![msg("a2", "name", json!("Savings"), BASE + 10, NODE_B)], BASE)
            .unwrap();

        let snapshot = r.export_state().unwrap();
        let json = snapshot.to_json().unwrap();
        let restored = Replica::import_state(
            ReplicaSnapshot::from_json(&json).unwrap(),
            MemoryStorage::new(),
            ClockConfig::default(),
            BASE,
        )
        .unwrap();

        assert_eq!(restored.node_id(), NODE_A);
        assert_eq!(restored.trie().hash(), r.trie().hash());
        assert_eq!(restored.storage(), r.storage());
        assert!(restored.clock().timestamp() >= r.clock().timestamp());
    }

    #[test]
    fn restore_replaces_log() {
        let mut r = replica(NODE_A);
        r.write(vec![Change::new("accounts", "a1", "name", json!("Checking"))], BASE)
            .unwrap();
        let snapshot = r.export_state().unwrap();
        r.write(vec![Change::new("accounts", "a1", "name", json!("Savings"))], BASE + 1)
            .unwrap();

        r.restore(snapshot, BASE + 2).unwrap();
        assert_eq!(r.log().len(), 1);
        assert_eq!(
            r.storage().read_cell("accounts", "a1", "name").unwrap(),
            Some(json!("Checking"))
        );

        let foreign = replica(NODE_B).export_state().unwrap();
        assert!(matches!(
            r.restore(foreign, BASE),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    fn assert_storage_matches_log<S: Storage>(r: &Replica<S>, cells: &[CellKey]) {
        for cell in cells {
            let stored = r
                .storage()
                .read_cell(&cell.dataset, &cell.row, &cell.column)
                .unwrap();
            assert_eq!(
                stored.as_ref(),
                r.current_value(&cell.dataset, &cell.row, &cell.column),
                "cell {:?}",
                cell
            );
        }
    }

    #[test]
    fn restore_removes_cells_written_after_snapshot() {
        let mut r = replica(NODE_A);
        r.write(vec![Change::new("accounts", "a1", "name", json!("Checking"))], BASE)
            .unwrap();
        let snapshot = r.export_state().unwrap();
        r.write(
            vec![
                Change::new("accounts", "a1", "balance", json!(99)),
                Change::new("accounts", "a2", "name", json!("Savings")),
            ],
            BASE + 1,
        )
        .unwrap();
        let cells: Vec<CellKey> = r.log().cells().cloned().collect();

        r.restore(snapshot, BASE + 2).unwrap();

        assert_storage_matches_log(&r, &cells);
        assert_eq!(r.storage().read_cell("accounts", "a1", "balance").unwrap(), None);
        assert!(r.storage().get_row("accounts", "a2").is_none());
        assert_eq!(
            r.storage().get_row("accounts", "a1").unwrap().get("name"),
            Some(&json!("Checking"))
        );
        assert_eq!(r.unapplied().count(), 0);
    }

    #[test]
    fn restore_with_failing_storage_repairs_on_flush() {
        let mut r = Replica::new(
            Clock::new(NODE_A, ClockConfig::default()).unwrap(),
            FlakyStorage::default(),
        );
        r.write(vec![Change::new("accounts", "a1", "name", json!("Checking"))], BASE)
            .unwrap();
        let snapshot = r.export_state().unwrap();
        r.write(vec![Change::new("accounts", "a2", "name", json!("Savings"))], BASE + 1)
            .unwrap();
        let cells: Vec<CellKey> = r.log().cells().cloned().collect();

        r.storage_mut().failing = true;
        assert!(matches!(r.restore(snapshot, BASE + 2), Err(Error::Storage(_))));
        assert_eq!(r.log().len(), 1);
        assert_eq!(r.unapplied().count(), 2);

        r.storage_mut().failing = false;
        assert_eq!(r.flush(BASE + 3).unwrap(), 2);
        assert_storage_matches_log(&r, &cells);
        assert_eq!(r.storage().inner.read_cell("accounts", "a2", "name").unwrap(), None);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_batch(node: &'static str) -> impl Strategy<Value = Vec<Message>> {
            prop::collection::btree_map(
                (0u64..5_000, 0u16..3),
                (0usize..3, 0usize..3, -50i64..50),
                0..40,
            )
            .prop_map(move |entries| {
                entries
                    .into_iter()
                    .map(|((millis, counter), (row, column, value))| {
                        Message::new(
                            "accounts",
                            format!("r{}", row),
                            format!("c{}", column),
                            json!(value),
                            Timestamp::new(BASE + millis, counter, node),
                        )
                    })
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn prop_apply_order_commutes(a in arb_batch(NODE_A), b in arb_batch(NODE_B)) {
                let mut ab = replica("00000000000000cc");
                ab.apply(a.clone(), BASE).unwrap();
                ab.apply(b.clone(), BASE).unwrap();

                let mut ba = replica("00000000000000cc");
                ba.apply(b, BASE).unwrap();
                ba.apply(a, BASE).unwrap();

                prop_assert_eq!(ab.storage(), ba.storage());
                prop_assert_eq!(ab.trie().hash(), ba.trie().hash());
            }

            #[test]
            fn prop_apply_idempotent(a in arb_batch(NODE_A)) {
                let mut once = replica("00000000000000cc");
                once.apply(a.clone(), BASE).unwrap();

                let mut twice = replica("00000000000000cc");
                twice.apply(a.clone(), BASE).unwrap();
                let report = twice.apply(a.clone(), BASE).unwrap();

                prop_assert_eq!(report.applied, 0);
                prop_assert_eq!(report.duplicates, a.len());
                prop_assert_eq!(once.storage(), twice.storage());
                prop_assert_eq!(once.trie().hash(), twice.trie().hash());
            }
        }
    }
}
