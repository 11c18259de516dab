//! # Converge Engine
//!
//! A sync engine for local-first applications.
//!
//! Replicas mutate data offline and later reconcile into the same state
//! without any central lock. Every change is an immutable message setting one
//! cell, stamped by a hybrid logical clock. Conflicts resolve per cell by
//! last-write-wins over the timestamp total order, so applying the same
//! messages in any order, any number of times, converges.
//!
//! ## Design Principles
//!
//! - **No IO**: storage and network are collaborators behind traits
//! - **Convergent**: apply is idempotent and commutative
//! - **Incremental**: a merkle trie finds the divergent time ranges so only
//!   the missing messages move
//!
//! ## Core Concepts
//!
//! ### Clock
//!
//! [`Clock`] produces [`Timestamp`]s ordered by `(millis, counter, node)`.
//! Every timestamp a clock hands out is greater than anything it produced or
//! observed before, even when wall clocks disagree.
//!
//! ### Messages
//!
//! A [`Message`] is `(dataset, row, column, value, timestamp)`. The current
//! value of a cell is the value of its newest message. Rows are deleted by
//! setting the reserved `tombstone` column.
//!
//! ### Merkle Trie
//!
//! [`MerkleTrie`] buckets message timestamps by minute and hashes them
//! upward. Two replicas compare hashes top-down and only descend where they
//! differ.
//!
//! ### Replica and Sync
//!
//! [`Replica`] applies batches to the [`MessageLog`] and writes winners to a
//! [`Storage`] collaborator. [`SyncSession`] runs the exchange with a peer
//! over a [`Transport`].
//!
//! ## Quick Start
//!
//! ```rust
//! use converge_engine::{Clock, ClockConfig, MemoryStorage, Replica};
//! use serde_json::json;
//!
//! let clock = Clock::new("0123456789abcdef", ClockConfig::default()).unwrap();
//! let mut replica = Replica::new(clock, MemoryStorage::new());
//!
//! let fields = json!({"name": "Checking", "balance": 100});
//! let id = replica
//!     .insert_row("accounts", fields.as_object().unwrap(), 1_704_067_200_000)
//!     .unwrap();
//!
//! let row = replica.storage().get_row("accounts", &id).unwrap();
//! assert_eq!(row.get("name"), Some(&json!("Checking")));
//! ```
//!
//! ## Persistence
//!
//! Use [`Replica::export_state`] and [`Replica::import_state`] with
//! [`ReplicaSnapshot`]. The clock alone persists as a token through
//! [`Clock::serialize`].

pub mod clock;
pub mod error;
pub mod log;
pub mod merge;
pub mod merkle;
pub mod message;
pub mod row;
pub mod snapshot;
pub mod storage;
pub mod sync;

// Re-export main types at crate root
pub use clock::{Clock, ClockConfig, ClockSkew, ClockState, SkewSource, Timestamp};
pub use error::{Error, Result};
pub use log::{AppendResult, MessageLog};
pub use merge::{ApplyReport, Replica};
pub use merkle::{BucketKey, Comparison, MerkleTrie, NodeSummary};
pub use message::{CellKey, Change, Message, RawMessage, TOMBSTONE_COLUMN};
pub use row::Row;
pub use snapshot::{ReplicaSnapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};
pub use storage::{MemoryStorage, QueryBuilder, Storage, StorageError, Table};
pub use sync::{
    shared, CancellationToken, ExchangeRequest, LocalTransport, SharedReplica, SyncConfig,
    SyncReport, SyncSession, Transport, TransportError,
};

/// Type aliases for clarity
pub type NodeId = String;
pub type Millis = u64;
pub type Dataset = String;
pub type RowId = String;
pub type ColumnName = String;
