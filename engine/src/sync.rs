//! Sync sessions between two replicas.
//!
//! A session compares the local trie against a peer's, one level at a time,
//! until it has the set of buckets whose message sets differ. For each
//! bucket it fetches the peer's timestamps, sends only the messages the peer
//! lacks and asks only for the ones it lacks, then applies what comes back.
//! Rounds repeat until both roots agree.
//!
//! The replica is locked only to read the trie or bucket contents and to
//! apply a received batch. No lock is held while waiting on the transport,
//! so local writes keep flowing during a session.

use crate::merkle::{compare_nodes, BucketKey, Comparison, MerkleTrie, NodeSummary};
use crate::merge::Replica;
use crate::storage::Storage;
use crate::{clock::system_now, error::Result, Error, Message, Millis, Timestamp};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A replica shared between local writers and sync sessions.
pub type SharedReplica<S> = Arc<Mutex<Replica<S>>>;

/// Wrap a replica for sharing.
pub fn shared<S>(replica: Replica<S>) -> SharedReplica<S> {
    Arc::new(Mutex::new(replica))
}

/// Errors reported by a transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Worth retrying: timeouts, dropped connections, overloaded peers.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Retrying will not help: rejected credentials, protocol mismatch.
    #[error("fatal transport error: {0}")]
    Fatal(String),
}

/// Messages for one bucket, plus the timestamps the sender wants back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub bucket: BucketKey,
    /// Messages the peer is missing
    pub messages: Vec<Message>,
    /// Timestamps the sender is missing
    pub want: Vec<Timestamp>,
}

/// Network layer carrying trie summaries and message batches to a peer.
///
/// Delivery must be at-least-once; applying is idempotent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The peer's summary of one trie node.
    async fn exchange_trie_node(&self, key: &BucketKey) -> Result<NodeSummary, TransportError>;

    /// Timestamps of every message the peer holds in a bucket.
    async fn bucket_timestamps(&self, key: &BucketKey) -> Result<Vec<Timestamp>, TransportError>;

    /// Deliver messages for a bucket and receive the ones asked for.
    async fn exchange_messages(
        &self,
        request: &ExchangeRequest,
    ) -> Result<Vec<Message>, TransportError>;
}

/// Sync session tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Retries per transport call before abandoning the session
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on the delay between retries
    pub max_backoff: Duration,
    /// Trie node requests in flight at once
    pub concurrency: usize,
    /// Compare/exchange rounds before giving up on convergence
    pub max_rounds: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            concurrency: 8,
            max_rounds: 4,
        }
    }
}

/// Cooperative cancellation for a running session.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// What a session did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Exchange rounds performed
    pub rounds: u32,
    /// Trie node summaries fetched from the peer
    pub node_requests: usize,
    /// Buckets exchanged
    pub buckets: usize,
    /// Messages sent to the peer
    pub sent: usize,
    /// Messages received from the peer
    pub received: usize,
    /// Received messages that were new locally
    pub applied: usize,
    /// Whether both roots matched at the end
    pub converged: bool,
}

impl SyncReport {
    /// Messages moved in either direction.
    pub fn transferred(&self) -> usize {
        self.sent + self.received
    }
}

/// One sync session against one peer.
pub struct SyncSession<S, T> {
    replica: SharedReplica<S>,
    transport: T,
    config: SyncConfig,
    cancel: CancellationToken,
    now: fn() -> Millis,
}

impl<S, T> SyncSession<S, T>
where
    S: Storage + Send,
    T: Transport,
{
    pub fn new(replica: SharedReplica<S>, transport: T, config: SyncConfig) -> Self {
        Self {
            replica,
            transport,
            config,
            cancel: CancellationToken::new(),
            now: system_now,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Override the wall clock used when applying received messages.
    pub fn with_time_source(mut self, now: fn() -> Millis) -> Self {
        self.now = now;
        self
    }

    /// Run rounds until both tries agree or `max_rounds` is reached.
    pub async fn run(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let root = BucketKey::root();

        loop {
            let local = self.replica.lock().trie();
            let remote = self.remote_node(&root).await?;
            report.node_requests += 1;

            let comparison = compare_nodes(&root, &local.summary(&root), &remote);
            if comparison == Comparison::Equal {
                report.converged = true;
                break;
            }
            if report.rounds >= self.config.max_rounds {
                tracing::warn!(
                    rounds = report.rounds,
                    "sync did not converge within round limit"
                );
                break;
            }
            report.rounds += 1;

            let buckets = self.localize(&local, remote, &mut report).await?;
            tracing::debug!(
                round = report.rounds,
                buckets = buckets.len(),
                "localized divergent buckets"
            );
            for bucket in &buckets {
                self.exchange_bucket(bucket, &mut report).await?;
            }
            report.buckets += buckets.len();
        }

        tracing::info!(
            rounds = report.rounds,
            sent = report.sent,
            received = report.received,
            applied = report.applied,
            converged = report.converged,
            "sync session finished"
        );
        Ok(report)
    }

    /// Walk the trie level by level, collecting divergent buckets.
    async fn localize(
        &self,
        local: &MerkleTrie,
        remote_root: NodeSummary,
        report: &mut SyncReport,
    ) -> Result<BTreeSet<BucketKey>> {
        let mut buckets = BTreeSet::new();
        let mut frontier = vec![(BucketKey::root(), remote_root)];

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for (key, remote) in frontier {
                match compare_nodes(&key, &local.summary(&key), &remote) {
                    Comparison::Equal => {}
                    Comparison::Bucket => {
                        buckets.insert(key);
                    }
                    Comparison::Descend(digits) => {
                        next.extend(digits.into_iter().map(|d| key.child(d)));
                    }
                }
            }

            report.node_requests += next.len();
            frontier = stream::iter(next)
                .map(|key| async move {
                    let summary = self.remote_node(&key).await?;
                    Ok::<_, Error>((key, summary))
                })
                .buffer_unordered(self.config.concurrency.max(1))
                .try_collect()
                .await?;
        }

        Ok(buckets)
    }

    async fn exchange_bucket(&self, bucket: &BucketKey, report: &mut SyncReport) -> Result<()> {
        let transport = &self.transport;
        let remote: BTreeSet<Timestamp> = self
            .with_retry("bucket_timestamps", move || transport.bucket_timestamps(bucket))
            .await?
            .into_iter()
            .collect();

        let request = {
            let replica = self.replica.lock();
            let messages: Vec<Message> = replica
                .log()
                .in_bucket(bucket)
                .filter(|m| !remote.contains(&m.timestamp))
                .cloned()
                .collect();
            let want: Vec<Timestamp> = remote
                .iter()
                .filter(|ts| !replica.log().contains(ts))
                .cloned()
                .collect();
            ExchangeRequest {
                bucket: bucket.clone(),
                messages,
                want,
            }
        };
        if request.messages.is_empty() && request.want.is_empty() {
            return Ok(());
        }

        let request = &request;
        let received = self
            .with_retry("exchange_messages", move || transport.exchange_messages(request))
            .await?;
        report.sent += request.messages.len();
        report.received += received.len();

        if !received.is_empty() {
            let applied = self.replica.lock().apply(received, (self.now)())?;
            report.applied += applied.applied;
        }

        tracing::trace!(
            bucket = %bucket,
            sent = request.messages.len(),
            wanted = request.want.len(),
            "exchanged bucket"
        );
        Ok(())
    }

    async fn remote_node(&self, key: &BucketKey) -> Result<NodeSummary> {
        let transport = &self.transport;
        self.with_retry("exchange_trie_node", move || transport.exchange_trie_node(key))
            .await
    }

    /// Run a transport call, retrying transient failures with exponential
    /// backoff.
    async fn with_retry<R, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let mut backoff = self.config.initial_backoff;
        let mut attempts = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(operation, "sync cancelled");
                return Err(Error::Cancelled);
            }
            attempts += 1;

            match call().await {
                Ok(value) => return Ok(value),
                Err(err @ TransportError::Fatal(_)) => return Err(err.into()),
                Err(err) if attempts > self.config.max_retries => {
                    tracing::warn!(operation, attempts, error = %err, "giving up on peer");
                    return Err(Error::SyncAbandoned {
                        attempts,
                        last_error: err,
                    });
                }
                Err(err) => {
                    tracing::debug!(
                        operation,
                        attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transport call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
            }
        }
    }
}

/// Transport to another replica in the same process.
pub struct LocalTransport<S> {
    peer: SharedReplica<S>,
    now: fn() -> Millis,
}

impl<S> LocalTransport<S> {
    pub fn new(peer: SharedReplica<S>) -> Self {
        Self {
            peer,
            now: system_now,
        }
    }

    pub fn with_time_source(mut self, now: fn() -> Millis) -> Self {
        self.now = now;
        self
    }
}

#[async_trait]
impl<S> Transport for LocalTransport<S>
where
    S: Storage + Send + 'static,
{
    async fn exchange_trie_node(&self, key: &BucketKey) -> Result<NodeSummary, TransportError> {
        Ok(self.peer.lock().node_summary(key))
    }

    async fn bucket_timestamps(&self, key: &BucketKey) -> Result<Vec<Timestamp>, TransportError> {
        Ok(self.peer.lock().bucket_timestamps(key))
    }

    async fn exchange_messages(
        &self,
        request: &ExchangeRequest,
    ) -> Result<Vec<Message>, TransportError> {
        self.peer
            .lock()
            .exchange(request.clone(), (self.now)())
            .map_err(|err| match err {
                Error::Storage(_) => TransportError::Transient(err.to_string()),
                _ => TransportError::Fatal(err.to_string()),
            })
    }
}
