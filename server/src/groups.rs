//! Sync groups hosted by this server.
//!
//! Each group is a replica of its own: a message log and trie shared by every
//! client that syncs against it. The hub never writes cells of its own, so the
//! replica's storage is only the in-memory materialized view.

use converge_engine::clock::system_now;
use converge_engine::{shared, Clock, ClockConfig, MemoryStorage, Replica, SharedReplica};
use dashmap::DashMap;

use crate::db::{self, Pool};
use crate::error::{AppError, Result};

/// A group's replica.
pub type GroupReplica = SharedReplica<MemoryStorage>;

/// Longest accepted group id.
pub const MAX_GROUP_ID_LEN: usize = 64;

/// Check that a group id is usable as a path segment and database key.
pub fn validate_group_id(group_id: &str) -> Result<()> {
    let valid = !group_id.is_empty()
        && group_id.len() <= MAX_GROUP_ID_LEN
        && group_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid group id '{}'", group_id)))
    }
}

/// Loaded groups, keyed by group id.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: DashMap<String, GroupReplica>,
    clock_config: ClockConfig,
}

impl GroupRegistry {
    pub fn new(clock_config: ClockConfig) -> Self {
        Self {
            groups: DashMap::new(),
            clock_config,
        }
    }

    /// A group already held in memory.
    pub fn get(&self, group_id: &str) -> Option<GroupReplica> {
        self.groups.get(group_id).map(|r| r.value().clone())
    }

    /// Hold a replica for a group. An existing replica wins over `replica`.
    pub fn insert(&self, group_id: &str, replica: Replica<MemoryStorage>) -> GroupReplica {
        self.groups
            .entry(group_id.to_string())
            .or_insert_with(|| shared(replica))
            .value()
            .clone()
    }

    /// Drop a group from memory so the next request reloads it.
    pub fn evict(&self, group_id: &str) {
        if self.groups.remove(group_id).is_some() {
            tracing::warn!(group = %group_id, "evicted sync group");
        }
    }

    /// Number of groups held in memory.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Get a group, loading it from the database on first use.
    ///
    /// A group without a stored clock is created with a fresh node id. When
    /// two loads race to create a group, both adopt the clock that was
    /// stored first.
    pub async fn load_or_create(&self, pool: &Pool, group_id: &str) -> Result<GroupReplica> {
        validate_group_id(group_id)?;
        if let Some(replica) = self.get(group_id) {
            return Ok(replica);
        }

        let clock = match db::load_clock(pool, group_id).await? {
            Some(token) => Clock::deserialize(&token, self.clock_config)?,
            None => {
                let fresh = Clock::fresh(self.clock_config);
                let token = db::claim_clock(pool, group_id, &fresh).await?;
                let clock = Clock::deserialize(&token, self.clock_config)?;
                if clock.node_id() == fresh.node_id() {
                    tracing::info!(
                        group = %group_id,
                        node = %clock.node_id(),
                        "created sync group"
                    );
                }
                clock
            }
        };

        let stored = db::load_messages(pool, group_id).await?;
        let messages = stored
            .iter()
            .map(|m| m.to_message())
            .collect::<converge_engine::Result<Vec<_>>>()
            .map_err(|e| AppError::Internal(format!("stored message unreadable: {}", e)))?;

        let mut replica = Replica::new(clock, MemoryStorage::new());
        let report = replica.apply(messages, system_now())?;
        tracing::info!(
            group = %group_id,
            messages = report.applied,
            root_hash = replica.log().trie().hash(),
            "loaded sync group"
        );

        Ok(self.insert(group_id, replica))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_ids() {
        assert!(validate_group_id("budget-2024_household").is_ok());
        assert!(validate_group_id("").is_err());
        assert!(validate_group_id("a/b").is_err());
        assert!(validate_group_id(&"x".repeat(MAX_GROUP_ID_LEN + 1)).is_err());
    }

    #[test]
    fn first_insert_wins() {
        let registry = GroupRegistry::new(ClockConfig::default());
        let first = Replica::fresh(MemoryStorage::new(), ClockConfig::default());
        let first_node = first.node_id().to_string();

        registry.insert("g1", first);
        let second = Replica::fresh(MemoryStorage::new(), ClockConfig::default());
        let held = registry.insert("g1", second);

        assert_eq!(held.lock().node_id(), first_node);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("g2").is_none());

        registry.evict("g1");
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a scratch Postgres"]
    async fn concurrent_first_loads_share_one_clock() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = db::create_pool(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let group = format!("race-{}", uuid::Uuid::new_v4().simple());

        let left = GroupRegistry::new(ClockConfig::default());
        let right = GroupRegistry::new(ClockConfig::default());
        let (a, b) = tokio::join!(
            left.load_or_create(&pool, &group),
            right.load_or_create(&pool, &group)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let stored = db::load_clock(&pool, &group).await.unwrap().unwrap();
        let stored = Clock::deserialize(&stored, ClockConfig::default()).unwrap();
        assert_eq!(a.lock().node_id(), stored.node_id());
        assert_eq!(b.lock().node_id(), stored.node_id());
    }
}
