//! The two decision-path caches.
//!
//! Superuser and guest-owner checks run on nearly every permission check,
//! while group membership changes rarely; `GroupMemberCache` trades bounded
//! staleness (fixed TTL, default 60 s) for skipping a group expansion per
//! call. `AnyPermCache` answers "does this operator hold this operation
//! anywhere" for command-listing logic; its answer only changes when grants
//! change, so it is bounded by capacity with no TTL, and the grant/revoke
//! code path must invalidate it explicitly.
//!
//! Both caches are plain values constructed by the caller and injected into
//! the engine, never process-global singletons, so tests can use short TTLs
//! and small capacities deterministically.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::model::{EntityId, OperationCode};

/// Configuration for [`GroupMemberCache`].
#[derive(Debug, Clone)]
pub struct GroupCacheConfig {
    /// How long a cached member set stays valid.
    pub ttl: Duration,
}

impl Default for GroupCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
        }
    }
}

impl GroupCacheConfig {
    /// Sets the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// TTL cache for named-group member sets, keyed by group name.
///
/// Unbounded: in practice it holds one entry per distinct "special" group
/// name ever queried (superuser group, guest-owner groups).
#[derive(Clone)]
pub struct GroupMemberCache {
    cache: Cache<String, Arc<HashSet<EntityId>>>,
    config: GroupCacheConfig,
}

impl std::fmt::Debug for GroupMemberCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupMemberCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl GroupMemberCache {
    /// Creates a new cache with the given configuration.
    pub fn new(config: GroupCacheConfig) -> Self {
        let cache = Cache::builder().time_to_live(config.ttl).build();
        Self { cache, config }
    }

    /// Returns the configuration for this cache.
    pub fn config(&self) -> &GroupCacheConfig {
        &self.config
    }

    /// Retrieves a cached member set.
    pub async fn get(&self, group_name: &str) -> Option<Arc<HashSet<EntityId>>> {
        let result = self.cache.get(group_name).await;
        if result.is_some() {
            metrics::counter!("opgrant_group_cache_hits_total").increment(1);
        } else {
            metrics::counter!("opgrant_group_cache_misses_total").increment(1);
        }
        result
    }

    /// Stores a member set. The entry expires after the configured TTL.
    pub async fn insert(&self, group_name: impl Into<String>, members: Arc<HashSet<EntityId>>) {
        self.cache.insert(group_name.into(), members).await;
    }

    /// Drops a single group's entry, for callers that just mutated that
    /// group's membership and cannot wait out the TTL.
    pub async fn invalidate(&self, group_name: &str) {
        self.cache.invalidate(group_name).await;
    }

    /// Returns the approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance tasks. Useful for testing TTL behavior.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Configuration for [`AnyPermCache`].
#[derive(Debug, Clone)]
pub struct AnyPermCacheConfig {
    /// Maximum number of `(operator, operation)` entries.
    pub max_capacity: u64,
}

impl Default for AnyPermCacheConfig {
    fn default() -> Self {
        Self { max_capacity: 500 }
    }
}

impl AnyPermCacheConfig {
    /// Sets the maximum capacity.
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }
}

/// Bounded cache for "operator holds operation somewhere" answers, keyed by
/// `(operator, operation)`. Least-recently-used entries are evicted once the
/// capacity is reached; entries never expire on their own.
#[derive(Clone)]
pub struct AnyPermCache {
    cache: Cache<(EntityId, OperationCode), bool>,
    config: AnyPermCacheConfig,
}

impl std::fmt::Debug for AnyPermCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyPermCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl AnyPermCache {
    /// Creates a new cache with the given configuration.
    pub fn new(config: AnyPermCacheConfig) -> Self {
        let cache = Cache::builder().max_capacity(config.max_capacity).build();
        Self { cache, config }
    }

    /// Returns the configuration for this cache.
    pub fn config(&self) -> &AnyPermCacheConfig {
        &self.config
    }

    /// Retrieves a cached answer.
    pub async fn get(&self, operator: EntityId, operation: OperationCode) -> Option<bool> {
        let result = self.cache.get(&(operator, operation)).await;
        if result.is_some() {
            metrics::counter!("opgrant_any_perm_cache_hits_total").increment(1);
        } else {
            metrics::counter!("opgrant_any_perm_cache_misses_total").increment(1);
        }
        result
    }

    /// Stores an answer.
    pub async fn insert(&self, operator: EntityId, operation: OperationCode, held: bool) {
        self.cache.insert((operator, operation), held).await;
    }

    /// Empties the cache. Called from the grant/revoke code path; the cached
    /// answers are stale the moment a role row changes.
    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Returns the approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance tasks. Useful for testing capacity behavior.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Registers cache metric descriptions with the metrics recorder. Optional;
/// call once during process startup.
pub fn register_cache_metrics() {
    metrics::describe_counter!(
        "opgrant_group_cache_hits_total",
        "Total number of group-membership cache hits"
    );
    metrics::describe_counter!(
        "opgrant_group_cache_misses_total",
        "Total number of group-membership cache misses"
    );
    metrics::describe_counter!(
        "opgrant_any_perm_cache_hits_total",
        "Total number of operation-anywhere cache hits"
    );
    metrics::describe_counter!(
        "opgrant_any_perm_cache_misses_total",
        "Total number of operation-anywhere cache misses"
    );
}
