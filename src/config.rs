//! Configuration for the inventory system components.
//!
//! Each component carries its own config struct with defaults matching the
//! original deployment constants. Redis connectivity is taken from the
//! `REDIS_URL` environment variable when not set explicitly.

use std::time::Duration;

/// Local (per-process) cache tier configuration.
#[derive(Debug, Clone, Copy)]
pub struct LocalCacheConfig {
    /// Max entries before LRU eviction.
    pub max_capacity: u64,
    /// Fixed TTL for every entry; also the staleness backstop for missed
    /// invalidations.
    pub time_to_live: Duration,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100,
            time_to_live: Duration::from_secs(60),
        }
    }
}

/// Distributed lock budgets.
#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    /// Max time a caller queues for the lock before `LockTimeout`.
    pub wait: Duration,
    /// Max time a holder keeps the lock before automatic lease expiry.
    pub lease: Duration,
    /// Polling interval while queueing.
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(5),
            lease: Duration::from_secs(10),
            retry_interval: Duration::from_millis(50),
        }
    }
}

/// Top-level configuration for [`crate::InventorySystem`].
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    pub local_cache: LocalCacheConfig,
    /// TTL for distributed-tier entries, enforced by the cache backend itself.
    /// Longer than the local TTL so the shared tier absorbs fleet-wide reads.
    pub distributed_ttl: Duration,
    pub lock: LockConfig,
    /// Pub/Sub fanout channel for invalidation events.
    pub invalidation_channel: String,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            local_cache: LocalCacheConfig::default(),
            distributed_ttl: Duration::from_secs(600),
            lock: LockConfig::default(),
            invalidation_channel: "product:invalidate".to_string(),
        }
    }
}

/// Redis URL from environment, defaulting to a local instance.
#[must_use]
pub fn redis_url_from_env() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_keep_local_ttl_below_distributed() {
        let config = InventoryConfig::default();
        assert!(config.local_cache.time_to_live < config.distributed_ttl);
        assert!(config.lock.retry_interval < config.lock.wait);
    }
}
