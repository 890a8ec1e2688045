//! Moka-based local cache tier.
//!
//! Per-process hot tier for recently read products: bounded entry count with
//! LRU eviction and a fixed TTL. The TTL doubles as the staleness backstop
//! when an invalidation event is lost.

use async_trait::async_trait;
use moka::future::Cache;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::LocalCacheConfig;
use crate::product::{Product, ProductId};
use crate::traits::LocalCacheBackend;

/// Cached snapshot with its insertion-time expiry.
#[derive(Debug, Clone)]
struct CacheEntry {
    product: Product,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(product: Product, ttl: Duration) -> Self {
        Self {
            product,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Local tier backed by Moka.
///
/// Expiry is tracked per entry and double-enforced by the Moka builder TTL, so
/// an entry past its TTL reads as a miss even before Moka evicts it.
pub struct MokaLocalCache {
    cache: Cache<ProductId, CacheEntry>,
    ttl: Duration,
}

impl MokaLocalCache {
    #[must_use]
    pub fn new(config: LocalCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.time_to_live)
            .build();

        info!(
            capacity = config.max_capacity,
            ttl_secs = config.time_to_live.as_secs_f64(),
            "Local cache (Moka) initialized"
        );

        Self {
            cache,
            ttl: config.time_to_live,
        }
    }

    /// Current entry count (approximate, per Moka semantics).
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MokaLocalCache {
    fn default() -> Self {
        Self::new(LocalCacheConfig::default())
    }
}

#[async_trait]
impl LocalCacheBackend for MokaLocalCache {
    async fn get(&self, id: ProductId) -> Option<Product> {
        let entry = self.cache.get(&id).await?;
        if entry.is_expired() {
            self.cache.remove(&id).await;
            return None;
        }
        Some(entry.product)
    }

    async fn put(&self, id: ProductId, product: Product) {
        let entry = CacheEntry::new(product, self.ttl);
        self.cache.insert(id, entry).await;
        debug!(id, ttl_secs = self.ttl.as_secs_f64(), "[Local] Cached product");
    }

    async fn invalidate(&self, id: ProductId) {
        self.cache.invalidate(&id).await;
        debug!(id, "[Local] Evicted product");
    }

    fn name(&self) -> &'static str {
        "Moka"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: ProductId) -> Product {
        Product {
            id,
            name: format!("Product {id}"),
            price: 9.99,
            stock: 10,
        }
    }

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let cache = MokaLocalCache::default();
        cache.put(1, sample(1)).await;
        assert_eq!(cache.get(1).await, Some(sample(1)));

        cache.invalidate(1).await;
        assert_eq!(cache.get(1).await, None);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache = MokaLocalCache::new(LocalCacheConfig {
            max_capacity: 10,
            time_to_live: Duration::from_millis(50),
        });
        cache.put(1, sample(1)).await;
        assert!(cache.get(1).await.is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get(1).await, None, "expired entry must read as a miss");
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let cache = MokaLocalCache::new(LocalCacheConfig {
            max_capacity: 5,
            time_to_live: Duration::from_secs(60),
        });
        for id in 0..50 {
            cache.put(id, sample(id)).await;
        }
        // Moka applies eviction asynchronously; run its pending tasks first.
        cache.cache.run_pending_tasks().await;
        assert!(cache.entry_count() <= 5);
    }
}
