//! In-process backends: distributed cache, lock table, and invalidation bus.
//!
//! These implement the same traits as the Redis-backed defaults using
//! `DashMap` and `tokio::sync::broadcast`, so the whole service can run and be
//! tested in a single process. Sharing one instance of a backend between
//! several services simulates a fleet sharing one Redis.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::invalidation::InvalidationEvent;
use crate::traits::{
    BusSubscription, DistributedCacheBackend, InvalidationBusBackend, InvalidationHandler,
    LockBackend, LockToken,
};

// ===== Distributed cache =====

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Concurrent in-process stand-in for the distributed cache tier.
#[derive(Default)]
pub struct MemoryDistributedCache {
    map: DashMap<String, CacheEntry>,
}

impl MemoryDistributedCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[async_trait]
impl DistributedCacheBackend for MemoryDistributedCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(entry) = self.map.get(key) {
            if entry.is_expired() {
                drop(entry); // Release read lock before removing.
                self.map.remove(key);
                None
            } else {
                Some(entry.value.clone())
            }
        } else {
            None
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.map.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        debug!(key = %key, ttl_secs = %ttl.as_secs_f64(), "[MemoryCache] Cached key with TTL");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "MemoryCache"
    }
}

// ===== Lock manager =====

#[derive(Debug, Clone)]
struct LockHolder {
    token: String,
    expires_at: Instant,
}

const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Concurrent in-process lock table with lease expiry.
///
/// Same contract as the Redis lock manager: at most one live holder per key
/// within a lease, bounded wait, holder-checked idempotent release.
#[derive(Default)]
pub struct MemoryLockManager {
    locks: DashMap<String, LockHolder>,
    retry_interval: Option<Duration>,
}

impl MemoryLockManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the polling interval used while queueing for a lock.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    /// Single atomic acquisition attempt via the entry API.
    fn attempt(&self, key: &str, token: &str, lease: Duration) -> bool {
        use dashmap::mapref::entry::Entry;

        let now = Instant::now();
        let holder = LockHolder {
            token: token.to_string(),
            expires_at: now + lease,
        };

        match self.locks.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(holder);
                true
            }
            Entry::Occupied(mut occupied) => {
                // A lapsed lease makes the key eligible for takeover.
                if occupied.get().expires_at <= now {
                    occupied.insert(holder);
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[async_trait]
impl LockBackend for MemoryLockManager {
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockToken>> {
        let token = Uuid::new_v4().to_string();
        let retry = self.retry_interval.unwrap_or(DEFAULT_LOCK_RETRY_INTERVAL);
        let deadline = Instant::now() + wait;

        loop {
            if self.attempt(key, &token, lease) {
                debug!(key = %key, "[Lock] Acquired");
                return Ok(Some(LockToken::new(token)));
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(key = %key, wait_ms = %wait.as_millis(), "[Lock] Wait budget exhausted");
                return Ok(None);
            }

            tokio::time::sleep(retry.min(deadline - now)).await;
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<()> {
        // Holder-checked, idempotent: removing a foreign or absent entry is a
        // no-op.
        let _ = self
            .locks
            .remove_if(key, |_, holder| holder.token == token.as_str());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

// ===== Invalidation bus =====

const BUS_CAPACITY: usize = 256;

/// In-process fanout bus built on `tokio::sync::broadcast`.
///
/// Every `subscribe` registers one receiver, so a single publish reaches all
/// subscribed services including the publisher, matching the Pub/Sub fanout
/// semantics.
pub struct MemoryBus {
    sender: broadcast::Sender<InvalidationEvent>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvalidationBusBackend for MemoryBus {
    async fn publish(&self, event: &InvalidationEvent) -> Result<()> {
        // No subscribers is not an error for a fire-and-forget fanout.
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    fn subscribe(&self, handler: InvalidationHandler) -> BusSubscription {
        let mut receiver = self.sender.subscribe();
        // Per-subscription shutdown: stopping one instance never touches
        // sibling subscriptions on the same bus.
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = receiver.recv() => {
                        match received {
                            Ok(event) => handler(event).await,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                // Best-effort delivery; skipped events are
                                // corrected by the local TTL backstop.
                                warn!(skipped, "[MemoryBus] Subscriber lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("[MemoryBus] Subscriber shutting down");
                        break;
                    }
                }
            }
        });

        BusSubscription::new(shutdown_tx, task)
    }

    fn name(&self) -> &'static str {
        "MemoryBus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_cache_entry_expires() {
        let cache = MemoryDistributedCache::new();
        cache
            .set_with_ttl("k", b"v", Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty(), "expired entry is dropped on read");
    }

    #[tokio::test]
    async fn test_lock_excludes_second_holder() {
        let locks = MemoryLockManager::new();
        let wait = Duration::from_millis(50);
        let lease = Duration::from_secs(5);

        let first = locks.try_acquire("k", wait, lease).await.unwrap();
        assert!(first.is_some());

        let second = locks.try_acquire("k", wait, lease).await.unwrap();
        assert!(second.is_none(), "held lock must time out the second caller");
    }

    #[tokio::test]
    async fn test_lock_lease_expiry_allows_takeover() {
        let locks = MemoryLockManager::new();
        let first = locks
            .try_acquire("k", Duration::from_millis(20), Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        let second = locks
            .try_acquire("k", Duration::from_millis(20), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(second.is_some(), "lapsed lease must be eligible for takeover");

        // The first holder's release is now a no-op and must not evict the
        // new holder.
        locks.release("k", &first).await.unwrap();
        let third = locks
            .try_acquire("k", Duration::from_millis(20), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(third.is_none());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let locks = MemoryLockManager::new();
        let token = locks
            .try_acquire("k", Duration::from_millis(20), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        locks.release("k", &token).await.unwrap();
        locks.release("k", &token).await.unwrap();

        assert!(
            locks
                .try_acquire("k", Duration::from_millis(20), Duration::from_secs(5))
                .await
                .unwrap()
                .is_some()
        );
    }

    fn counting_handler(count: &Arc<AtomicU64>) -> InvalidationHandler {
        let count = Arc::clone(count);
        Arc::new(move |_event| {
            let count = Arc::clone(&count);
            Box::pin(async move {
                count.fetch_add(1, Ordering::Relaxed);
            })
        })
    }

    #[tokio::test]
    async fn test_bus_fans_out_to_all_subscribers() {
        let bus = MemoryBus::new();
        let count_a = Arc::new(AtomicU64::new(0));
        let count_b = Arc::new(AtomicU64::new(0));

        let _sub_a = bus.subscribe(counting_handler(&count_a));
        let _sub_b = bus.subscribe(counting_handler(&count_b));

        bus.publish(&InvalidationEvent::evict(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count_a.load(Ordering::Relaxed), 1);
        assert_eq!(count_b.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_stopping_one_subscription_leaves_others_live() {
        let bus = MemoryBus::new();
        let count_a = Arc::new(AtomicU64::new(0));
        let count_b = Arc::new(AtomicU64::new(0));

        let sub_a = bus.subscribe(counting_handler(&count_a));
        let _sub_b = bus.subscribe(counting_handler(&count_b));

        sub_a.stop().await;
        bus.publish(&InvalidationEvent::evict(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count_a.load(Ordering::Relaxed), 0, "stopped subscription");
        assert_eq!(count_b.load(Ordering::Relaxed), 1, "sibling stays live");
    }
}
