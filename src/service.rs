//! Product service - tiered reads and lock-guarded stock mutation.
//!
//! Read path: local tier → distributed tier → store, populating tiers on the
//! way back, with per-key request coalescing so one process issues at most one
//! concurrent lookup per missing key.
//!
//! Purchase path: per-record distributed lock, authoritative store read inside
//! an explicit transaction (never a cache tier), then the fixed sequence
//! store-write → distributed-delete → publish → lock-release. The lock is
//! released on every exit path; eviction or publish failures never roll back a
//! committed purchase.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::InventoryConfig;
use crate::error::InventoryError;
use crate::invalidation::InvalidationEvent;
use crate::product::{NewProduct, Product, ProductId, cache_key, lock_key};
use crate::store::ProductStore;
use crate::traits::{
    DistributedCacheBackend, InvalidationBusBackend, LocalCacheBackend, LockBackend,
};

/// RAII cleanup for the in-flight request map: the entry is removed even on
/// early return or panic.
struct CleanupGuard<'a> {
    map: &'a DashMap<ProductId, Arc<Mutex<()>>>,
    key: ProductId,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

#[derive(Debug, Default)]
struct AtomicServiceStats {
    total_reads: AtomicU64,
    local_hits: AtomicU64,
    distributed_hits: AtomicU64,
    store_loads: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    lock_timeouts: AtomicU64,
    purchases_committed: AtomicU64,
    purchases_aborted: AtomicU64,
    invalidations_published: AtomicU64,
    invalidations_received: AtomicU64,
}

/// Snapshot of service activity.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceStats {
    pub total_reads: u64,
    pub local_hits: u64,
    pub distributed_hits: u64,
    /// Reads that fell through both tiers to the store.
    pub store_loads: u64,
    /// Reads that found nothing anywhere (nothing is cached for these).
    pub misses: u64,
    /// Distributed hits promoted into the local tier.
    pub promotions: u64,
    pub lock_timeouts: u64,
    pub purchases_committed: u64,
    pub purchases_aborted: u64,
    pub invalidations_published: u64,
    pub invalidations_received: u64,
}

impl AtomicServiceStats {
    fn snapshot(&self) -> ServiceStats {
        ServiceStats {
            total_reads: self.total_reads.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            store_loads: self.store_loads.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            purchases_committed: self.purchases_committed.load(Ordering::Relaxed),
            purchases_aborted: self.purchases_aborted.load(Ordering::Relaxed),
            invalidations_published: self.invalidations_published.load(Ordering::Relaxed),
            invalidations_received: self.invalidations_received.load(Ordering::Relaxed),
        }
    }
}

/// Orchestrator composing the cache tiers, lock manager, invalidation bus, and
/// persistent store.
///
/// All collaborators are injected; the service holds no global state. One
/// instance per process, shared behind `Arc`.
pub struct ProductService {
    local: Arc<dyn LocalCacheBackend>,
    distributed: Arc<dyn DistributedCacheBackend>,
    lock: Arc<dyn LockBackend>,
    bus: Arc<dyn InvalidationBusBackend>,
    store: Arc<dyn ProductStore>,
    config: InventoryConfig,
    stats: AtomicServiceStats,
    /// Coalesces concurrent lookups for the same missing key.
    in_flight: DashMap<ProductId, Arc<Mutex<()>>>,
}

impl ProductService {
    pub fn new(
        local: Arc<dyn LocalCacheBackend>,
        distributed: Arc<dyn DistributedCacheBackend>,
        lock: Arc<dyn LockBackend>,
        bus: Arc<dyn InvalidationBusBackend>,
        store: Arc<dyn ProductStore>,
        config: InventoryConfig,
    ) -> Self {
        Self {
            local,
            distributed,
            lock,
            bus,
            store,
            config,
            stats: AtomicServiceStats::default(),
            in_flight: DashMap::new(),
        }
    }

    /// Validate and persist a new product; the store assigns the id.
    ///
    /// Caches are not populated on create - the first read does that.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for negative price/stock or an empty name; `Store` if
    /// persistence fails.
    pub async fn create_product(&self, request: NewProduct) -> Result<ProductId, InventoryError> {
        if request.name.trim().is_empty() {
            return Err(InventoryError::InvalidInput("name must not be empty".into()));
        }
        if !request.price.is_finite() || request.price < 0.0 {
            return Err(InventoryError::InvalidInput(
                "price must be non-negative".into(),
            ));
        }
        if request.stock < 0 {
            return Err(InventoryError::InvalidInput(
                "stock must be non-negative".into(),
            ));
        }

        let product = Product::new(request.name, request.price, request.stock);
        let saved = self.store.save(product).await?;
        info!(id = saved.id, "Product created");
        Ok(saved.id)
    }

    /// Tiered read: local → distributed (with promotion) → store.
    ///
    /// Store misses are never cached. A cache-backend failure on any tier
    /// behaves as a miss; only a store failure surfaces as an error.
    ///
    /// # Errors
    ///
    /// `Store` when both tiers miss and the store is unavailable.
    pub async fn get_product(&self, id: ProductId) -> Result<Option<Product>, InventoryError> {
        self.stats.total_reads.fetch_add(1, Ordering::Relaxed);

        // Fast path, no coalescing needed.
        if let Some(product) = self.local.get(id).await {
            self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            debug!(id, "Cache hit (local)");
            return Ok(Some(product));
        }

        // Local miss: coalesce concurrent lookups for this key.
        let gate = self
            .in_flight
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;
        let _cleanup = CleanupGuard {
            map: &self.in_flight,
            key: id,
        };

        // Another request may have populated the local tier while we queued.
        if let Some(product) = self.local.get(id).await {
            self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            debug!(id, "Cache hit (local, after coalescing)");
            return Ok(Some(product));
        }

        let key = cache_key(id);
        if let Some(bytes) = self.distributed.get(&key).await {
            match serde_json::from_slice::<Product>(&bytes) {
                Ok(product) => {
                    self.stats.distributed_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(id, "Cache hit (distributed), promoting to local");
                    self.local.put(id, product.clone()).await;
                    self.stats.promotions.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(product));
                }
                Err(e) => {
                    warn!(id, error = %e, "Corrupt distributed entry, treating as miss");
                }
            }
        }

        debug!(id, "Cache miss (both tiers), loading from store");
        self.stats.store_loads.fetch_add(1, Ordering::Relaxed);
        let Some(product) = self.store.load(id).await? else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        // Populate both tiers on the way back; failures degrade, the read
        // already succeeded.
        match serde_json::to_vec(&product) {
            Ok(bytes) => {
                if let Err(e) = self
                    .distributed
                    .set_with_ttl(&key, &bytes, self.config.distributed_ttl)
                    .await
                {
                    warn!(id, error = %e, "Failed to populate distributed tier");
                }
            }
            Err(e) => warn!(id, error = %e, "Failed to serialize product for caching"),
        }
        self.local.put(id, product.clone()).await;

        Ok(Some(product))
    }

    /// Lock-guarded stock decrement.
    ///
    /// State machine `Idle → LockAcquired → Validated → {Committed | Aborted}
    /// → Released`; the lock is released on every path out. Returns the
    /// updated record on success.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a non-positive quantity, `LockTimeout` when the wait
    /// budget elapses, `NotFound` when the store has no such record,
    /// `InsufficientStock` when validation fails, `Store` on persistence
    /// failure.
    pub async fn buy_product(
        &self,
        id: ProductId,
        quantity: i64,
    ) -> Result<Product, InventoryError> {
        if quantity < 1 {
            return Err(InventoryError::InvalidInput(
                "quantity must be at least 1".into(),
            ));
        }

        let key = lock_key(id);
        let lock_config = self.config.lock;
        let token = self
            .lock
            .try_acquire(&key, lock_config.wait, lock_config.lease)
            .await
            .map_err(|e| InventoryError::Lock(e.to_string()))?;

        let Some(token) = token else {
            self.stats.lock_timeouts.fetch_add(1, Ordering::Relaxed);
            info!(id, "Lock wait budget exhausted");
            return Err(InventoryError::LockTimeout);
        };
        debug!(id, "Lock acquired");

        let outcome = self.buy_locked(id, quantity).await;

        // Unconditional release; a failure here is reclaimed by lease expiry.
        if let Err(e) = self.lock.release(&key, &token).await {
            warn!(id, error = %e, "Lock release failed, lease expiry will reclaim it");
        }

        outcome
    }

    /// Validate-commit sequence executed while the lock is held.
    async fn buy_locked(&self, id: ProductId, quantity: i64) -> Result<Product, InventoryError> {
        // Authoritative read inside an explicit transaction - never a cache
        // tier, since any cached copy may predate the current lock holder.
        let mut txn = self.store.begin().await?;

        let Some(mut product) = txn.load(id).await? else {
            // Nothing was written; a rollback failure must not mask the
            // outcome.
            if let Err(e) = txn.rollback().await {
                warn!(id, error = %e, "Rollback failed on missing record");
            }
            return Err(InventoryError::NotFound);
        };

        if quantity > product.stock {
            if let Err(e) = txn.rollback().await {
                warn!(id, error = %e, "Rollback failed on aborted purchase");
            }
            self.stats.purchases_aborted.fetch_add(1, Ordering::Relaxed);
            info!(
                id,
                requested = quantity,
                available = product.stock,
                "Purchase aborted, insufficient stock"
            );
            return Err(InventoryError::InsufficientStock {
                requested: quantity,
                available: product.stock,
            });
        }

        product.stock -= quantity;
        let updated = txn.save(product).await?;
        txn.commit().await?;
        self.stats
            .purchases_committed
            .fetch_add(1, Ordering::Relaxed);
        info!(id, quantity, stock = updated.stock, "Purchase committed");

        // Committed: evict the shared tier first, then fan out. Failures are
        // logged only - the stock change is already durable.
        if let Err(e) = self.distributed.remove(&cache_key(id)).await {
            warn!(id, error = %e, "Distributed eviction failed, entry corrects at TTL");
        }
        match self.bus.publish(&InvalidationEvent::evict(id)).await {
            Ok(()) => {
                self.stats
                    .invalidations_published
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(id, error = %e, "Invalidation publish failed, local tiers correct at TTL");
            }
        }

        Ok(updated)
    }

    /// Applies a received invalidation event: evicts the local tier only (the
    /// publisher already removed the distributed entry before publishing).
    pub async fn handle_invalidation(&self, event: &InvalidationEvent) {
        let id = event.product_id();
        self.local.invalidate(id).await;
        self.stats
            .invalidations_received
            .fetch_add(1, Ordering::Relaxed);
        debug!(id, "Invalidation received, local entry evicted");
    }

    /// Snapshot of activity counters.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        self.stats.snapshot()
    }

    /// Configuration the service was built with.
    #[must_use]
    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }
}
