//! Stockroom
//!
//! Tiered caching, distributed locking, and cache-invalidation core for a
//! horizontally-scaled inventory service:
//! - **Local tier**: per-process Moka cache, size- and time-bounded
//! - **Distributed tier**: Redis cache shared by the fleet, longer TTL
//! - **Lock manager**: per-record lease locks (`SET NX PX`) serializing stock
//!   mutation fleet-wide, with bounded wait and crash-safe lease expiry
//! - **Invalidation bus**: Pub/Sub fanout evicting every instance's local
//!   entry after a committed mutation
//! - **Product service**: read-through caching plus the lock-guarded
//!   purchase state machine (no overselling under any concurrency)
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use stockroom::{InventorySystem, NewProduct};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Redis connection is configured via REDIS_URL.
//!     let system = InventorySystem::new().await?;
//!     let service = system.service();
//!
//!     let id = service
//!         .create_product(NewProduct::new("PS5", 2800.0, 10))
//!         .await?;
//!
//!     // Local tier first, then Redis, then the store.
//!     if let Some(product) = service.get_product(id).await? {
//!         tracing::info!(stock = product.stock, "loaded");
//!     }
//!
//!     // Serialized fleet-wide by the per-record lock.
//!     let updated = service.buy_product(id, 1).await?;
//!     assert_eq!(updated.stock, 9);
//!
//!     system.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! get_product  → Local (Moka) → Distributed (Redis) → Store
//!                ↓ hit           ↓ hit                 ↓ hit
//!                return          promote to local      fill both tiers
//!
//! buy_product  → acquire lock → load from store → validate → commit
//!              → evict distributed → publish invalidation → release lock
//! ```
//!
//! A committed purchase reaches every instance's local tier via the fanout
//! bus; a lost event is corrected when the local TTL expires (bounded
//! staleness, not a bug).

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub mod backends;
pub mod builder;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod product;
pub mod service;
pub mod store;
pub mod traits;

pub use backends::{
    DistributedTier, LocalTier, MemoryBus, MemoryDistributedCache, MemoryLockManager,
    MokaLocalCache, RedisCache, RedisLockManager,
};
pub use builder::InventorySystemBuilder;
pub use config::{InventoryConfig, LocalCacheConfig, LockConfig};
pub use error::{InventoryError, StoreError};
pub use invalidation::{BusStats, InvalidationEvent, RedisInvalidationBus};
pub use product::{NewProduct, Product, ProductId};
pub use service::{ProductService, ServiceStats};
pub use store::{MemoryStore, ProductStore, StoreTransaction};
pub use traits::{
    BusSubscription, DistributedCacheBackend, InvalidationBusBackend, InvalidationHandler,
    LocalCacheBackend, LockBackend, LockToken,
};

// Re-export async_trait for custom backend implementations.
pub use async_trait::async_trait;

/// Main entry point: the wired service plus this instance's invalidation
/// subscription.
///
/// Construct via [`InventorySystem::new`] for the Redis-backed defaults or
/// [`InventorySystemBuilder`] to inject custom backends.
pub struct InventorySystem {
    pub(crate) service: Arc<ProductService>,
    pub(crate) distributed: Arc<dyn DistributedCacheBackend>,
    pub(crate) subscription: BusSubscription,
}

impl InventorySystem {
    /// Build with default backends.
    ///
    /// Redis connection is configured via the `REDIS_URL` environment
    /// variable (default `redis://127.0.0.1:6379`); the store defaults to the
    /// in-memory implementation.
    ///
    /// # Errors
    ///
    /// Returns an error if a Redis-backed component cannot connect.
    pub async fn new() -> Result<Self> {
        InventorySystemBuilder::new().build().await
    }

    /// Build with default backends against a specific Redis URL.
    ///
    /// # Errors
    ///
    /// Returns an error if a Redis-backed component cannot connect.
    pub async fn with_redis_url(redis_url: &str) -> Result<Self> {
        InventorySystemBuilder::new()
            .with_redis_url(redis_url)
            .build()
            .await
    }

    /// The product service (primary interface).
    #[must_use]
    pub fn service(&self) -> &Arc<ProductService> {
        &self.service
    }

    /// Probe the distributed tier.
    ///
    /// The local tier needs no probe and a distributed-tier outage degrades
    /// reads rather than failing them, so this reports reachability only.
    pub async fn health_check(&self) -> bool {
        let distributed_ok = self.distributed.health_check().await;
        if distributed_ok {
            info!("Inventory system health check passed");
        } else {
            warn!("Distributed cache tier unreachable, reads degrade to the store");
        }
        distributed_ok
    }

    /// Stop this instance's invalidation subscription and wait for it to
    /// finish. Sibling instances sharing the same bus are unaffected.
    pub async fn shutdown(self) {
        self.subscription.stop().await;
    }
}
