//! Inventory system builder.
//!
//! Constructs an [`InventorySystem`] with custom backends, store, or
//! configuration. Anything not provided falls back to the defaults: Moka
//! local tier, Redis distributed tier, Redis lease locks, Redis Pub/Sub bus,
//! and the in-memory store.
//!
//! # Example: memory-backed system (no Redis required)
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stockroom::InventorySystemBuilder;
//! use stockroom::backends::{MemoryBus, MemoryDistributedCache, MemoryLockManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let system = InventorySystemBuilder::new()
//!         .with_distributed_cache(Arc::new(MemoryDistributedCache::new()))
//!         .with_lock_manager(Arc::new(MemoryLockManager::new()))
//!         .with_bus(Arc::new(MemoryBus::new()))
//!         .build()
//!         .await?;
//!
//!     let service = system.service();
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::InventorySystem;
use crate::backends::{MokaLocalCache, RedisCache, RedisLockManager};
use crate::config::{InventoryConfig, redis_url_from_env};
use crate::invalidation::RedisInvalidationBus;
use crate::service::ProductService;
use crate::store::{MemoryStore, ProductStore};
use crate::traits::{
    DistributedCacheBackend, InvalidationBusBackend, InvalidationHandler, LocalCacheBackend,
    LockBackend,
};

/// Builder for [`InventorySystem`].
#[derive(Default)]
pub struct InventorySystemBuilder {
    config: Option<InventoryConfig>,
    redis_url: Option<String>,
    local: Option<Arc<dyn LocalCacheBackend>>,
    distributed: Option<Arc<dyn DistributedCacheBackend>>,
    lock: Option<Arc<dyn LockBackend>>,
    bus: Option<Arc<dyn InvalidationBusBackend>>,
    store: Option<Arc<dyn ProductStore>>,
}

impl InventorySystemBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the default configuration.
    #[must_use]
    pub fn with_config(mut self, config: InventoryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Redis URL for any default Redis-backed components.
    /// Falls back to `REDIS_URL`, then `redis://127.0.0.1:6379`.
    #[must_use]
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Custom local (per-process) cache tier.
    #[must_use]
    pub fn with_local_cache(mut self, backend: Arc<dyn LocalCacheBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    /// Custom distributed cache tier.
    #[must_use]
    pub fn with_distributed_cache(mut self, backend: Arc<dyn DistributedCacheBackend>) -> Self {
        self.distributed = Some(backend);
        self
    }

    /// Custom lock manager.
    #[must_use]
    pub fn with_lock_manager(mut self, backend: Arc<dyn LockBackend>) -> Self {
        self.lock = Some(backend);
        self
    }

    /// Custom invalidation bus.
    #[must_use]
    pub fn with_bus(mut self, backend: Arc<dyn InvalidationBusBackend>) -> Self {
        self.bus = Some(backend);
        self
    }

    /// Custom persistent store implementation.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ProductStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the system, wiring defaults for anything not provided and
    /// starting this instance's invalidation subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if a default Redis-backed component cannot connect.
    pub async fn build(self) -> Result<InventorySystem> {
        let config = self.config.unwrap_or_default();
        let redis_url = self.redis_url.unwrap_or_else(redis_url_from_env);

        let local: Arc<dyn LocalCacheBackend> = match self.local {
            Some(backend) => backend,
            None => Arc::new(MokaLocalCache::new(config.local_cache)),
        };

        let distributed: Arc<dyn DistributedCacheBackend> = match self.distributed {
            Some(backend) => backend,
            None => Arc::new(RedisCache::with_url(&redis_url).await?),
        };

        let lock: Arc<dyn LockBackend> = match self.lock {
            Some(backend) => backend,
            None => Arc::new(
                RedisLockManager::with_url(&redis_url)
                    .await?
                    .with_retry_interval(config.lock.retry_interval),
            ),
        };

        let bus: Arc<dyn InvalidationBusBackend> = match self.bus {
            Some(backend) => backend,
            None => Arc::new(
                RedisInvalidationBus::new(&redis_url, config.invalidation_channel.clone()).await?,
            ),
        };

        let store: Arc<dyn ProductStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };

        info!(
            local = local.name(),
            distributed = distributed.name(),
            lock = lock.name(),
            bus = bus.name(),
            store = store.name(),
            "Building inventory system"
        );

        let service = Arc::new(ProductService::new(
            local,
            Arc::clone(&distributed),
            lock,
            Arc::clone(&bus),
            store,
            config,
        ));

        // One ephemeral subscription per instance: every publish, including
        // this instance's own, evicts the local tier.
        let service_for_events = Arc::clone(&service);
        let handler: InvalidationHandler = Arc::new(move |event| {
            let service = Arc::clone(&service_for_events);
            Box::pin(async move {
                service.handle_invalidation(&event).await;
            })
        });
        let subscription = bus.subscribe(handler);

        Ok(InventorySystem {
            service,
            distributed,
            subscription,
        })
    }
}
