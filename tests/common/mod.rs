//! Shared fixtures for integration tests.
//!
//! All tests run over the in-process backends; a `MemoryFixture` owns one set
//! of shared resources (store, distributed cache, lock table, bus) and can
//! build any number of `InventorySystem` instances on top of them, simulating
//! a fleet of service instances sharing one Redis.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stockroom::backends::{MemoryBus, MemoryDistributedCache, MemoryLockManager};
use stockroom::{
    InventoryConfig, InventorySystem, InventorySystemBuilder, LocalCacheConfig, LockConfig,
    MemoryStore, NewProduct,
};

/// One "Redis": shared store, cache, lock table, and bus.
pub struct MemoryFixture {
    pub store: Arc<MemoryStore>,
    pub distributed: Arc<MemoryDistributedCache>,
    pub locks: Arc<MemoryLockManager>,
    pub bus: Arc<MemoryBus>,
}

impl MemoryFixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            distributed: Arc::new(MemoryDistributedCache::new()),
            locks: Arc::new(MemoryLockManager::new()),
            bus: Arc::new(MemoryBus::new()),
        }
    }

    /// Build one service instance on the shared resources.
    pub async fn system(&self, config: InventoryConfig) -> InventorySystem {
        InventorySystemBuilder::new()
            .with_config(config)
            .with_store(self.store.clone())
            .with_distributed_cache(self.distributed.clone())
            .with_lock_manager(self.locks.clone())
            .with_bus(self.bus.clone())
            .build()
            .await
            .expect("memory-backed system construction cannot fail")
    }
}

impl Default for MemoryFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Single memory-backed instance with default configuration.
pub async fn setup_system() -> (MemoryFixture, InventorySystem) {
    let fixture = MemoryFixture::new();
    let system = fixture.system(InventoryConfig::default()).await;
    (fixture, system)
}

/// Configuration with short TTLs and lock budgets for expiry-sensitive tests.
pub fn fast_config() -> InventoryConfig {
    InventoryConfig {
        local_cache: LocalCacheConfig {
            max_capacity: 100,
            time_to_live: Duration::from_millis(100),
        },
        distributed_ttl: Duration::from_secs(60),
        lock: LockConfig {
            wait: Duration::from_millis(500),
            lease: Duration::from_secs(2),
            retry_interval: Duration::from_millis(5),
        },
        ..InventoryConfig::default()
    }
}

/// A product request with a unique name.
pub fn sample_product(stock: i64) -> NewProduct {
    NewProduct::new(format!("Widget {}", rand::random::<u32>()), 19.99, stock)
}

/// Give the fanout bus time to deliver.
pub async fn propagation_delay() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
