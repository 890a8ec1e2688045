//! Backend implementations for the inventory core.
//!
//! # Available backends
//!
//! ## Local tier (per-process)
//! - **Moka**: bounded LRU cache with TTL (default)
//!
//! ## Distributed tier / lock / bus (shared)
//! - **Redis**: distributed cache (`SET EX`), lease locks (`SET NX PX`), and
//!   Pub/Sub invalidation fanout (defaults)
//! - **Memory**: `DashMap`/broadcast stand-ins for tests and single-node use

pub mod memory;
pub mod moka_local;
pub mod redis_cache;
pub mod redis_lock;

pub use memory::{MemoryBus, MemoryDistributedCache, MemoryLockManager};
pub use moka_local::MokaLocalCache;
pub use redis_cache::RedisCache;
pub use redis_lock::RedisLockManager;

/// Default local tier backend.
pub type LocalTier = MokaLocalCache;

/// Default distributed tier backend.
pub type DistributedTier = RedisCache;
