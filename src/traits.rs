//! Backend trait seams for the inventory core.
//!
//! The orchestrating service is written entirely against these traits, so the
//! Redis-backed defaults and the in-process test backends are interchangeable:
//!
//! - `LocalCacheBackend`: per-process tier holding typed snapshots
//! - `DistributedCacheBackend`: shared tier holding serialized bytes with a
//!   backend-enforced TTL
//! - `LockBackend`: fleet-wide mutual exclusion with bounded wait and lease
//! - `InvalidationBusBackend`: fanout publish/subscribe for eviction events
//!
//! All implementations must be `Send + Sync`; cache reads degrade to a miss on
//! backend failure rather than erroring.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::invalidation::InvalidationEvent;
use crate::product::{Product, ProductId};

/// Opaque holder token minted at lock acquisition.
///
/// Release is holder-checked: only the token that acquired a key can delete
/// it, so a caller whose lease already expired cannot release a successor's
/// lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-process cache tier holding `Product` snapshots.
///
/// Entries are bounded by the backend's capacity policy and TTL; an expired
/// entry reads as a miss.
#[async_trait]
pub trait LocalCacheBackend: Send + Sync {
    /// Get a snapshot, `None` on miss or expiry.
    async fn get(&self, id: ProductId) -> Option<Product>;

    /// Insert or refresh a snapshot under the configured capacity/TTL policy.
    async fn put(&self, id: ProductId, product: Product);

    /// Drop the entry for `id` if present.
    async fn invalidate(&self, id: ProductId);

    /// Backend name for logging.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Shared cache tier external to any single process.
///
/// Values are opaque bytes; TTL is enforced by the backend itself. A `get`
/// failure is reported as a miss so the read path can fall through.
#[async_trait]
pub trait DistributedCacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Verify the backend is reachable and functional.
    async fn health_check(&self) -> bool;

    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Fleet-wide mutual exclusion keyed by resource identifier.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Try to acquire `key`, queueing up to `wait`. The lock auto-expires after
    /// `lease` even without release (crash safety).
    ///
    /// Returns `Ok(None)` when the wait budget elapses without acquisition.
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockToken>>;

    /// Release `key` if `token` is still the current holder.
    ///
    /// Idempotent: releasing an already-released or lease-expired lock is a
    /// no-op, never an error.
    async fn release(&self, key: &str, token: &LockToken) -> Result<()>;

    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Async callback invoked for every invalidation event the instance receives.
pub type InvalidationHandler =
    Arc<dyn Fn(InvalidationEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to one live subscription.
///
/// Stopping (or dropping) the handle ends only this subscription; other
/// subscriptions on the same bus keep receiving events.
pub struct BusSubscription {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl BusSubscription {
    #[must_use]
    pub fn new(shutdown_tx: broadcast::Sender<()>, task: JoinHandle<()>) -> Self {
        Self { shutdown_tx, task }
    }

    /// Signal the delivery task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Invalidation subscriber task ended abnormally");
        }
    }
}

/// Fanout publish/subscribe channel for invalidation events.
///
/// Every instance holds exactly one ephemeral subscription, so a single
/// publish reaches all live instances including the publisher. Delivery is
/// best-effort; the local tier TTL bounds staleness from lost messages.
#[async_trait]
pub trait InvalidationBusBackend: Send + Sync {
    /// Fire-and-forget publish to all current subscribers.
    async fn publish(&self, event: &InvalidationEvent) -> Result<()>;

    /// Register one subscription and spawn its delivery task. The returned
    /// handle stops only that subscription.
    fn subscribe(&self, handler: InvalidationHandler) -> BusSubscription;

    fn name(&self) -> &'static str {
        "unknown"
    }
}
