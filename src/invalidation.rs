//! Cross-instance cache invalidation via Redis Pub/Sub.
//!
//! After a committed stock mutation the publisher removes the distributed-tier
//! entry itself, then broadcasts an eviction event; every live instance
//! (including the publisher) drops the record from its local tier on receipt.
//! Delivery is best-effort; a lost message is corrected when the local TTL
//! expires.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::product::ProductId;
use crate::traits::{BusSubscription, InvalidationBusBackend, InvalidationHandler};

/// Invalidation message sent across instances.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum InvalidationEvent {
    /// Drop the local-tier entry for one product.
    Evict { product_id: ProductId },
}

impl InvalidationEvent {
    pub fn evict(product_id: ProductId) -> Self {
        Self::Evict { product_id }
    }

    /// Product the event refers to.
    #[must_use]
    pub fn product_id(&self) -> ProductId {
        match self {
            Self::Evict { product_id } => *product_id,
        }
    }

    /// Serialize to JSON for transmission.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize invalidation event")
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize invalidation event")
    }
}

/// Counters for bus traffic, readable as a [`BusStats`] snapshot.
#[derive(Debug, Default)]
struct AtomicBusStats {
    published: AtomicU64,
    received: AtomicU64,
    errors: AtomicU64,
}

/// Snapshot of invalidation bus activity.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusStats {
    pub published: u64,
    pub received: u64,
    pub errors: u64,
}

impl AtomicBusStats {
    fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Redis Pub/Sub invalidation bus.
///
/// Publishing goes through a `ConnectionManager` (auto-reconnect); each
/// subscription runs on its own Pub/Sub connection in a background task that
/// reconnects with backoff until its [`BusSubscription`] handle stops it. A
/// subscription is ephemeral by nature: it exists only while its instance is
/// alive.
pub struct RedisInvalidationBus {
    /// Client for creating Pub/Sub connections.
    client: redis::Client,
    /// Publish path, cloned per call.
    conn_manager: redis::aio::ConnectionManager,
    channel: String,
    stats: Arc<AtomicBusStats>,
}

impl RedisInvalidationBus {
    /// Connect the bus to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the publish
    /// connection cannot be established.
    pub async fn new(redis_url: &str, channel: impl Into<String>) -> Result<Self> {
        let channel = channel.into();
        info!(redis_url = %redis_url, channel = %channel, "Initializing Redis invalidation bus");

        let client = redis::Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;

        let conn_manager = redis::aio::ConnectionManager::new(client.clone())
            .await
            .context("Failed to establish Redis connection manager for invalidation bus")?;

        Ok(Self {
            client,
            conn_manager,
            channel,
            stats: Arc::new(AtomicBusStats::default()),
        })
    }

    /// Snapshot of publish/receive counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        self.stats.snapshot()
    }

    /// Subscription loop for one Pub/Sub connection; returns `Ok` only on
    /// shutdown.
    async fn run_subscriber_loop(
        client: &redis::Client,
        channel: &str,
        handler: &InvalidationHandler,
        stats: &AtomicBusStats,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .context("Failed to get pubsub connection")?;

        pubsub
            .subscribe(channel)
            .await
            .context("Failed to subscribe to invalidation channel")?;

        info!(channel = %channel, "Subscribed to invalidation channel");

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return Err(anyhow::anyhow!("Pub/Sub message stream ended"));
                    };

                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(error = %e, "Failed to read invalidation payload");
                            stats.errors.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    };

                    let event = match InvalidationEvent::from_json(&payload) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "Failed to deserialize invalidation event");
                            stats.errors.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    };

                    stats.received.fetch_add(1, Ordering::Relaxed);
                    handler(event).await;
                }
                _ = shutdown_rx.recv() => {
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl InvalidationBusBackend for RedisInvalidationBus {
    async fn publish(&self, event: &InvalidationEvent) -> Result<()> {
        let json = event.to_json()?;
        let mut conn = self.conn_manager.clone();

        let _: () = conn
            .publish(&self.channel, &json)
            .await
            .context("Failed to publish invalidation event")?;

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&self, handler: InvalidationHandler) -> BusSubscription {
        let client = self.client.clone();
        let channel = self.channel.clone();
        let stats = Arc::clone(&self.stats);
        // One shutdown channel per subscription, so stopping one instance
        // never touches sibling subscriptions on the same bus.
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            loop {
                match shutdown_rx.try_recv() {
                    Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                        info!("Invalidation subscriber shutting down");
                        break;
                    }
                    Err(_) => {}
                }

                match Self::run_subscriber_loop(
                    &client,
                    &channel,
                    &handler,
                    &stats,
                    &mut shutdown_rx,
                )
                .await
                {
                    Ok(()) => {
                        info!("Invalidation subscriber loop completed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Invalidation subscriber error, reconnecting in 5s");
                        stats.errors.fetch_add(1, Ordering::Relaxed);

                        tokio::select! {
                            () = tokio::time::sleep(Duration::from_secs(5)) => {}
                            _ = shutdown_rx.recv() => {
                                info!("Invalidation subscriber shutting down");
                                break;
                            }
                        }
                    }
                }
            }
        });

        BusSubscription::new(shutdown_tx, task)
    }

    fn name(&self) -> &'static str {
        "RedisPubSub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_roundtrip() {
        let event = InvalidationEvent::evict(42);
        let json = event.to_json().unwrap();
        let parsed = InvalidationEvent::from_json(&json).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.product_id(), 42);
    }

    #[test]
    fn test_event_wire_format_is_tagged() {
        let json = InvalidationEvent::evict(7).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "Evict");
        assert_eq!(value["product_id"], 7);
    }

    #[test]
    fn test_malformed_event_is_rejected() {
        assert!(InvalidationEvent::from_json("{\"type\":\"Unknown\"}").is_err());
        assert!(InvalidationEvent::from_json("not json").is_err());
    }
}
