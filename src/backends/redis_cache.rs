//! Redis distributed cache tier.
//!
//! Shared by all instances; entries carry an explicit TTL enforced by Redis
//! (`SET ... EX`). Uses `ConnectionManager` for automatic reconnection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::redis_url_from_env;
use crate::traits::DistributedCacheBackend;

/// Redis-backed distributed tier.
pub struct RedisCache {
    /// Connection manager - handles reconnection automatically.
    conn_manager: ConnectionManager,
}

impl RedisCache {
    /// Connect using `REDIS_URL` (default `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the connection
    /// fails.
    pub async fn new() -> Result<Self> {
        Self::with_url(&redis_url_from_env()).await
    }

    /// Connect to a specific Redis URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the connection
    /// fails.
    pub async fn with_url(redis_url: &str) -> Result<Self> {
        info!(redis_url = %redis_url, "Initializing Redis cache with ConnectionManager");

        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .context("Failed to establish Redis connection manager")?;

        // Fail fast on an unreachable server.
        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING health check failed")?;

        info!(redis_url = %redis_url, "Redis cache connected");

        Ok(Self { conn_manager })
    }
}

#[async_trait]
impl DistributedCacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.conn_manager.clone();

        // Errors read as misses so the tiered read path falls through.
        match conn.get::<_, Vec<u8>>(key).await {
            Ok(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        debug!(key = %key, ttl_secs = %ttl.as_secs(), "[Redis] Cached key with TTL");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.del(key).await?;
        debug!(key = %key, "[Redis] Removed key");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let test_key = "health_check_stockroom";
        let test_value = vec![1, 2, 3, 4];

        match self
            .set_with_ttl(test_key, &test_value, Duration::from_secs(10))
            .await
        {
            Ok(()) => match self.get(test_key).await {
                Some(retrieved) => {
                    let _ = self.remove(test_key).await;
                    retrieved == test_value
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}
