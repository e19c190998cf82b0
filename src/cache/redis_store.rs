//! Redis-backed cache store.
//!
//! Holds one multiplexed [`ConnectionManager`] shared by every request task.
//! Connection attempts are retried per [`RetryPolicy`] alone: the manager is
//! built with its own retries disabled, so a refused connection fails at once. Each command is bounded by a timeout so a
//! stalled server degrades to cache misses instead of slow responses.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{
    AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::retry::{RetryDecision, RetryPolicy};
use super::store::{CacheStore, StoreError};

const SCAN_BATCH: usize = 500;

/// Connection parameters for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisOptions {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub command_timeout: Duration,
    pub retry: RetryPolicy,
}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        StoreError::unavailable(err)
    }
}

pub struct RedisStore {
    client: Client,
    retry: RetryPolicy,
    command_timeout: Duration,
    connection: RwLock<Option<ConnectionManager>>,
    closed: AtomicBool,
}

impl RedisStore {
    /// Build a store without connecting. Fails only on invalid parameters.
    pub fn new(options: &RedisOptions) -> Result<Self, StoreError> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(options.host.clone(), options.port),
            redis: RedisConnectionInfo {
                db: options.db,
                password: options.password.clone(),
                ..Default::default()
            },
        };
        let client = Client::open(info)?;

        Ok(Self {
            client,
            retry: options.retry,
            command_timeout: options.command_timeout,
            connection: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Establish the shared connection, retrying per the configured policy.
    pub async fn connect(&self) -> Result<(), StoreError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.open_connection().await {
                Ok(manager) => {
                    *self.connection.write().await = Some(manager);
                    info!(target = "geocache::store", attempt, "Redis cache connected");
                    return Ok(());
                }
                Err(err) => {
                    let refused = err.is_connection_refusal();
                    match self.retry.next(attempt, started.elapsed(), refused) {
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                target = "geocache::store",
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Redis connection failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp(reason) => {
                            warn!(
                                target = "geocache::store",
                                attempt,
                                reason = ?reason,
                                error = %err,
                                "Redis connection abandoned"
                            );
                            return Err(StoreError::from(err));
                        }
                    }
                }
            }
        }
    }

    /// A single connection attempt. The manager itself never retries; every
    /// retry decision belongs to [`RetryPolicy`].
    async fn open_connection(&self) -> Result<ConnectionManager, RedisError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(0)
            .set_connection_timeout(self.command_timeout)
            .set_response_timeout(self.command_timeout);
        ConnectionManager::new_with_config(self.client.clone(), config).await
    }

    /// Clone the shared connection, attempting a single bounded connect when
    /// none is established. Concurrent callers never wait on that attempt.
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("store closed".to_string()));
        }

        if let Some(manager) = self.connection.read().await.as_ref() {
            return Ok(manager.clone());
        }

        let Ok(mut slot) = self.connection.try_write() else {
            return Err(StoreError::Unavailable(
                "connection attempt in progress".to_string(),
            ));
        };
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }

        let manager = self.bounded(self.open_connection()).await?;
        *slot = Some(manager.clone());
        info!(target = "geocache::store", "Redis cache reconnected");
        Ok(manager)
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, RedisError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Unavailable(format!(
                "command timed out after {}ms",
                self.command_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move { conn.get(key).await }).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move { conn.set_ex(key, value, ttl_secs).await })
            .await
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        // SCAN instead of KEYS so large namespaces never block the server.
        loop {
            let mut scan_conn = conn.clone();
            let (next, keys): (u64, Vec<String>) = self
                .bounded(async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut scan_conn)
                        .await
                })
                .await?;

            if !keys.is_empty() {
                let mut del_conn = conn.clone();
                let count: u64 = self.bounded(async move { del_conn.del(keys).await }).await?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn info(&self) -> Result<String, StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move {
            redis::cmd("INFO")
                .arg("stats")
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if self.connection.write().await.take().is_some() {
            info!(target = "geocache::store", "Redis cache connection closed");
        }
    }
}
