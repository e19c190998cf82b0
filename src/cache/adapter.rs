//! Best-effort facade over a [`CacheStore`].
//!
//! Request-path operations (`read`, `write_with_expiry`) never fail: store
//! errors and malformed entries are logged, counted and reported as a miss or
//! a skipped write. After a store failure the facade stops touching the store
//! until the retry delay elapses, so an outage costs one timeout rather than
//! one per request. Administrative operations propagate errors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use metrics::counter;
use serde::de::IgnoredAny;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::retry::RetryPolicy;
use super::store::{CacheStore, StoreError};

pub(crate) const METRIC_STORE_ERROR_TOTAL: &str = "geocache_store_error_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("response cache is disabled")]
    Disabled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A JSON response body exactly as it was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry(String);

impl CacheEntry {
    /// Wrap a response body, rejecting anything that is not a JSON document.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<IgnoredAny>(bytes)?;
        // Valid JSON is always valid UTF-8.
        Ok(Self(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn from_stored(key: &str, raw: String) -> Result<Self, StoreError> {
        serde_json::from_str::<IgnoredAny>(&raw).map_err(|err| StoreError::Malformed {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.0)
    }
}

/// Tracks store failures and gates request-path access while the store is down.
struct StoreHealth {
    policy: RetryPolicy,
    epoch: Instant,
    failures: AtomicU32,
    retry_at_ms: AtomicU64,
}

impl StoreHealth {
    fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            epoch: Instant::now(),
            failures: AtomicU32::new(0),
            retry_at_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn is_available(&self) -> bool {
        self.failures.load(Ordering::Acquire) == 0
            || self.now_ms() >= self.retry_at_ms.load(Ordering::Acquire)
    }

    fn record_success(&self) {
        let previous = self.failures.swap(0, Ordering::AcqRel);
        if previous > 0 {
            info!(
                target = "geocache::cache",
                failures = previous,
                "cache store recovered"
            );
        }
    }

    fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let delay = self.policy.delay(failures);
        self.retry_at_ms
            .store(self.now_ms() + delay.as_millis() as u64, Ordering::Release);
    }
}

/// Store adapter shared by the middleware and the admin handlers.
#[derive(Clone)]
pub struct ResponseCache {
    config: Arc<CacheConfig>,
    store: Arc<dyn CacheStore>,
    health: Arc<StoreHealth>,
}

impl ResponseCache {
    pub fn new(config: Arc<CacheConfig>, store: Arc<dyn CacheStore>) -> Self {
        Self::with_retry_policy(config, store, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        config: Arc<CacheConfig>,
        store: Arc<dyn CacheStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            config,
            store,
            health: Arc::new(StoreHealth::new(policy)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read an entry; any failure is reported as a miss.
    pub async fn read(&self, key: &CacheKey) -> Option<CacheEntry> {
        if !self.health.is_available() {
            debug!(cache = "store", outcome = "skipped", "store unavailable, skipping read");
            return None;
        }

        let raw = match self.store.get(key.as_str()).await {
            Ok(raw) => {
                self.health.record_success();
                raw?
            }
            Err(err) => {
                self.report_failure("read", &err);
                return None;
            }
        };

        match CacheEntry::from_stored(key.as_str(), raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                counter!(METRIC_STORE_ERROR_TOTAL, "op" => "parse").increment(1);
                warn!(
                    target = "geocache::cache",
                    key = %key,
                    error = %err,
                    "discarding malformed cache entry"
                );
                None
            }
        }
    }

    /// Store an entry; returns whether the write succeeded.
    pub async fn write_with_expiry(&self, key: &CacheKey, entry: &CacheEntry, ttl: u64) -> bool {
        if !self.health.is_available() {
            debug!(cache = "store", outcome = "skipped", "store unavailable, skipping write");
            return false;
        }

        match self
            .store
            .set_with_expiry(key.as_str(), entry.as_str(), ttl)
            .await
        {
            Ok(()) => {
                self.health.record_success();
                debug!(cache = "store", key = %key, ttl, "cache entry stored");
                true
            }
            Err(err) => {
                self.report_failure("write", &err);
                false
            }
        }
    }

    /// Remove every entry in the namespace matching `pattern`.
    pub async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        self.ensure_enabled()?;
        let namespaced = self.config.namespaced(pattern);

        let removed = self
            .store
            .delete_matching(&namespaced)
            .await
            .inspect_err(|err| self.report_failure("delete", err))?;
        self.health.record_success();

        info!(
            target = "geocache::cache",
            pattern = %namespaced,
            removed,
            "cleared cache entries"
        );
        Ok(removed)
    }

    /// Backing store metrics, one entry per `name:value` line.
    pub async fn statistics(&self) -> Result<BTreeMap<String, String>, CacheError> {
        self.ensure_enabled()?;

        let raw = self
            .store
            .info()
            .await
            .inspect_err(|err| self.report_failure("stats", err))?;
        self.health.record_success();

        Ok(parse_info(&raw))
    }

    /// Release the store connection.
    pub async fn close(&self) {
        self.store.close().await;
    }

    fn ensure_enabled(&self) -> Result<(), CacheError> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(CacheError::Disabled)
        }
    }

    fn report_failure(&self, op: &'static str, err: &StoreError) {
        self.health.record_failure();
        counter!(METRIC_STORE_ERROR_TOTAL, "op" => op).increment(1);
        warn!(target = "geocache::cache", op, error = %err, "cache store operation failed");
    }
}

fn parse_info(raw: &str) -> BTreeMap<String, String> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.trim_end_matches('\r').split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(value), None) => Some((name.to_string(), value.to_string())),
                _ => None,
            }
        })
        .collect()
}
