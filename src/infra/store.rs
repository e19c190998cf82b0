//! Backing store selection for the response cache.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{CacheStore, MemoryStore, RedisOptions, RedisStore, RetryPolicy};
use crate::config::{StoreBackend, StoreSettings};

use super::error::InfraError;

/// Build the configured store.
///
/// The Redis connection is established on a background task so listeners
/// bind immediately; until it succeeds the service runs uncached and the
/// store reconnects on demand.
pub async fn build_store(settings: &StoreSettings) -> Result<Arc<dyn CacheStore>, InfraError> {
    match settings.backend {
        StoreBackend::Memory => {
            info!(
                target = "geocache::store",
                capacity = settings.memory_capacity.get(),
                "using in-process cache store"
            );
            Ok(Arc::new(MemoryStore::new(settings.memory_capacity)))
        }
        StoreBackend::Redis => {
            let store = Arc::new(RedisStore::new(&redis_options(settings))?);
            let connecting = Arc::clone(&store);
            let (host, port) = (settings.host.clone(), settings.port);
            tokio::spawn(async move {
                if let Err(err) = connecting.connect().await {
                    warn!(
                        target = "geocache::store",
                        host = %host,
                        port,
                        error = %err,
                        "Redis unavailable at startup; serving uncached"
                    );
                }
            });
            Ok(store)
        }
    }
}

pub fn redis_options(settings: &StoreSettings) -> RedisOptions {
    RedisOptions {
        host: settings.host.clone(),
        port: settings.port,
        password: settings.password.clone(),
        db: settings.db,
        command_timeout: settings.command_timeout,
        retry: RetryPolicy::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    fn settings(backend: StoreBackend) -> StoreSettings {
        StoreSettings {
            backend,
            host: "redis.internal".to_string(),
            port: 6380,
            password: Some("secret".to_string()),
            db: 2,
            command_timeout: Duration::from_millis(250),
            memory_capacity: NonZeroUsize::new(16).expect("non-zero"),
        }
    }

    #[test]
    fn redis_options_follow_settings() {
        let options = redis_options(&settings(StoreBackend::Redis));
        assert_eq!(options.host, "redis.internal");
        assert_eq!(options.port, 6380);
        assert_eq!(options.password.as_deref(), Some("secret"));
        assert_eq!(options.db, 2);
        assert_eq!(options.command_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn unreachable_redis_does_not_block_startup() {
        let mut settings = settings(StoreBackend::Redis);
        settings.host = "127.0.0.1".to_string();
        // Port 1 is reserved and refuses connections on test hosts.
        settings.port = 1;

        let store = tokio::time::timeout(Duration::from_secs(1), build_store(&settings))
            .await
            .expect("startup must not wait on Redis")
            .expect("store builds");

        let read = tokio::time::timeout(Duration::from_secs(1), store.get("pelias:search:abc"))
            .await
            .expect("read must fail promptly");
        assert!(read.is_err());
    }

    #[tokio::test]
    async fn memory_backend_is_usable_immediately() {
        let store = build_store(&settings(StoreBackend::Memory))
            .await
            .expect("memory store");
        store
            .set_with_expiry("pelias:search:abc", "{}", 60)
            .await
            .expect("set");
        assert_eq!(
            store.get("pelias:search:abc").await.expect("get").as_deref(),
            Some("{}")
        );
    }
}
