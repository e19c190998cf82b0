//! Geocoding response cache.
//!
//! Replays JSON responses of read-only geocoding endpoints keyed on the
//! endpoint name and its normalized parameters:
//!
//! - **Keys** ([`derive_key`]): SHA-256 over the endpoint and name-ordered
//!   parameters, namespaced by the configured prefix.
//! - **Policy** ([`is_cacheable`], [`select_ttl`]): personalized and oversized
//!   requests bypass the cache; administrative and postal lookups live longest.
//! - **Store** ([`CacheStore`]): Redis or in-process, wrapped by the
//!   best-effort [`ResponseCache`] adapter.
//! - **Middleware** ([`response_cache_layer`]): HIT / MISS / pass-through per
//!   request, with out-of-band write-back.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! key_prefix = "pelias:"
//! max_result_size = 50
//!
//! [cache.ttl]
//! search = 3600
//! autocomplete = 1800
//! ```

mod adapter;
mod config;
mod keys;
mod lock;
mod middleware;
mod policy;
mod redis_store;
mod request;
mod retry;
mod store;

pub use adapter::{CacheEntry, CacheError, ResponseCache};
pub use config::{CacheConfig, TtlCategory, TtlTable};
pub use keys::{CacheKey, FINGERPRINT_LEN, derive_key, key_for};
pub use middleware::{WriteBack, X_CACHE, X_CACHE_KEY, response_cache_layer};
pub use policy::{Bypass, bypass_reason, is_cacheable, select_ttl, ttl_category};
pub use redis_store::{RedisOptions, RedisStore};
pub use request::{Params, RequestDescriptor, endpoint_from_path};
pub use retry::{GiveUpReason, RetryDecision, RetryPolicy};
pub use store::{CacheStore, MemoryStore, StoreError, glob_match};

pub(crate) mod metric_names {
    pub(crate) use super::adapter::METRIC_STORE_ERROR_TOTAL;
    pub(crate) use super::middleware::{
        METRIC_CACHE_BYPASS_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL,
        METRIC_CACHE_WRITE_FAILED_TOTAL,
    };
}
