//! Cache configuration.
//!
//! Controls the response cache namespace, the global switch, the result-size
//! ceiling and the per-category TTL table.

use serde::Deserialize;

const DEFAULT_KEY_PREFIX: &str = "pelias:";
const DEFAULT_MAX_RESULT_SIZE: u64 = 50;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

const DEFAULT_TTL_SEARCH_SECS: u64 = 3600;
const DEFAULT_TTL_REVERSE_SECS: u64 = 7200;
const DEFAULT_TTL_AUTOCOMPLETE_SECS: u64 = 1800;
const DEFAULT_TTL_STRUCTURED_SECS: u64 = 3600;
const DEFAULT_TTL_ADMIN_SECS: u64 = 86_400;
const DEFAULT_TTL_POSTALCODE_SECS: u64 = 86_400;

/// Expiry category selected by the TTL policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlCategory {
    Search,
    Reverse,
    Autocomplete,
    Structured,
    Admin,
    PostalCode,
}

impl TtlCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Reverse => "reverse",
            Self::Autocomplete => "autocomplete",
            Self::Structured => "structured",
            Self::Admin => "admin",
            Self::PostalCode => "postalcode",
        }
    }
}

/// TTL in seconds for each category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TtlTable {
    pub search: u64,
    pub reverse: u64,
    pub autocomplete: u64,
    pub structured: u64,
    pub admin: u64,
    pub postalcode: u64,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            search: DEFAULT_TTL_SEARCH_SECS,
            reverse: DEFAULT_TTL_REVERSE_SECS,
            autocomplete: DEFAULT_TTL_AUTOCOMPLETE_SECS,
            structured: DEFAULT_TTL_STRUCTURED_SECS,
            admin: DEFAULT_TTL_ADMIN_SECS,
            postalcode: DEFAULT_TTL_POSTALCODE_SECS,
        }
    }
}

impl TtlTable {
    pub fn seconds(&self, category: TtlCategory) -> u64 {
        match category {
            TtlCategory::Search => self.search,
            TtlCategory::Reverse => self.reverse,
            TtlCategory::Autocomplete => self.autocomplete,
            TtlCategory::Structured => self.structured,
            TtlCategory::Admin => self.admin,
            TtlCategory::PostalCode => self.postalcode,
        }
    }
}

/// Response cache configuration.
///
/// Built once at startup and shared behind an `Arc` by the middleware and the
/// policy functions; never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace prepended to every key and to invalidation patterns.
    pub key_prefix: String,
    /// Global switch; when off every request passes through untouched.
    pub enabled: bool,
    /// Requests asking for more than this many results are not cached.
    pub max_result_size: u64,
    /// Responses with larger bodies are forwarded but not stored.
    pub max_body_bytes: usize,
    pub ttl: TtlTable,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            enabled: true,
            max_result_size: DEFAULT_MAX_RESULT_SIZE,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            ttl: TtlTable::default(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            key_prefix: settings.key_prefix.clone(),
            enabled: settings.enabled,
            max_result_size: settings.max_result_size,
            max_body_bytes: settings.max_body_bytes,
            ttl: settings.ttl.clone(),
        }
    }
}

impl CacheConfig {
    /// A configuration with caching switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Namespace a glob pattern under the key prefix.
    pub fn namespaced(&self, pattern: &str) -> String {
        format!("{}{}", self.key_prefix, pattern)
    }
}
