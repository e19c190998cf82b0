//! Cache key derivation.
//!
//! Keys have the shape `{prefix}{endpoint}:{sha256}` where the digest covers
//! the endpoint and the parameters serialized in name order. The readable
//! head lets operators invalidate by endpoint with a glob.

use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::request::{Params, RequestDescriptor};

/// Length of the key fingerprint exposed in response headers.
pub const FINGERPRINT_LEN: usize = 32;

/// A fully namespaced cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading slice of the key, safe to expose to clients.
    pub fn fingerprint(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(FINGERPRINT_LEN)
            .map_or(self.0.len(), |(idx, _)| idx);
        &self.0[..end]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the key for a request descriptor.
pub fn key_for(prefix: &str, descriptor: &RequestDescriptor) -> CacheKey {
    derive_key(prefix, descriptor.endpoint(), descriptor.params())
}

/// Derive the key for an endpoint and parameter set.
///
/// Parameter insertion order never affects the result.
pub fn derive_key(prefix: &str, endpoint: &str, params: &Params) -> CacheKey {
    let digest = hex::encode(Sha256::digest(canonical_form(endpoint, params).as_bytes()));
    CacheKey(format!("{prefix}{endpoint}:{digest}"))
}

fn canonical_form(endpoint: &str, params: &Params) -> String {
    let sorted: Map<String, Value> = params
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();
    format!("{endpoint}:{}", Value::Object(sorted))
}
