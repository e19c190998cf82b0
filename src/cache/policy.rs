//! Cacheability and expiry policies.
//!
//! Both are pure functions of the immutable [`CacheConfig`] and a
//! [`RequestDescriptor`]; the middleware evaluates them once per request.

use once_cell::sync::Lazy;
use regex::Regex;

use super::config::{CacheConfig, TtlCategory};
use super::request::RequestDescriptor;

const FOCUS_LAT: &str = "focus.point.lat";
const FOCUS_LON: &str = "focus.point.lon";
const SIZE: &str = "size";
const LAYERS: &str = "layers";
const POSTALCODE: &str = "postalcode";
const TEXT: &str = "text";

const ADMIN_LAYERS: [&str; 3] = ["locality", "region", "country"];

static POSTAL_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{5}(-\d{4})?$").expect("postal code pattern is valid"));

/// Why a request bypasses the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bypass {
    Disabled,
    FocusPoint,
    OversizedResult,
    MalformedSize,
}

impl Bypass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::FocusPoint => "focus_point",
            Self::OversizedResult => "oversized_result",
            Self::MalformedSize => "malformed_size",
        }
    }
}

/// Returns true when the request may be read from and written to the cache.
pub fn is_cacheable(config: &CacheConfig, request: &RequestDescriptor) -> bool {
    bypass_reason(config, request).is_none()
}

/// The first rule that excludes the request from caching, if any.
pub fn bypass_reason(config: &CacheConfig, request: &RequestDescriptor) -> Option<Bypass> {
    if !config.enabled {
        return Some(Bypass::Disabled);
    }

    // Focus coordinates personalize results and are not part of the key.
    if request.param(FOCUS_LAT).is_some() || request.param(FOCUS_LON).is_some() {
        return Some(Bypass::FocusPoint);
    }

    if let Some(size) = request.param(SIZE) {
        return match size.trim().parse::<u64>() {
            Ok(size) if size > config.max_result_size => Some(Bypass::OversizedResult),
            Ok(_) => None,
            Err(_) => Some(Bypass::MalformedSize),
        };
    }

    None
}

/// Pick the expiry category for a request. First matching rule wins.
pub fn ttl_category(request: &RequestDescriptor) -> TtlCategory {
    if request
        .param(LAYERS)
        .is_some_and(|layers| ADMIN_LAYERS.contains(&layers))
    {
        return TtlCategory::Admin;
    }

    if request.param(POSTALCODE).is_some()
        || request
            .param(TEXT)
            .is_some_and(|text| POSTAL_TEXT.is_match(text))
    {
        return TtlCategory::PostalCode;
    }

    match request.endpoint() {
        "reverse" => TtlCategory::Reverse,
        "autocomplete" => TtlCategory::Autocomplete,
        "structured" => TtlCategory::Structured,
        _ => TtlCategory::Search,
    }
}

/// TTL in seconds for a request.
pub fn select_ttl(config: &CacheConfig, request: &RequestDescriptor) -> u64 {
    config.ttl.seconds(ttl_category(request))
}
