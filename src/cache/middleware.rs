//! Response cache middleware.
//!
//! Serves cached JSON for cacheable GET requests and, on a miss, wraps the
//! downstream response in a [`WriteBack`] that stores the emitted body out of
//! band. Requests that fail the cacheability policy never touch the store.

use axum::{
    body::{Body, HttpBody},
    extract::{FromRequestParts, RawPathParams, State},
    http::{
        HeaderValue, Method, Request, StatusCode,
        header::CONTENT_TYPE,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::{
    adapter::{CacheEntry, ResponseCache},
    keys::{CacheKey, key_for},
    policy::{bypass_reason, select_ttl},
    request::RequestDescriptor,
};

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_KEY: &str = "x-cache-key";

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "geocache_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "geocache_cache_miss_total";
pub(crate) const METRIC_CACHE_BYPASS_TOTAL: &str = "geocache_cache_bypass_total";
pub(crate) const METRIC_CACHE_WRITE_FAILED_TOTAL: &str = "geocache_cache_write_failed_total";

const HIT: &str = "HIT";
const MISS: &str = "MISS";
const APPLICATION_JSON: &str = "application/json";

/// Middleware for response caching.
///
/// Install with `route_layer` so route parameters are visible when the cache
/// key is derived.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<ResponseCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = cache.config();
    if !config.enabled || request.method() != Method::GET {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let route_params = RawPathParams::from_request_parts(&mut parts, &()).await.ok();
    let descriptor = RequestDescriptor::from_request(
        parts.uri.path(),
        parts.uri.query(),
        route_params.iter().flat_map(|params| params.iter()),
    );
    let request = Request::from_parts(parts, body);

    if let Some(reason) = bypass_reason(config, &descriptor) {
        counter!(METRIC_CACHE_BYPASS_TOTAL, "reason" => reason.as_str()).increment(1);
        debug!(
            cache = "response",
            outcome = "bypass",
            endpoint = descriptor.endpoint(),
            reason = reason.as_str(),
            "request not cacheable"
        );
        return next.run(request).await;
    }

    let key = key_for(&config.key_prefix, &descriptor);

    if let Some(entry) = cache.read(&key).await {
        counter!(METRIC_CACHE_HIT_TOTAL, "endpoint" => descriptor.endpoint().to_string())
            .increment(1);
        debug!(
            cache = "response",
            outcome = "hit",
            endpoint = descriptor.endpoint(),
            "serving cached response"
        );
        return hit_response(entry, &key);
    }

    counter!(METRIC_CACHE_MISS_TOTAL, "endpoint" => descriptor.endpoint().to_string())
        .increment(1);
    debug!(
        cache = "response",
        outcome = "miss",
        endpoint = descriptor.endpoint(),
        "cache miss, executing handler"
    );

    let ttl = select_ttl(config, &descriptor);
    let write_back = WriteBack::new(cache.clone(), key, ttl);
    write_back.emit(next.run(request).await).await
}

/// Decorates the downstream response emission of a cache miss.
///
/// The emitted body is forwarded unchanged; when it is a successful JSON
/// document within the size limit a copy is written to the store on a
/// separate task, so the caller never waits on the store.
pub struct WriteBack {
    cache: ResponseCache,
    key: CacheKey,
    ttl: u64,
}

impl WriteBack {
    pub fn new(cache: ResponseCache, key: CacheKey, ttl: u64) -> Self {
        Self { cache, key, ttl }
    }

    pub async fn emit(self, response: Response) -> Response {
        if !is_json_success(&response) {
            debug!(
                cache = "response",
                status = response.status().as_u16(),
                "response not storable"
            );
            return mark(response, MISS);
        }

        let limit = self.cache.config().max_body_bytes;
        let within_limit = response
            .body()
            .size_hint()
            .upper()
            .is_some_and(|len| len <= limit as u64);
        if !within_limit {
            debug!(cache = "response", limit, "response body too large to store");
            return mark(response, MISS);
        }

        let (parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, limit).await {
            Ok(bytes) => bytes,
            Err(err) => {
                // The handler failed mid-body; nothing is stored.
                warn!(cache = "response", error = %err, "failed to collect response body");
                return body_failure_response();
            }
        };

        match CacheEntry::from_json_bytes(&bytes) {
            Ok(entry) => self.spawn_store(entry),
            Err(err) => debug!(cache = "response", error = %err, "response body is not JSON"),
        }

        mark(Response::from_parts(parts, Body::from(bytes)), MISS)
    }

    fn spawn_store(self, entry: CacheEntry) {
        let Self { cache, key, ttl } = self;
        tokio::spawn(async move {
            if !cache.write_with_expiry(&key, &entry, ttl).await {
                counter!(METRIC_CACHE_WRITE_FAILED_TOTAL).increment(1);
                warn!(cache = "response", key = %key, ttl, "failed to cache response");
            }
        });
    }
}

fn is_json_success(response: &Response) -> bool {
    response.status().is_success()
        && response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(APPLICATION_JSON))
}

fn mark(mut response: Response, outcome: &'static str) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(outcome));
    response
}

fn body_failure_response() -> Response {
    mark(StatusCode::INTERNAL_SERVER_ERROR.into_response(), MISS)
}

/// Build a response from a cached entry.
fn hit_response(entry: CacheEntry, key: &CacheKey) -> Response {
    let mut response = (
        StatusCode::OK,
        [(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON))],
        entry.into_bytes(),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(HIT));
    if let Ok(fingerprint) = HeaderValue::from_str(key.fingerprint()) {
        headers.insert(X_CACHE_KEY, fingerprint);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use crate::cache::keys::derive_key;
    use crate::cache::request::Params;

    fn key() -> CacheKey {
        derive_key("pelias:", "search", &Params::new())
    }

    #[test]
    fn json_success_detection() {
        let json = Json(serde_json::json!({"a": 1})).into_response();
        assert!(is_json_success(&json));

        let text = (StatusCode::OK, "plain").into_response();
        assert!(!is_json_success(&text));

        let error = (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "x"})))
            .into_response();
        assert!(!is_json_success(&error));

        let with_charset = (
            StatusCode::OK,
            [(CONTENT_TYPE, "Application/JSON; charset=utf-8")],
            "{}",
        )
            .into_response();
        assert!(is_json_success(&with_charset));
    }

    #[test]
    fn hit_response_carries_markers() {
        let entry = CacheEntry::from_json_bytes(b"{\"a\":1}").expect("json");
        let key = key();
        let response = hit_response(entry, &key);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "HIT");
        assert_eq!(response.headers()[X_CACHE_KEY], key.fingerprint());
        assert_eq!(response.headers()[CONTENT_TYPE], APPLICATION_JSON);
    }

    #[test]
    fn mark_sets_miss() {
        let response = mark(StatusCode::OK.into_response(), MISS);
        assert_eq!(response.headers()[X_CACHE], "MISS");
    }

    #[test]
    fn failed_body_is_a_marked_miss() {
        let response = body_failure_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[X_CACHE], "MISS");
    }
}
