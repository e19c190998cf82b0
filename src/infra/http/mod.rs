mod admin;
mod geocode;
mod middleware;

pub use geocode::FeatureCollection;
pub use middleware::{RequestContext, X_REQUEST_ID, log_responses, set_request_context};

use axum::{Router, middleware as axum_middleware};

use crate::cache::{ResponseCache, response_cache_layer};

/// Public geocoding API with the response cache installed on every matched route.
pub fn build_api_router(cache: ResponseCache) -> Router {
    with_response_cache(geocode::routes(), cache)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

/// Administrative surface: cache invalidation, statistics and liveness.
pub fn build_admin_router(cache: ResponseCache) -> Router {
    admin::routes(cache)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

/// Install the response cache in front of the routes of `router`.
///
/// Applied as a route layer so unmatched paths never reach the cache and
/// route parameters are available when the key is derived.
pub fn with_response_cache(router: Router, cache: ResponseCache) -> Router {
    router.route_layer(axum_middleware::from_fn_with_state(
        cache,
        response_cache_layer,
    ))
}
