//! Request tracing for both listeners.
//!
//! Every request gets an id that is echoed in `x-request-id`, including cache
//! hits that never reach a handler. Completed requests are logged with the
//! geocoding endpoint and the cache outcome; failures also carry the
//! diagnostic chain a handler attached as an [`ErrorReport`].

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    application::error::ErrorReport,
    cache::{X_CACHE, endpoint_from_path},
};

pub const X_REQUEST_ID: &str = "x-request-id";

const NO_CACHE_OUTCOME: &str = "none";

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Assign a request id and echo it on the response.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Log each completed request with its endpoint and cache outcome.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;

    let status = response.status();
    let endpoint = endpoint_from_path(&path);
    let cache = cache_outcome(&response).to_owned();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if !(status.is_client_error() || status.is_server_error()) {
        debug!(
            target = "geocache::http::response",
            status = status.as_u16(),
            method = %method,
            endpoint,
            cache = %cache,
            elapsed_ms,
            request_id = %request_id,
            "request completed"
        );
        return response;
    }

    let (source, chain) = response
        .extensions_mut()
        .remove::<ErrorReport>()
        .map_or(("unknown", Vec::new()), |report| (report.source, report.messages));
    let detail = chain
        .first()
        .map_or("no diagnostic available", String::as_str);

    if status.is_server_error() {
        error!(
            target = "geocache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            endpoint,
            cache = %cache,
            elapsed_ms,
            source,
            detail,
            chain = ?chain,
            request_id = %request_id,
            "request failed"
        );
    } else if status != StatusCode::NOT_FOUND {
        warn!(
            target = "geocache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            endpoint,
            elapsed_ms,
            source,
            detail,
            request_id = %request_id,
            "client request error"
        );
    }

    response
}

fn cache_outcome(response: &Response) -> &str {
    response
        .headers()
        .get(X_CACHE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(NO_CACHE_OUTCOME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn cache_outcome_reads_marker() {
        let mut response = StatusCode::OK.into_response();
        assert_eq!(cache_outcome(&response), "none");

        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("HIT"));
        assert_eq!(cache_outcome(&response), "HIT");
    }
}
