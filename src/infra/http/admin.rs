//! Operational endpoints for the response cache, served on the admin listener.

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::{application::error::AppError, cache::ResponseCache};

const MATCH_ALL: &str = "*";

#[derive(Debug, Default, Deserialize)]
pub(super) struct ClearParams {
    pattern: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct ClearOutcome {
    success: bool,
    cleared: u64,
}

pub(super) fn routes(cache: ResponseCache) -> Router {
    Router::new()
        .route("/admin/cache/clear", post(clear_cache))
        .route("/admin/cache/stats", get(cache_stats))
        .route("/admin/health", get(health))
        .with_state(cache)
}

async fn clear_cache(
    State(cache): State<ResponseCache>,
    Query(params): Query<ClearParams>,
) -> Result<Json<ClearOutcome>, AppError> {
    let pattern = params
        .pattern
        .filter(|pattern| !pattern.is_empty())
        .unwrap_or_else(|| MATCH_ALL.to_string());

    let cleared = cache.delete_matching(&pattern).await?;
    Ok(Json(ClearOutcome {
        success: true,
        cleared,
    }))
}

async fn cache_stats(
    State(cache): State<ResponseCache>,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    Ok(Json(cache.statistics().await?))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
