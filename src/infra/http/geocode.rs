//! Geocoding endpoints behind the response cache.
//!
//! The handlers stand in for the upstream geocoder and answer with an empty
//! feature collection; the cache sits in front of them unchanged.

use axum::{Json, Router, routing::get};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<serde_json::Value>,
}

impl FeatureCollection {
    pub fn empty() -> Self {
        Self {
            kind: "FeatureCollection",
            features: Vec::new(),
        }
    }
}

pub(super) fn routes() -> Router {
    Router::new()
        .route("/v1/search", get(search))
        .route("/v1/reverse", get(reverse))
        .route("/v1/autocomplete", get(autocomplete))
        .route("/v1/search/structured", get(structured))
}

async fn search() -> Json<FeatureCollection> {
    Json(FeatureCollection::empty())
}

async fn reverse() -> Json<FeatureCollection> {
    Json(FeatureCollection::empty())
}

async fn autocomplete() -> Json<FeatureCollection> {
    Json(FeatureCollection::empty())
}

async fn structured() -> Json<FeatureCollection> {
    Json(FeatureCollection::empty())
}
