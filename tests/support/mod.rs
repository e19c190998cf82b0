#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response},
};
use geocache::cache::{CacheConfig, CacheStore, MemoryStore, ResponseCache, StoreError};
use http_body_util::BodyExt;
use tower::ServiceExt;

/// In-memory store that records every write and counts every read.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    reads: AtomicUsize,
    writes: Mutex<Vec<(String, u64)>>,
}

impl RecordingStore {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(String, u64)> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn touched(&self) -> bool {
        self.reads() > 0 || !self.writes().is_empty()
    }
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push((key.to_string(), ttl_secs));
        self.inner.set_with_expiry(key, value, ttl_secs).await
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        self.inner.delete_matching(pattern).await
    }

    async fn info(&self) -> Result<String, StoreError> {
        self.inner.info().await
    }
}

/// Store whose every operation fails as if the server were down.
#[derive(Default)]
pub struct FailingStore {
    pub calls: AtomicUsize,
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::unavailable("connection refused"))
    }

    async fn set_with_expiry(
        &self,
        _key: &str,
        _value: &str,
        _ttl_secs: u64,
    ) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::unavailable("connection refused"))
    }

    async fn delete_matching(&self, _pattern: &str) -> Result<u64, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::unavailable("connection refused"))
    }

    async fn info(&self) -> Result<String, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::unavailable("connection refused"))
    }
}

pub fn cache_with(store: Arc<dyn CacheStore>) -> ResponseCache {
    ResponseCache::new(Arc::new(CacheConfig::default()), store)
}

pub async fn send(app: &Router, method: Method, uri: &str) -> (Response<Body>, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");

    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.expect("body collects").to_bytes();
    let text = String::from_utf8(bytes.to_vec()).expect("utf-8 body");
    (Response::from_parts(parts, Body::empty()), text)
}

pub async fn get(app: &Router, uri: &str) -> (Response<Body>, String) {
    send(app, Method::GET, uri).await
}

/// Poll until `check` holds; cache writes land on a separate task.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}
