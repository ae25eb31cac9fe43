//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;

use oppy::content::{ContentRegistrar, RequestContext};
use oppy::scripting::DeclarativeCompiler;

/// Write `contents` to `root/relative`, creating parent directories.
pub fn write(root: &Path, relative: &str, contents: impl AsRef<[u8]>) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

pub fn registrar(root: &Path, config: Value) -> Arc<ContentRegistrar> {
    ContentRegistrar::new("test", root, Arc::new(config), Arc::new(DeclarativeCompiler::new())).unwrap()
}

/// Send a request straight into `registrar`, bypassing the transport.
pub async fn send(registrar: &ContentRegistrar, method: Method, path: &str) -> (StatusCode, Bytes) {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header("host", "localhost")
        .body(Body::empty())
        .unwrap();
    let response = registrar.handle(RequestContext::new(request, 80, None)).await;
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body)
}

pub async fn get(registrar: &ContentRegistrar, path: &str) -> (StatusCode, Bytes) {
    send(registrar, Method::GET, path).await
}

/// Non-pooled client so a server shutting down between tests never hands
/// us a dead connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
