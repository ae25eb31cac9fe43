//! Static file serving with an in-memory cache for small files.
//!
//! # Design Decisions
//! - The index maps oppy paths to disk paths; it only changes via `load_file`
//! - Cached bodies are `Bytes`, so replacing an entry never invalidates a
//!   response already holding the old one
//! - Files over the cache ceiling are streamed from disk on every request

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use dashmap::DashMap;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::content::context::{HandlerContext, RequestContext};
use crate::content::handler::{Handler, HandlerError, HandlerResult, LoadNext, Next};

/// Default cache ceiling per file (`file.maxCachePerFile`).
pub const DEFAULT_MAX_CACHE_PER_FILE: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
struct CachedFile {
    bytes: Bytes,
    content_type: HeaderValue,
    /// Whole seconds, the resolution of `Last-Modified`.
    modified: Option<SystemTime>,
}

pub struct FileHandler {
    host_name: String,
    max_cache_per_file: u64,
    files: DashMap<String, PathBuf>,
    cache: DashMap<String, CachedFile>,
}

impl FileHandler {
    pub fn new(context: &HandlerContext) -> Self {
        Self {
            host_name: context.host_name().to_string(),
            max_cache_per_file: context.config_or("file.maxCachePerFile", DEFAULT_MAX_CACHE_PER_FILE),
            files: DashMap::new(),
            cache: DashMap::new(),
        }
    }

    pub fn max_cache_per_file(&self) -> u64 {
        self.max_cache_per_file
    }

    /// Whether `oppy_path` is currently served from memory.
    pub fn is_cached(&self, oppy_path: &str) -> bool {
        self.cache.contains_key(oppy_path)
    }

    pub fn is_indexed(&self, oppy_path: &str) -> bool {
        self.files.contains_key(oppy_path)
    }

    /// Resolve a request path to an indexed file: the exact entry, or an
    /// `index*` file directly inside the requested directory.
    fn resolve(&self, oppy_path: &str) -> Option<(String, PathBuf)> {
        if let Some(entry) = self.files.get(oppy_path) {
            return Some((oppy_path.to_string(), entry.value().clone()));
        }

        let prefix = format!("{oppy_path}/index");
        let mut candidates: Vec<(String, PathBuf)> = self
            .files
            .iter()
            .filter(|entry| {
                entry
                    .key()
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        candidates.sort();
        candidates.into_iter().find(|(_, disk)| disk.exists())
    }

    async fn cache_file(&self, oppy_path: &str, disk_path: &Path, modified: Option<SystemTime>) {
        match tokio::fs::read(disk_path).await {
            Ok(contents) => {
                let content_type = content_type_for(disk_path);
                self.cache.insert(
                    oppy_path.to_string(),
                    CachedFile {
                        bytes: Bytes::from(contents),
                        content_type,
                        modified: modified.map(whole_seconds),
                    },
                );
            }
            Err(error) => {
                self.cache.remove(oppy_path);
                tracing::debug!(
                    host = %self.host_name,
                    oppy_path,
                    error = %error,
                    "Not caching file"
                );
            }
        }
    }
}

#[async_trait]
impl Handler for FileHandler {
    fn name(&self) -> &str {
        "FileHandler"
    }

    async fn load_file(&self, oppy_path: &str, disk_path: &Path, next: LoadNext<'_>) -> Result<(), HandlerError> {
        let metadata = match tokio::fs::metadata(disk_path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                self.cache.remove(oppy_path);
                self.files.remove(oppy_path);
                return next.run(oppy_path, disk_path).await;
            }
        };

        self.files.insert(oppy_path.to_string(), disk_path.to_path_buf());
        if metadata.len() <= self.max_cache_per_file {
            self.cache_file(oppy_path, disk_path, metadata.modified().ok()).await;
        } else {
            self.cache.remove(oppy_path);
        }
        Ok(())
    }

    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> HandlerResult {
        let Some((key, disk_path)) = self.resolve(&ctx.oppy_path()) else {
            return next.run(ctx).await;
        };

        let cached = self.cache.get(&key).map(|entry| entry.value().clone());
        if let Some(cached) = cached {
            return Ok(cached_response(ctx.request(), cached));
        }

        let response = ServeFile::new(disk_path)
            .oneshot(ctx.into_request())
            .await
            .map_err(HandlerError::other)?;
        Ok(response.map(Body::new))
    }
}

fn cached_response<B>(request: &Request<B>, cached: CachedFile) -> Response {
    let method = request.method();
    let body = if *method == Method::GET {
        Body::from(cached.bytes.clone())
    } else if *method == Method::HEAD {
        Body::empty()
    } else {
        let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        return response;
    };

    let last_modified = cached
        .modified
        .and_then(|modified| HeaderValue::from_str(&httpdate::fmt_http_date(modified)).ok());
    if let (Some(modified), Some(since)) = (cached.modified, if_modified_since(request)) {
        if modified <= since {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            if let Some(value) = last_modified {
                response.headers_mut().insert(header::LAST_MODIFIED, value);
            }
            return response;
        }
    }

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, cached.content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(cached.bytes.len()));
    if let Some(value) = last_modified {
        headers.insert(header::LAST_MODIFIED, value);
    }
    response
}

fn if_modified_since<B>(request: &Request<B>) -> Option<SystemTime> {
    let value = request.headers().get(header::IF_MODIFIED_SINCE)?.to_str().ok()?;
    httpdate::parse_http_date(value).ok()
}

fn whole_seconds(time: SystemTime) -> SystemTime {
    let secs = time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn content_type_for(path: &Path) -> HeaderValue {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    HeaderValue::from_str(mime.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}
