//! Per-request and per-host context handed to handlers.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::content::path::normalize_request_path;

/// An inbound request together with the connection facts routing needs.
#[derive(Debug)]
pub struct RequestContext {
    request: Request<Body>,
    server_name: String,
    local_port: u16,
    remote_addr: Option<SocketAddr>,
}

impl RequestContext {
    pub fn new(request: Request<Body>, local_port: u16, remote_addr: Option<SocketAddr>) -> Self {
        let server_name = server_name(&request);
        Self {
            request,
            server_name,
            local_port,
            remote_addr,
        }
    }

    /// Lower-cased host name the client addressed, without port.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The request path normalized into oppy-path key space.
    pub fn oppy_path(&self) -> String {
        normalize_request_path(self.request.uri().path())
    }

    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    pub fn into_request(self) -> Request<Body> {
        self.request
    }
}

/// Extract the server name from the `Host` header, falling back to the
/// URI authority (HTTP/2 requests carry it there).
fn server_name(request: &Request<Body>) -> String {
    let raw = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or_default();
    strip_port(raw.trim()).trim_end_matches('.').to_lowercase()
}

fn strip_port(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        // IPv6 literal
        return rest.split(']').next().unwrap_or(rest);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => authority,
    }
}

/// Host-scoped values every handler of one content root shares.
///
/// Handlers receive this at construction and read their settings out of the
/// host's free-form `config` blob by dotted path.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    host_name: Arc<str>,
    www_dir: PathBuf,
    config: Arc<Value>,
}

impl HandlerContext {
    pub fn new(host_name: impl Into<Arc<str>>, www_dir: impl Into<PathBuf>, config: Arc<Value>) -> Self {
        Self {
            host_name: host_name.into(),
            www_dir: www_dir.into(),
            config,
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn www_dir(&self) -> &Path {
        &self.www_dir
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Look up `path` (e.g. `file.maxCachePerFile`, optionally prefixed
    /// with `$.`) and deserialize the node found there.
    ///
    /// Missing nodes yield `None`; a node of the wrong shape is logged and
    /// also yields `None`.
    pub fn config_value<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let node = lookup(&self.config, path)?;
        match T::deserialize(node) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(
                    host = %self.host_name,
                    config_path = path,
                    error = %error,
                    "Ignoring mistyped configuration value"
                );
                None
            }
        }
    }

    pub fn config_or<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.config_value(path).unwrap_or(default)
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() || path == "$" {
        return Some(root);
    }
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}
