//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.
//! Host definitions accept both the snake_case keys used inline in
//! `oppy.toml` and the camelCase keys of standalone host JSON files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration (`oppy.toml`).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OppyConfig {
    /// Transport settings shared by every port.
    pub server: ServerConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Directory of `*.json` host definitions, one host per file.
    pub hosts_dir: Option<PathBuf>,

    /// Hosts defined inline.
    pub hosts: Vec<HostConfig>,
}

/// Transport settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address every coalesced port is bound on.
    pub bind_address: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,

    /// How long in-flight requests may drain after a shutdown signal.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            request_timeout_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter, overridden by `RUST_LOG`.
    pub log_level: String,

    /// Whether to expose the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Address of the Prometheus endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// One virtual host.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HostConfig {
    /// Display name; host files default it to their file stem.
    pub name: Option<String>,

    /// Content root.
    #[serde(alias = "wwwDir")]
    pub www_dir: PathBuf,

    /// Server names answered; absent, empty or containing `*` answers all.
    pub names: Option<Vec<String>>,

    /// Ports this host is reachable on.
    pub listen: Vec<ListenerConfig>,

    /// Free-form settings read by handlers (`file.maxCachePerFile`, ...).
    pub config: serde_json::Value,
}

impl HostConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed Host")
    }
}

/// One listening port of a host.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ListenerConfig {
    /// Protocol names (`tls12`, `tls13`, `http1`, `http2`, ...).
    #[serde(default, alias = "proto")]
    pub protocols: Option<Vec<String>>,

    pub port: u16,

    /// SNI name → PEM file pair.
    #[serde(default, alias = "keyPairs")]
    pub key_pairs: Option<BTreeMap<String, KeyPairConfig>>,
}

impl ListenerConfig {
    /// Configured protocols, `["http1"]` when none are listed.
    pub fn protocols(&self) -> Vec<String> {
        self.protocols
            .clone()
            .unwrap_or_else(|| vec!["http1".to_string()])
    }

    pub fn key_pairs(&self) -> impl Iterator<Item = (&String, &KeyPairConfig)> {
        self.key_pairs.iter().flatten()
    }
}

/// PEM certificate chain and private key for one SNI name.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct KeyPairConfig {
    #[serde(default, alias = "certPem")]
    pub cert_pem: Option<PathBuf>,

    #[serde(default, alias = "keyPem")]
    pub key_pem: Option<PathBuf>,
}
