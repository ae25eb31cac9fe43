//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::{HostConfig, OppyConfig};
use crate::config::validation::{validate_server, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("JSON error in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load the root configuration, resolve relative paths and pull in the
/// host files of `hosts_dir`.
///
/// Server-wide settings are validated here. Hosts are validated one by one
/// at startup so a broken host does not block the others; an unreadable or
/// malformed host file is logged and skipped.
pub fn load_config(path: &Path) -> Result<OppyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: OppyConfig = toml::from_str(&content)?;

    let errors = validate_server(&config);
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors));
    }

    let base = base_dir(path);
    for host in &mut config.hosts {
        absolutize(host, &base);
    }

    if let Some(hosts_dir) = config.hosts_dir.take() {
        let hosts_dir = base.join(hosts_dir);
        config.hosts.extend(load_hosts_dir(&hosts_dir));
        config.hosts_dir = Some(hosts_dir);
    }

    Ok(config)
}

/// Load one host definition file (the camelCase JSON format).
pub fn load_host_file(path: &Path) -> Result<HostConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut host: HostConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    if host.name.is_none() {
        host.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
    }
    absolutize(&mut host, &base_dir(path));
    Ok(host)
}

fn load_hosts_dir(dir: &Path) -> Vec<HostConfig> {
    walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                tracing::warn!(path = ?dir, error = %error, "Skipping unreadable hosts directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .filter_map(|entry| match load_host_file(entry.path()) {
            Ok(host) => Some(host),
            Err(error) => {
                tracing::warn!(path = ?entry.path(), error = %error, "Skipping host file");
                None
            }
        })
        .collect()
}

fn base_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Resolve every relative path of `host` against `base`.
fn absolutize(host: &mut HostConfig, base: &Path) {
    if !host.www_dir.as_os_str().is_empty() {
        host.www_dir = base.join(&host.www_dir);
    }
    for listener in &mut host.listen {
        for pair in listener.key_pairs.iter_mut().flat_map(|pairs| pairs.values_mut()) {
            if let Some(cert) = pair.cert_pem.as_mut() {
                *cert = base.join(&*cert);
            }
            if let Some(key) = pair.key_pem.as_mut() {
                *key = base.join(&*key);
            }
        }
    }
}
