//! Startup orchestration.
//!
//! Hosts are built in configuration order. A host whose configuration,
//! certificates or content directory are unusable is logged and skipped;
//! the rest still start.

use std::sync::Arc;

use crate::config::schema::OppyConfig;
use crate::scripting::compiler::ExtensionCompiler;
use crate::vhost::{Host, Listener};

pub fn build_listener(config: &OppyConfig, compiler: Arc<dyn ExtensionCompiler>) -> Listener {
    let mut listener = Listener::new();
    for host_config in &config.hosts {
        match Host::from_config(host_config, compiler.clone()) {
            Ok(host) => listener.add_host(host),
            Err(e) => tracing::warn!(
                host = %host_config.display_name(),
                error = %e,
                "Skipping host"
            ),
        }
    }
    if listener.hosts().is_empty() {
        tracing::warn!("No usable hosts configured");
    }
    listener
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{HostConfig, ListenerConfig};
    use crate::scripting::compiler::DeclarativeCompiler;

    fn host(name: &str, www_dir: &std::path::Path, port: u16) -> HostConfig {
        HostConfig {
            name: Some(name.to_string()),
            www_dir: www_dir.to_path_buf(),
            listen: vec![ListenerConfig {
                port,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn bad_hosts_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = OppyConfig {
            hosts: vec![
                host("good", dir.path(), 8080),
                host("missing-root", &dir.path().join("nope"), 8080),
                host("zero-port", dir.path(), 0),
            ],
            ..Default::default()
        };

        let listener = build_listener(&config, Arc::new(DeclarativeCompiler::new()));
        let names: Vec<_> = listener.hosts().iter().map(|h| h.name().to_string()).collect();
        assert_eq!(names, vec!["good"]);
    }
}
