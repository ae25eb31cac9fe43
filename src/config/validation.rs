//! Semantic validation of a parsed configuration.
//!
//! Every check runs; callers get the full list of problems at once.
//! Host problems are reported per host so a bad host can be skipped
//! without rejecting the rest.

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::config::schema::{HostConfig, OppyConfig};
use crate::vhost::host::Protocol;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.bind_address `{0}` is not an IP address")]
    InvalidBindAddress(String),

    #[error("server.request_timeout_secs must be greater than zero")]
    ZeroTimeout,

    #[error("observability.metrics_address `{0}` is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("host `{host}`: www_dir is empty")]
    EmptyWwwDir { host: String },

    #[error("host `{host}`: no listeners configured")]
    NoListeners { host: String },

    #[error("host `{host}`: port 0 is not a valid listening port")]
    ZeroPort { host: String },

    #[error("host `{host}`: port {port} is listed more than once")]
    DuplicatePort { host: String, port: u16 },

    #[error("host `{host}` port {port}: unknown protocol `{protocol}`")]
    UnknownProtocol { host: String, port: u16, protocol: String },

    #[error("host `{host}` port {port}: TLS requested but no key pairs configured")]
    TlsWithoutKeyPairs { host: String, port: u16 },

    #[error("host `{host}` port {port}: key pair `{name}` needs both a certificate and a key")]
    IncompleteKeyPair { host: String, port: u16, name: String },
}

/// Validate the server-wide sections.
pub fn validate_server(config: &OppyConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.server.bind_address.clone(),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    errors
}

/// Validate one host definition.
pub fn validate_host(host: &HostConfig) -> Vec<ValidationError> {
    let name = host.display_name().to_string();
    let mut errors = Vec::new();

    if host.www_dir.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyWwwDir { host: name.clone() });
    }
    if host.listen.is_empty() {
        errors.push(ValidationError::NoListeners { host: name.clone() });
    }

    let mut seen = std::collections::HashSet::new();
    for listener in &host.listen {
        let port = listener.port;
        if port == 0 {
            errors.push(ValidationError::ZeroPort { host: name.clone() });
        } else if !seen.insert(port) {
            errors.push(ValidationError::DuplicatePort {
                host: name.clone(),
                port,
            });
        }

        let mut wants_tls = false;
        for protocol in listener.protocols() {
            match protocol.parse::<Protocol>() {
                Ok(protocol) => wants_tls |= protocol.is_tls(),
                Err(_) => errors.push(ValidationError::UnknownProtocol {
                    host: name.clone(),
                    port,
                    protocol,
                }),
            }
        }

        let mut complete_pairs = 0;
        for (pair_name, pair) in listener.key_pairs() {
            match (&pair.cert_pem, &pair.key_pem) {
                (Some(_), Some(_)) => complete_pairs += 1,
                (None, None) => {}
                _ => errors.push(ValidationError::IncompleteKeyPair {
                    host: name.clone(),
                    port,
                    name: pair_name.clone(),
                }),
            }
        }
        if wants_tls && complete_pairs == 0 {
            errors.push(ValidationError::TlsWithoutKeyPairs {
                host: name.clone(),
                port,
            });
        }
    }

    errors
}

/// Validate everything; `Err` carries every problem found.
pub fn validate_config(config: &OppyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_server(config);
    for host in &config.hosts {
        errors.extend(validate_host(host));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{KeyPairConfig, ListenerConfig};
    use std::collections::BTreeMap;

    fn host(listen: Vec<ListenerConfig>) -> HostConfig {
        HostConfig {
            name: Some("h".to_string()),
            www_dir: "/srv/www".into(),
            listen,
            ..Default::default()
        }
    }

    fn listener(port: u16, protocols: &[&str]) -> ListenerConfig {
        ListenerConfig {
            protocols: Some(protocols.iter().map(|p| p.to_string()).collect()),
            port,
            key_pairs: None,
        }
    }

    #[test]
    fn plain_http_host_is_valid() {
        assert!(validate_host(&host(vec![listener(8080, &["http1", " HTTP2 "])])).is_empty());
    }

    #[test]
    fn reports_every_problem() {
        let mut bad = host(vec![
            listener(0, &["http3"]),
            listener(443, &["tls1.3"]),
            listener(443, &["http1"]),
        ]);
        bad.www_dir = "".into();

        let errors = validate_host(&bad);
        assert!(errors.contains(&ValidationError::EmptyWwwDir { host: "h".into() }));
        assert!(errors.contains(&ValidationError::ZeroPort { host: "h".into() }));
        assert!(errors.contains(&ValidationError::UnknownProtocol {
            host: "h".into(),
            port: 0,
            protocol: "http3".into()
        }));
        assert!(errors.contains(&ValidationError::TlsWithoutKeyPairs {
            host: "h".into(),
            port: 443
        }));
        assert!(errors.contains(&ValidationError::DuplicatePort {
            host: "h".into(),
            port: 443
        }));
    }

    #[test]
    fn half_key_pairs_are_rejected() {
        let mut tls = listener(443, &["tls12"]);
        let mut pairs = BTreeMap::new();
        pairs.insert(
            "a.com".to_string(),
            KeyPairConfig {
                cert_pem: Some("a.pem".into()),
                key_pem: None,
            },
        );
        tls.key_pairs = Some(pairs);

        let errors = validate_host(&host(vec![tls]));
        assert!(errors.contains(&ValidationError::IncompleteKeyPair {
            host: "h".into(),
            port: 443,
            name: "a.com".into()
        }));
        assert!(errors.contains(&ValidationError::TlsWithoutKeyPairs {
            host: "h".into(),
            port: 443
        }));
    }

    #[test]
    fn server_section_checks() {
        let mut config = OppyConfig::default();
        assert!(validate_config(&config).is_ok());

        config.server.bind_address = "not-an-ip".into();
        config.server.request_timeout_secs = 0;
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
