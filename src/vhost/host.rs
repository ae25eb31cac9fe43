//! Virtual hosts.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use bitflags::bitflags;
use rustls::sign::CertifiedKey;
use thiserror::Error;

use crate::config::schema::HostConfig;
use crate::config::validation::{validate_host, ValidationError};
use crate::content::registrar::{ContentRegistrar, RegistrarError};
use crate::net::tls::{load_certified_key, TlsError};
use crate::scripting::compiler::ExtensionCompiler;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TlsProtocols: u8 {
        const TLS10 = 1;
        const TLS11 = 1 << 1;
        const TLS12 = 1 << 2;
        const TLS13 = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HttpProtocols: u8 {
        const HTTP1 = 1;
        const HTTP2 = 1 << 1;
    }
}

/// One entry of a listener's protocol list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
    Http1,
    Http2,
}

impl Protocol {
    pub fn is_tls(self) -> bool {
        matches!(self, Protocol::Tls10 | Protocol::Tls11 | Protocol::Tls12 | Protocol::Tls13)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown protocol `{0}`")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    /// Case-insensitive; surrounding whitespace and dots are ignored
    /// (`TLS1.2` is `tls12`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s.trim().chars().filter(|c| *c != '.').collect::<String>().to_lowercase();
        match key.as_str() {
            "tls10" => Ok(Protocol::Tls10),
            "tls11" => Ok(Protocol::Tls11),
            "tls12" => Ok(Protocol::Tls12),
            "tls13" => Ok(Protocol::Tls13),
            "http1" => Ok(Protocol::Http1),
            "http2" => Ok(Protocol::Http2),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

/// Fold a protocol list into TLS and HTTP version sets.
pub fn parse_protocols<S: AsRef<str>>(names: &[S]) -> Result<(TlsProtocols, HttpProtocols), UnknownProtocol> {
    names.iter().try_fold(
        (TlsProtocols::empty(), HttpProtocols::empty()),
        |(tls, http), name| {
            Ok(match name.as_ref().parse::<Protocol>()? {
                Protocol::Tls10 => (tls | TlsProtocols::TLS10, http),
                Protocol::Tls11 => (tls | TlsProtocols::TLS11, http),
                Protocol::Tls12 => (tls | TlsProtocols::TLS12, http),
                Protocol::Tls13 => (tls | TlsProtocols::TLS13, http),
                Protocol::Http1 => (tls, http | HttpProtocols::HTTP1),
                Protocol::Http2 => (tls, http | HttpProtocols::HTTP2),
            })
        },
    )
}

/// What a host requires of one port.
#[derive(Debug, Clone, Default)]
pub struct PortBinding {
    pub tls: TlsProtocols,
    pub http: HttpProtocols,
    /// Lower-case SNI name → certificate.
    pub certificates: HashMap<String, Arc<CertifiedKey>>,
}

impl PortBinding {
    pub fn new(tls: TlsProtocols, http: HttpProtocols) -> Self {
        Self {
            tls,
            http,
            certificates: HashMap::new(),
        }
    }

    pub fn with_certificate(mut self, sni: &str, key: Arc<CertifiedKey>) -> Self {
        self.certificates.insert(sni.trim().to_lowercase(), key);
        self
    }

    pub fn certificate(&self, sni: &str) -> Option<&Arc<CertifiedKey>> {
        self.certificates.get(&sni.to_lowercase())
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid host configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Validation(Vec<ValidationError>),

    #[error("port {port}: key pair `{name}`: {source}")]
    Certificate {
        port: u16,
        name: String,
        #[source]
        source: TlsError,
    },

    #[error(transparent)]
    Content(#[from] RegistrarError),
}

/// A named virtual host: which names and ports it answers, and the content
/// behind it.
pub struct Host {
    name: String,
    names: Option<Vec<String>>,
    listeners: HashMap<u16, PortBinding>,
    content: Arc<ContentRegistrar>,
}

impl Host {
    pub fn new(
        name: impl Into<String>,
        names: Option<Vec<String>>,
        listeners: HashMap<u16, PortBinding>,
        content: Arc<ContentRegistrar>,
    ) -> Self {
        Self {
            name: name.into(),
            names: names.map(|names| names.iter().map(|n| n.trim().to_lowercase()).collect()),
            listeners,
            content,
        }
    }

    /// Validate `config`, load its certificates and build its content
    /// registrar. The registrar is not activated.
    pub fn from_config(config: &HostConfig, compiler: Arc<dyn ExtensionCompiler>) -> Result<Self, HostError> {
        let errors = validate_host(config);
        if !errors.is_empty() {
            return Err(HostError::Validation(errors));
        }
        let name = config.display_name();

        let mut listeners = HashMap::new();
        for listener in &config.listen {
            let (tls, http) = parse_protocols(listener.protocols().as_slice()).map_err(|e| {
                HostError::Validation(vec![ValidationError::UnknownProtocol {
                    host: name.to_string(),
                    port: listener.port,
                    protocol: e.0,
                }])
            })?;

            let mut binding = PortBinding::new(tls, http);
            for (sni, pair) in listener.key_pairs() {
                let (Some(cert), Some(key)) = (&pair.cert_pem, &pair.key_pem) else {
                    continue;
                };
                let certified = load_certified_key(cert, key).map_err(|source| HostError::Certificate {
                    port: listener.port,
                    name: sni.clone(),
                    source,
                })?;
                binding = binding.with_certificate(sni, Arc::new(certified));
            }
            listeners.insert(listener.port, binding);
        }

        let content = ContentRegistrar::new(
            name,
            &config.www_dir,
            Arc::new(config.config.clone()),
            compiler,
        )?;

        Ok(Self::new(name, config.names.clone(), listeners, content))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    pub fn listeners(&self) -> &HashMap<u16, PortBinding> {
        &self.listeners
    }

    pub fn binding(&self, port: u16) -> Option<&PortBinding> {
        self.listeners.get(&port)
    }

    pub fn content(&self) -> &Arc<ContentRegistrar> {
        &self.content
    }

    /// Whether this host answers `server_name` on `port`.
    ///
    /// A host without names, with an empty name list, or listing `*`
    /// answers any name; the port must always be one of its own.
    pub fn matches(&self, server_name: &str, port: u16) -> bool {
        let name_ok = match &self.names {
            None => true,
            Some(names) => {
                names.is_empty()
                    || names.iter().any(|n| n == "*" || n.eq_ignore_ascii_case(server_name))
            }
        };
        name_ok && self.listeners.contains_key(&port)
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("names", &self.names)
            .field("ports", &self.listeners.keys().collect::<Vec<_>>())
            .field("www_dir", &self.content.www_dir())
            .finish()
    }
}
