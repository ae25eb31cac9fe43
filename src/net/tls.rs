//! TLS configuration and certificate loading.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ResolvesServerCert;
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use thiserror::Error;

use crate::vhost::host::{HttpProtocols, TlsProtocols};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("unsupported private key in {path:?}: {source}")]
    UnsupportedKey {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("no supported TLS protocol version (only TLS 1.2 and 1.3 are available)")]
    NoSupportedVersion,

    #[error("TLS error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Load a PEM certificate chain and private key into a signing-ready key.
pub fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, TlsError> {
    let cert_bytes = std::fs::read(cert_path).map_err(|source| TlsError::Io {
        path: cert_path.to_path_buf(),
        source,
    })?;
    let key_bytes = std::fs::read(key_path).map_err(|source| TlsError::Io {
        path: key_path.to_path_buf(),
        source,
    })?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_bytes.as_slice()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|source| TlsError::Io {
            path: cert_path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_bytes.as_slice()))
        .map_err(|source| TlsError::Io {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key).map_err(|source| {
        TlsError::UnsupportedKey {
            path: key_path.to_path_buf(),
            source,
        }
    })?;

    Ok(CertifiedKey::new(certs, signing_key))
}

/// Build the rustls configuration for one coalesced port.
///
/// TLS 1.0/1.1 are not offered by rustls; requesting only those is an
/// error, requesting them alongside 1.2/1.3 is logged and ignored.
pub fn server_config(
    port: u16,
    tls: TlsProtocols,
    http: HttpProtocols,
    resolver: Arc<dyn ResolvesServerCert>,
) -> Result<ServerConfig, TlsError> {
    if tls.intersects(TlsProtocols::TLS10 | TlsProtocols::TLS11) {
        tracing::warn!(port, "TLS 1.0/1.1 requested but not supported, ignoring");
    }

    let mut versions = Vec::new();
    if tls.contains(TlsProtocols::TLS13) {
        versions.push(&rustls::version::TLS13);
    }
    if tls.contains(TlsProtocols::TLS12) {
        versions.push(&rustls::version::TLS12);
    }
    if versions.is_empty() {
        return Err(TlsError::NoSupportedVersion);
    }

    let mut config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
        .with_protocol_versions(&versions)?
        .with_no_client_auth()
        .with_cert_resolver(resolver);

    config.alpn_protocols = alpn_protocols(http);
    Ok(config)
}

/// ALPN identifiers for `http`, most preferred first. HTTP/1.1 is assumed
/// when nothing is listed.
pub fn alpn_protocols(http: HttpProtocols) -> Vec<Vec<u8>> {
    let mut alpn = Vec::new();
    if http.contains(HttpProtocols::HTTP2) {
        alpn.push(b"h2".to_vec());
    }
    if http.contains(HttpProtocols::HTTP1) || http.is_empty() {
        alpn.push(b"http/1.1".to_vec());
    }
    alpn
}
