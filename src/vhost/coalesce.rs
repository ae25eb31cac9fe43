//! Per-port coalescing of host requirements.
//!
//! Several hosts may share a port. The port then offers the union of their
//! TLS and HTTP versions, and a certificate lookup that asks each host in
//! registration order. A port no host wants TLS on is served in plaintext.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::vhost::host::{Host, HttpProtocols, TlsProtocols};

/// Everything the transport needs to open one port.
#[derive(Clone)]
pub struct PortPlan {
    pub port: u16,
    pub hosts: Vec<Arc<Host>>,
    pub tls: TlsProtocols,
    pub http: HttpProtocols,
}

impl PortPlan {
    pub fn is_tls(&self) -> bool {
        !self.tls.is_empty()
    }

    /// The certificate of the first host on this port that has one for
    /// `sni` (case-insensitive).
    pub fn resolve_certificate(&self, sni: &str) -> Option<Arc<CertifiedKey>> {
        self.hosts
            .iter()
            .filter_map(|host| host.binding(self.port))
            .find_map(|binding| binding.certificate(sni))
            .cloned()
    }

    pub fn resolver(&self) -> SniResolver {
        SniResolver { plan: self.clone() }
    }

    pub fn host_names(&self) -> Vec<&str> {
        self.hosts.iter().map(|h| h.name()).collect()
    }
}

impl fmt::Debug for PortPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortPlan")
            .field("port", &self.port)
            .field("hosts", &self.host_names())
            .field("tls", &self.tls)
            .field("http", &self.http)
            .finish()
    }
}

/// SNI certificate selection over a [`PortPlan`].
#[derive(Debug)]
pub struct SniResolver {
    plan: PortPlan,
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(name) = client_hello.server_name() else {
            tracing::debug!(port = self.plan.port, "TLS handshake without SNI");
            return None;
        };
        let key = self.plan.resolve_certificate(name);
        if key.is_none() {
            tracing::debug!(port = self.plan.port, sni = name, "No certificate for SNI name");
        }
        key
    }
}

/// Group `hosts` by port, preserving host registration order within a port.
pub fn coalesce(hosts: &[Arc<Host>]) -> BTreeMap<u16, PortPlan> {
    let mut plans: BTreeMap<u16, PortPlan> = BTreeMap::new();
    for host in hosts {
        for (port, binding) in host.listeners() {
            let plan = plans.entry(*port).or_insert_with(|| PortPlan {
                port: *port,
                hosts: Vec::new(),
                tls: TlsProtocols::empty(),
                http: HttpProtocols::empty(),
            });
            plan.hosts.push(host.clone());
            plan.tls |= binding.tls;
            plan.http |= binding.http;
        }
    }
    plans
}
