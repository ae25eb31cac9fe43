//! Request routing across hosts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::Response;

use crate::content::error_page::ErrorPage;
use crate::content::RequestContext;
use crate::observability::metrics;
use crate::vhost::coalesce::{self, PortPlan};
use crate::vhost::host::Host;

const NO_HOST: &str = "-";

/// Owns every host and routes requests to the first one that answers.
#[derive(Debug, Default)]
pub struct Listener {
    hosts: Vec<Arc<Host>>,
    error_page: ErrorPage,
}

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hosts(hosts: impl IntoIterator<Item = Host>) -> Self {
        let mut listener = Self::new();
        for host in hosts {
            listener.add_host(host);
        }
        listener
    }

    /// Register `host` after every host already present.
    pub fn add_host(&mut self, host: Host) {
        tracing::info!(
            host = %host.name(),
            names = ?host.names(),
            ports = ?host.listeners().keys().collect::<Vec<_>>(),
            "Host registered"
        );
        self.hosts.push(Arc::new(host));
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    /// The first host, in registration order, answering `server_name` on `port`.
    pub fn route(&self, server_name: &str, port: u16) -> Option<&Arc<Host>> {
        self.hosts.iter().find(|host| host.matches(server_name, port))
    }

    pub fn coalesce(&self) -> BTreeMap<u16, PortPlan> {
        coalesce::coalesce(&self.hosts)
    }

    /// Start every host's content watcher and run its first reload pass.
    pub async fn activate(&self) {
        for host in &self.hosts {
            let summary = host.content().activate().await;
            tracing::info!(
                host = %host.name(),
                files = summary.added,
                failed = summary.failed,
                "Host activated"
            );
        }
    }

    pub fn deactivate(&self) {
        for host in &self.hosts {
            host.content().deactivate();
        }
    }

    pub async fn handle(&self, ctx: RequestContext) -> Response {
        let start = Instant::now();
        let port = ctx.local_port();
        let server_name = ctx.server_name().to_string();

        let (host_name, response) = match self.route(&server_name, port) {
            Some(host) => {
                tracing::debug!(
                    host = %host.name(),
                    server_name = %server_name,
                    port,
                    path = %ctx.request().uri().path(),
                    "Routing request"
                );
                (host.name().to_string(), host.content().handle(ctx).await)
            }
            None => {
                tracing::debug!(server_name = %server_name, port, "No host for request");
                (
                    NO_HOST.to_string(),
                    self.error_page.response(StatusCode::NOT_FOUND, None).await,
                )
            }
        };

        metrics::record_request(&host_name, response.status().as_u16(), start);
        response
    }
}
