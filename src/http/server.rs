//! HTTP server setup.
//!
//! One axum service per coalesced port. Plaintext ports are served with
//! `axum::serve`; TLS ports through `axum-server` with a rustls config
//! whose certificate resolver asks every host sharing the port.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::schema::ServerConfig;
use crate::content::RequestContext;
use crate::http::request::UuidRequestId;
use crate::lifecycle::Shutdown;
use crate::net::tls::{self, TlsError};
use crate::vhost::coalesce::PortPlan;
use crate::vhost::Listener;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address `{0}`")]
    BindAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server on port {port} failed: {source}")]
    Io {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS setup for port {port} failed: {source}")]
    Tls {
        port: u16,
        #[source]
        source: TlsError,
    },

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// State injected into the per-port fallback handler.
#[derive(Clone)]
struct PortState {
    listener: Arc<Listener>,
    port: u16,
}

pub struct Server {
    listener: Arc<Listener>,
    settings: ServerConfig,
}

impl Server {
    pub fn new(listener: Arc<Listener>, settings: ServerConfig) -> Self {
        Self { listener, settings }
    }

    /// Build the router serving every request that arrives on `port`.
    #[allow(deprecated)]
    pub fn router(&self, port: u16) -> Router {
        Router::new()
            .fallback(serve_request)
            .with_state(PortState {
                listener: self.listener.clone(),
                port,
            })
            .layer(TimeoutLayer::new(Duration::from_secs(self.settings.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    /// Bind every coalesced port and start serving. Each port stops when
    /// `shutdown` fires.
    pub async fn spawn(&self, shutdown: &Shutdown) -> Result<RunningServer, ServerError> {
        let ip: IpAddr = self
            .settings
            .bind_address
            .parse()
            .map_err(|_| ServerError::BindAddress(self.settings.bind_address.clone()))?;
        let grace = Duration::from_secs(self.settings.shutdown_grace_secs);

        let mut running = RunningServer::default();
        for plan in self.listener.coalesce().into_values() {
            let addr = SocketAddr::new(ip, plan.port);
            let task = if plan.is_tls() {
                self.spawn_tls(addr, &plan, shutdown, grace)?
            } else {
                self.spawn_plain(addr, &plan, shutdown).await?
            };
            running.ports.push(plan.port);
            running.tasks.push(task);
        }
        Ok(running)
    }

    /// Serve until `shutdown` fires and every port has drained.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), ServerError> {
        self.spawn(shutdown).await?.wait().await
    }

    async fn spawn_plain(
        &self,
        addr: SocketAddr,
        plan: &PortPlan,
        shutdown: &Shutdown,
    ) -> Result<JoinHandle<Result<(), ServerError>>, ServerError> {
        let port = plan.port;
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        tracing::info!(address = %addr, hosts = ?plan.host_names(), "HTTP listener started");

        let app = self.router(port).into_make_service_with_connect_info::<SocketAddr>();
        let mut stop = shutdown.subscribe();
        Ok(tokio::spawn(async move {
            axum::serve(tcp, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await
                .map_err(|source| ServerError::Io { port, source })?;
            tracing::info!(port, "HTTP listener stopped");
            Ok(())
        }))
    }

    fn spawn_tls(
        &self,
        addr: SocketAddr,
        plan: &PortPlan,
        shutdown: &Shutdown,
        grace: Duration,
    ) -> Result<JoinHandle<Result<(), ServerError>>, ServerError> {
        let port = plan.port;
        let config = tls::server_config(port, plan.tls, plan.http, Arc::new(plan.resolver()))
            .map_err(|source| ServerError::Tls { port, source })?;
        let rustls = RustlsConfig::from_config(Arc::new(config));
        let tcp = std::net::TcpListener::bind(addr)
            .and_then(|tcp| tcp.set_nonblocking(true).map(|()| tcp))
            .map_err(|source| ServerError::Bind { addr, source })?;
        tracing::info!(address = %addr, hosts = ?plan.host_names(), tls = ?plan.tls, "HTTPS listener started");

        let handle = axum_server::Handle::new();
        let mut stop = shutdown.subscribe();
        let stopper = handle.clone();
        tokio::spawn(async move {
            let _ = stop.recv().await;
            stopper.graceful_shutdown(Some(grace));
        });

        let app = self.router(port).into_make_service_with_connect_info::<SocketAddr>();
        Ok(tokio::spawn(async move {
            axum_server::from_tcp_rustls(tcp, rustls)
                .handle(handle)
                .serve(app)
                .await
                .map_err(|source| ServerError::Io { port, source })?;
            tracing::info!(port, "HTTPS listener stopped");
            Ok(())
        }))
    }
}

/// Handles for the per-port server tasks.
#[derive(Debug, Default)]
pub struct RunningServer {
    ports: Vec<u16>,
    tasks: Vec<JoinHandle<Result<(), ServerError>>>,
}

impl RunningServer {
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Wait for every port to stop. The first failure is returned after
    /// all ports have finished.
    pub async fn wait(self) -> Result<(), ServerError> {
        let mut first_error = None;
        for (port, task) in self.ports.into_iter().zip(self.tasks) {
            let result = match task.await {
                Ok(result) => result,
                Err(join) => Err(ServerError::from(join)),
            };
            if let Err(error) = result {
                tracing::error!(port, error = %error, "Listener failed");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

async fn serve_request(State(state): State<PortState>, request: Request<Body>) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    state
        .listener
        .handle(RequestContext::new(request, state.port, remote_addr))
        .await
}
