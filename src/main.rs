//! oppy: a multi-tenant content server.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                      OPPY                        │
//!                        │                                                  │
//!   Client Request       │  ┌─────────┐    ┌──────────┐    ┌────────────┐  │
//!   ─────────────────────┼─▶│  http   │───▶│  vhost   │───▶│  content   │  │
//!                        │  │ server  │    │ listener │    │ registrar  │  │
//!                        │  └─────────┘    └──────────┘    └─────┬──────┘  │
//!                        │   per-port        host by             │         │
//!                        │   TLS / SNI       name + port         ▼         │
//!                        │                              ┌───────────────┐  │
//!   Client Response      │                              │ handler chain │  │
//!   ◀────────────────────┼──────────────────────────────│ script → file │  │
//!                        │                              └───────┬───────┘  │
//!                        │                                      │ watch    │
//!                        │                                      ▼          │
//!                        │                               content root      │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use oppy::config::load_config;
use oppy::http::Server;
use oppy::lifecycle::{build_listener, signals, Shutdown};
use oppy::observability::{logging, metrics};
use oppy::scripting::DeclarativeCompiler;

#[derive(Parser)]
#[command(name = "oppy")]
#[command(about = "Multi-tenant static and extension content server", long_about = None)]
struct Cli {
    /// Root configuration file
    #[arg(short, long, default_value = "oppy.toml")]
    config: PathBuf,

    /// Load and validate the configuration, print the port plan and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let log_filter = logging::init("info");

    let config = load_config(&cli.config)?;
    if let Some(handle) = &log_filter {
        logging::set_level(handle, &config.observability.log_level);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        hosts = config.hosts.len(),
        "oppy starting"
    );

    let listener = Arc::new(build_listener(&config, Arc::new(DeclarativeCompiler::new())));

    if cli.check {
        for plan in listener.coalesce().values() {
            println!(
                "port {:>5}  {:<9}  tls={:?} http={:?}  hosts={}",
                plan.port,
                if plan.is_tls() { "https" } else { "http" },
                plan.tls,
                plan.http,
                plan.host_names().join(", ")
            );
        }
        return Ok(());
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    listener.activate().await;

    let shutdown = Shutdown::new();
    let server = Server::new(listener.clone(), config.server.clone());
    let running = server.spawn(&shutdown).await?;
    tracing::info!(ports = ?running.ports(), "Serving");

    signals::wait_for_signal().await;
    shutdown.trigger();
    listener.deactivate();

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    match tokio::time::timeout(grace + Duration::from_secs(1), running.wait()).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!(grace_secs = grace.as_secs(), "Connections still open after grace period"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
