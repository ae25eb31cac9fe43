//! Virtual hosting.
//!
//! # Data Flow
//! ```text
//! Config → host.rs (Host, per-port bindings, certificates)
//!     → listener.rs (ordered host list, request routing)
//!     → coalesce.rs (per-port protocol union + SNI resolver) → http::server
//! ```

pub mod coalesce;
pub mod host;
pub mod listener;

pub use coalesce::{coalesce, PortPlan, SniResolver};
pub use host::{Host, HostError, HttpProtocols, PortBinding, Protocol, TlsProtocols};
pub use listener::Listener;
