//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! vhost::coalesce PortPlan (TLS versions, HTTP versions, SNI resolver)
//!     → tls.rs (rustls ServerConfig per TLS port)
//!     → http::server (bind, accept, handshake, serve)
//! ```

pub mod tls;

pub use tls::{load_certified_key, server_config, TlsError};
