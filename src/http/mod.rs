//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! vhost::Listener::coalesce() → one PortPlan per port
//!     → server.rs (bind, TLS via rustls when the plan asks for it)
//!     → request.rs (request id) → trace → timeout
//!     → vhost::Listener::handle
//! ```

pub mod request;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{RunningServer, Server, ServerError};
