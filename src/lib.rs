//! Multi-tenant static and extension content server.

pub mod config;
pub mod content;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod scripting;
pub mod vhost;

pub use config::schema::OppyConfig;
pub use content::{ContentRegistrar, Handler};
pub use http::Server;
pub use lifecycle::Shutdown;
pub use scripting::{DeclarativeCompiler, ExtensionCompiler};
pub use vhost::{Host, Listener};
