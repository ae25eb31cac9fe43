//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! oppy.toml (+ hosts_dir/*.json)
//!     → loader.rs (parse, deserialize, absolutize paths)
//!     → validation.rs (semantic checks: server fatal, hosts per host)
//!     → OppyConfig (validated, immutable)
//!     → lifecycle::startup builds Listener → Host → ContentRegistrar
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; content changes are picked up by the
//!   per-host watchers, not by reloading this file
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_host_file, ConfigError};
pub use schema::{HostConfig, KeyPairConfig, ListenerConfig, ObservabilityConfig, OppyConfig, ServerConfig};
pub use validation::{validate_config, validate_host, ValidationError};
