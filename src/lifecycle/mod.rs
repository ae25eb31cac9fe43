//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     OppyConfig → Host per entry (bad hosts skipped) → Listener
//!
//! Signals (signals.rs):
//!     ctrl-c / SIGTERM → shutdown
//!
//! Shutdown (shutdown.rs):
//!     broadcast → every port stops accepting → drain within the grace period
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::build_listener;
