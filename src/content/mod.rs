//! Content pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! content directory
//!     → watcher.rs (change signal)
//!     → registrar.rs (scan, diff, drive load chain)
//!     → handler.rs chain: ScriptHandler → ... → FileHandler
//!
//! request
//!     → registrar.rs handle
//!     → handler.rs chain → response | 404 | 500 (error_page.rs)
//! ```

pub mod context;
pub mod error_page;
pub mod file;
pub mod handler;
pub mod path;
pub mod registered;
pub mod registrar;
pub mod watcher;

pub use context::{HandlerContext, RequestContext};
pub use file::FileHandler;
pub use handler::{FnHandler, Handler, HandlerChain, HandlerError, HandlerResult, LoadNext, Next, Pipeline};
pub use registered::RegisteredContent;
pub use registrar::{ContentRegistrar, ReloadSummary};
