//! Extension units.
//!
//! # Data Flow
//! ```text
//! *.unit source (load chain)
//!     → compiler.rs (source → CompiledUnit)
//!     → unit.rs (HandlerScript + route walk)
//!     → handler.rs route table
//!
//! request → handler.rs route lookup → unit handler | next
//! ```

pub mod compiler;
pub mod handler;
pub mod matching;
pub mod unit;

pub use compiler::{CompileContext, CompileError, CompiledUnit, DeclarativeCompiler, ExtensionCompiler};
pub use handler::ScriptHandler;
pub use matching::{PathMatcher, PathMatchingMode};
pub use unit::HandlerScript;
