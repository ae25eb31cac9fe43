//! Handler contract and chain-of-responsibility composition.
//!
//! # Responsibilities
//! - Define the two-phase [`Handler`] contract (load-time and request-time)
//! - Compose an ordered handler list into one callable chain per phase
//! - Recompose synchronously whenever the list changes
//!
//! # Data Flow
//! ```text
//! Pipeline (mutable list, guarded)
//!     → push / insert / remove
//!     → HandlerChain::aggregate (immutable slice)
//!     → ArcSwap store
//!
//! request:  chain.handle(ctx, fallback)
//!     → handlers[0].handle(ctx, next)
//!         → next.run(ctx) → handlers[1].handle(...) → ... → fallback
//! reload:   chain.load_file(oppy_path, disk_path)
//!     → handlers[0].load_file(..., next) → ... → no-op
//! ```

use std::error::Error as StdError;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::response::Response;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;

use crate::content::context::RequestContext;
use crate::scripting::compiler::CompileError;

/// Failure raised by a handler at load or request time.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl HandlerError {
    pub fn other(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        HandlerError::Other(error.into())
    }
}

pub type HandlerResult = Result<Response, HandlerError>;

/// Terminal step of the request chain, invoked when every handler deferred.
pub type Fallback = dyn Fn(RequestContext) -> BoxFuture<'static, Response> + Send + Sync;

/// One link of a host's content pipeline.
///
/// A handler either services a call completely or passes it on through
/// `next`. Both phases follow the same rule.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Observe that `disk_path` (server path `oppy_path`) was added,
    /// modified or removed. Removed paths no longer exist on disk.
    async fn load_file(
        &self,
        oppy_path: &str,
        disk_path: &Path,
        next: LoadNext<'_>,
    ) -> Result<(), HandlerError> {
        next.run(oppy_path, disk_path).await
    }

    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> HandlerResult;
}

/// The remainder of the request chain after the current handler.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Handler>],
    fallback: &'a Fallback,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: RequestContext) -> HandlerResult {
        match self.rest.split_first() {
            Some((head, rest)) => {
                head.handle(
                    ctx,
                    Next {
                        rest,
                        fallback: self.fallback,
                    },
                )
                .await
            }
            None => Ok((self.fallback)(ctx).await),
        }
    }
}

/// The remainder of the load-time chain after the current handler.
pub struct LoadNext<'a> {
    rest: &'a [Arc<dyn Handler>],
}

impl<'a> LoadNext<'a> {
    pub async fn run(self, oppy_path: &str, disk_path: &Path) -> Result<(), HandlerError> {
        match self.rest.split_first() {
            Some((head, rest)) => head.load_file(oppy_path, disk_path, LoadNext { rest }).await,
            None => Ok(()),
        }
    }
}

/// An immutable, composed view of a handler list.
#[derive(Clone)]
pub struct HandlerChain {
    handlers: Arc<[Arc<dyn Handler>]>,
}

impl HandlerChain {
    pub fn aggregate(handlers: &[Arc<dyn Handler>]) -> Self {
        Self {
            handlers: handlers.iter().cloned().collect(),
        }
    }

    pub async fn handle(&self, ctx: RequestContext, fallback: &Fallback) -> HandlerResult {
        Next {
            rest: &self.handlers,
            fallback,
        }
        .run(ctx)
        .await
    }

    pub async fn load_file(&self, oppy_path: &str, disk_path: &Path) -> Result<(), HandlerError> {
        LoadNext {
            rest: &self.handlers,
        }
        .run(oppy_path, disk_path)
        .await
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::aggregate(&[])
    }
}

/// The mutable handler list of one host.
///
/// Mutations are serialized by a lock and republish a freshly aggregated
/// [`HandlerChain`]; readers load the current chain without locking.
pub struct Pipeline {
    host_name: Arc<str>,
    handlers: Mutex<Vec<Arc<dyn Handler>>>,
    chain: ArcSwap<HandlerChain>,
}

impl Pipeline {
    pub fn new(host_name: impl Into<Arc<str>>) -> Self {
        Self {
            host_name: host_name.into(),
            handlers: Mutex::new(Vec::new()),
            chain: ArcSwap::from_pointee(HandlerChain::default()),
        }
    }

    pub fn push(&self, handler: Arc<dyn Handler>) {
        let mut handlers = self.handlers.lock();
        self.log_registration(handler.as_ref());
        handlers.push(handler);
        self.publish(&handlers);
    }

    /// Insert at `index`, clamped to the list length.
    pub fn insert(&self, index: usize, handler: Arc<dyn Handler>) {
        let mut handlers = self.handlers.lock();
        self.log_registration(handler.as_ref());
        let index = index.min(handlers.len());
        handlers.insert(index, handler);
        self.publish(&handlers);
    }

    /// Remove `handler` (by identity). Returns whether it was present.
    pub fn remove(&self, handler: &Arc<dyn Handler>) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        let removed = handlers.len() != before;
        if removed {
            tracing::info!(host = %self.host_name, handler = handler.name(), "Removed handler");
            self.publish(&handlers);
        }
        removed
    }

    /// Replace `old` with `new` in place, or insert `new` at `index` if `old`
    /// is absent. One recomposition either way.
    pub fn replace_or_insert(&self, old: Option<&Arc<dyn Handler>>, index: usize, new: Arc<dyn Handler>) {
        let mut handlers = self.handlers.lock();
        self.log_registration(new.as_ref());
        let position = old.and_then(|old| handlers.iter().position(|h| same_handler(h, old)));
        match position {
            Some(position) => handlers[position] = new,
            None => {
                let index = index.min(handlers.len());
                handlers.insert(index, new);
            }
        }
        self.publish(&handlers);
    }

    pub fn chain(&self) -> Arc<HandlerChain> {
        self.chain.load_full()
    }

    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, handlers: &[Arc<dyn Handler>]) {
        self.chain.store(Arc::new(HandlerChain::aggregate(handlers)));
    }

    fn log_registration(&self, handler: &dyn Handler) {
        tracing::info!(host = %self.host_name, handler = handler.name(), "Registering handler");
    }
}

fn same_handler(a: &Arc<dyn Handler>, b: &Arc<dyn Handler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Adapts an async closure into a request-time [`Handler`].
///
/// Load-time calls are passed straight through.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: for<'a> Fn(RequestContext, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(RequestContext, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> HandlerResult {
        (self.f)(ctx, next).await
    }
}
