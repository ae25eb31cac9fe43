//! Per-host content orchestration.
//!
//! # Responsibilities
//! - Own the host's handler pipeline (script handler first, file handler last)
//! - Keep the pipeline in sync with the content directory
//! - Turn every request into exactly one response
//!
//! # Data Flow
//! ```text
//! notify event ─┐
//! activate() ───┴→ reload_file_system()
//!                    → scan (blocking pool) → fresh snapshot
//!                    → diff(previous, fresh)
//!                    → chain.load_file(oppy_path, disk_path) per changed path
//!                    → snapshot swap
//!
//! request → handle(ctx) → chain.handle(ctx, 404 fallback)
//!                       → error / panic → 500 error page
//! ```
//!
//! # Design Decisions
//! - Reload passes for one registrar run one at a time; each diffs against
//!   the snapshot the previous pass installed
//! - Within a pass, changed paths are driven concurrently
//! - A failing path is logged and does not abort the pass

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use axum::response::Response;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use notify::RecommendedWatcher;
use serde_json::Value;
use thiserror::Error;

use crate::content::context::{HandlerContext, RequestContext};
use crate::content::error_page::{self, ErrorPage};
use crate::content::file::FileHandler;
use crate::content::handler::{Handler, HandlerChain, Pipeline};
use crate::content::path::oppy_path_unchecked;
use crate::content::registered::{self, Change, Snapshot};
use crate::content::watcher::ContentWatcher;
use crate::observability::metrics;
use crate::scripting::compiler::ExtensionCompiler;
use crate::scripting::handler::ScriptHandler;

/// Default delay used to batch bursts of filesystem events (`watch.debounceMs`).
const DEFAULT_DEBOUNCE_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("content directory {path:?} is not accessible: {source}")]
    WwwDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("content directory {0:?} is not a directory")]
    NotADirectory(PathBuf),
}

/// Outcome of one reload pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub failed: usize,
}

impl ReloadSummary {
    pub fn changes(&self) -> usize {
        self.added + self.removed + self.modified
    }
}

pub struct ContentRegistrar {
    context: HandlerContext,
    pipeline: Arc<Pipeline>,
    file_handler: Arc<FileHandler>,
    script_handler: Arc<ScriptHandler>,
    current: ArcSwap<Snapshot>,
    reload_lock: tokio::sync::Mutex<()>,
    error_page: Arc<ErrorPage>,
    watcher: parking_lot::Mutex<Option<RecommendedWatcher>>,
}

impl ContentRegistrar {
    /// Build the registrar for one host. Nothing is scanned or watched
    /// until [`activate`](Self::activate).
    pub fn new(
        host_name: &str,
        www_dir: &Path,
        config: Arc<Value>,
        compiler: Arc<dyn ExtensionCompiler>,
    ) -> Result<Arc<Self>, RegistrarError> {
        let www_dir = www_dir.canonicalize().map_err(|source| RegistrarError::WwwDir {
            path: www_dir.to_path_buf(),
            source,
        })?;
        if !www_dir.is_dir() {
            return Err(RegistrarError::NotADirectory(www_dir));
        }

        let context = HandlerContext::new(host_name, www_dir.clone(), config);
        let error_page = ErrorPage::new(
            context
                .config_value::<String>("errorPage")
                .map(|template| www_dir.join(template)),
        );

        let pipeline = Arc::new(Pipeline::new(host_name));
        let script_handler = Arc::new(ScriptHandler::new(
            context.clone(),
            compiler,
            Arc::downgrade(&pipeline),
        ));
        let file_handler = Arc::new(FileHandler::new(&context));
        pipeline.push(script_handler.clone());
        pipeline.push(file_handler.clone());

        Ok(Arc::new(Self {
            context,
            pipeline,
            file_handler,
            script_handler,
            current: ArcSwap::from_pointee(Snapshot::new()),
            reload_lock: tokio::sync::Mutex::new(()),
            error_page: Arc::new(error_page),
            watcher: parking_lot::Mutex::new(None),
        }))
    }

    pub fn host_name(&self) -> &str {
        self.context.host_name()
    }

    pub fn www_dir(&self) -> &Path {
        self.context.www_dir()
    }

    pub fn handler_context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn file_handler(&self) -> &Arc<FileHandler> {
        &self.file_handler
    }

    pub fn script_handler(&self) -> &Arc<ScriptHandler> {
        &self.script_handler
    }

    pub fn error_page(&self) -> &ErrorPage {
        &self.error_page
    }

    /// The last installed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn push_handler(&self, handler: Arc<dyn Handler>) {
        self.pipeline.push(handler);
    }

    pub fn insert_handler(&self, index: usize, handler: Arc<dyn Handler>) {
        self.pipeline.insert(index, handler);
    }

    pub fn remove_handler(&self, handler: &Arc<dyn Handler>) -> bool {
        self.pipeline.remove(handler)
    }

    /// Start watching the content root and run the first reload pass.
    ///
    /// A watch that cannot be established is logged; content is still
    /// served from the initial scan.
    pub async fn activate(self: &Arc<Self>) -> ReloadSummary {
        let (watcher, mut events) = ContentWatcher::new(self.www_dir());
        match watcher.run() {
            Ok(handle) => {
                *self.watcher.lock() = Some(handle);
                let debounce = Duration::from_millis(
                    self.context.config_or("watch.debounceMs", DEFAULT_DEBOUNCE_MS),
                );
                let registrar = Arc::downgrade(self);
                tokio::spawn(async move {
                    while events.recv().await.is_some() {
                        tokio::time::sleep(debounce).await;
                        while events.try_recv().is_ok() {}
                        let Some(registrar) = registrar.upgrade() else {
                            break;
                        };
                        registrar.reload_file_system().await;
                    }
                });
            }
            Err(error) => {
                tracing::warn!(
                    host = %self.host_name(),
                    path = ?self.www_dir(),
                    error = %error,
                    "Could not watch content directory, changes will not be picked up"
                );
            }
        }

        self.reload_file_system().await
    }

    /// Stop watching the content root.
    pub fn deactivate(&self) {
        self.watcher.lock().take();
    }

    /// Rescan the content root and drive every changed path through the
    /// load-time chain, then install the new snapshot.
    pub async fn reload_file_system(&self) -> ReloadSummary {
        let _pass = self.reload_lock.lock().await;
        let started = Instant::now();

        let root = self.www_dir().to_path_buf();
        let fresh = match tokio::task::spawn_blocking(move || registered::scan(&root)).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::error!(host = %self.host_name(), error = %error, "Content scan failed");
                return ReloadSummary::default();
            }
        };

        let previous = self.current.load_full();
        let changes = registered::diff(&previous, &fresh);
        let chain = self.pipeline.chain();

        let outcomes = join_all(
            changes
                .iter()
                .map(|(path, change)| self.load_path(&chain, path, *change)),
        )
        .await;

        let mut summary = ReloadSummary::default();
        for ((_, change), ok) in changes.iter().zip(outcomes) {
            match change {
                Change::Added => summary.added += 1,
                Change::Removed => summary.removed += 1,
                Change::Modified => summary.modified += 1,
            }
            if !ok {
                summary.failed += 1;
            }
        }

        self.current.store(Arc::new(fresh));

        let elapsed = started.elapsed();
        if summary.changes() > 0 {
            tracing::info!(
                host = %self.host_name(),
                added = summary.added,
                removed = summary.removed,
                modified = summary.modified,
                failed = summary.failed,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "Content reloaded"
            );
        }
        metrics::record_reload(self.host_name(), summary.changes(), elapsed);
        summary
    }

    async fn load_path(&self, chain: &HandlerChain, disk_path: &Path, change: Change) -> bool {
        let Some(oppy_path) = oppy_path_unchecked(disk_path, self.www_dir()) else {
            return true;
        };
        let started = Instant::now();
        tracing::debug!(host = %self.host_name(), ?change, ?disk_path, %oppy_path, "Loading file");

        match std::panic::AssertUnwindSafe(chain.load_file(&oppy_path, disk_path))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                tracing::debug!(
                    host = %self.host_name(),
                    %oppy_path,
                    elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Loaded file"
                );
                true
            }
            Ok(Err(error)) => {
                tracing::error!(host = %self.host_name(), ?disk_path, %oppy_path, error = %error, "Failed to load file");
                false
            }
            Err(panic) => {
                tracing::error!(
                    host = %self.host_name(),
                    ?disk_path,
                    %oppy_path,
                    panic = %panic_message(panic.as_ref()),
                    "Handler panicked while loading file"
                );
                false
            }
        }
    }

    /// Run `ctx` through the pipeline. Always yields a response: 404 when no
    /// handler claims the request, 500 when one fails.
    pub async fn handle(&self, ctx: RequestContext) -> Response {
        let chain = self.pipeline.chain();
        let error_page = self.error_page.clone();
        let fallback = move |_ctx: RequestContext| -> BoxFuture<'static, Response> {
            let error_page = error_page.clone();
            Box::pin(async move { error_page.response(StatusCode::NOT_FOUND, None).await })
        };

        let failure = match std::panic::AssertUnwindSafe(chain.handle(ctx, &fallback))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => return response,
            Ok(Err(error)) => error.to_string(),
            Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
        };

        match self.error_page.render(StatusCode::INTERNAL_SERVER_ERROR, None).await {
            Ok(html) => {
                tracing::error!(host = %self.host_name(), error = %failure, "Request handling failed");
                error_page::html_response(StatusCode::INTERNAL_SERVER_ERROR, html)
            }
            Err(render_error) => {
                tracing::error!(
                    host = %self.host_name(),
                    error = %failure,
                    render_error = %render_error,
                    "Request handling failed and the error page could not be rendered"
                );
                error_page::plain_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
