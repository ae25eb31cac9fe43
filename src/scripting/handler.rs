//! Routing requests and file events through extension units.
//!
//! # Responsibilities
//! - Compile unit sources as they appear or change, drop them when deleted
//! - Maintain the route table (oppy path → owning unit)
//! - Fail closed: a unit source is never passed further down the load chain
//!
//! # Unit lifecycle
//! ```text
//! Unloaded → Compiling → Active | Invalid
//! Active → Compiling → Active     (source modified, routes rebuilt)
//! Active → Unloaded               (source deleted, routes removed)
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::content::context::{HandlerContext, RequestContext};
use crate::content::handler::{Handler, HandlerError, HandlerResult, LoadNext, Next, Pipeline};
use crate::content::path::oppy_path;
use crate::observability::metrics;
use crate::scripting::compiler::{CompileContext, CompiledUnit, ExtensionCompiler, BUILTIN_NAMESPACE};
use crate::scripting::matching::PathMatchingMode;
use crate::scripting::unit::HandlerScript;

/// Default unit source extension (`scripting.extension`).
pub const DEFAULT_EXTENSION: &str = "unit";

pub struct ScriptHandler {
    context: HandlerContext,
    compiler: Arc<dyn ExtensionCompiler>,
    pipeline: Weak<Pipeline>,
    extension: String,
    imports: Vec<String>,
    routes: DashMap<String, Arc<HandlerScript>>,
    units: DashMap<PathBuf, Arc<HandlerScript>>,
    standalone: DashMap<PathBuf, Arc<dyn Handler>>,
}

impl ScriptHandler {
    /// `pipeline` is the host pipeline standalone handlers are inserted into.
    pub fn new(context: HandlerContext, compiler: Arc<dyn ExtensionCompiler>, pipeline: Weak<Pipeline>) -> Self {
        let extension = context
            .config_or("scripting.extension", DEFAULT_EXTENSION.to_string())
            .trim_start_matches('.')
            .to_lowercase();
        let mut imports = vec![BUILTIN_NAMESPACE.to_string()];
        imports.extend(context.config_or::<Vec<String>>("scripting.additionalImports", Vec::new()));

        Self {
            context,
            compiler,
            pipeline,
            extension,
            imports,
            routes: DashMap::new(),
            units: DashMap::new(),
            standalone: DashMap::new(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn is_unit_source(&self, disk_path: &Path) -> bool {
        disk_path
            .extension()
            .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(&self.extension))
    }

    /// The unit owning `oppy_path`, if any.
    pub fn route(&self, oppy_path: &str) -> Option<Arc<HandlerScript>> {
        self.routes.get(oppy_path).map(|unit| unit.value().clone())
    }

    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.routes.iter().map(|r| r.key().clone()).collect();
        routes.sort();
        routes
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn standalone_count(&self) -> usize {
        self.standalone.len()
    }

    /// Offer a plain file to every active unit. The deepest matching unit
    /// wins; ties go to the lexically greatest source path.
    fn claim(&self, server_path: &str, disk_path: &Path) {
        let owner = self
            .units
            .iter()
            .filter(|unit| unit.value().matches(disk_path).unwrap_or(false))
            .max_by(|a, b| {
                let depth = |p: &Path| p.components().count();
                depth(a.key().as_path())
                    .cmp(&depth(b.key().as_path()))
                    .then_with(|| a.key().cmp(b.key()))
            })
            .map(|unit| unit.value().clone());
        let Some(owner) = owner else {
            return;
        };

        let www_dir = self.context.www_dir();
        let mut dir = disk_path.parent();
        while let Some(parent) = dir {
            if parent == www_dir || !parent.starts_with(www_dir) || !owner.matches(parent).unwrap_or(false) {
                break;
            }
            if let Some(dir_path) = oppy_path(parent, www_dir) {
                self.routes.insert(dir_path, owner.clone());
            }
            dir = parent.parent();
        }
        self.routes.insert(server_path.to_string(), owner);
    }

    /// Drop the unit (or standalone handler) compiled from `source`.
    fn unload(&self, source: &Path) {
        if let Some((_, unit)) = self.units.remove(source) {
            self.routes.retain(|_, owner| !Arc::ptr_eq(owner, &unit));
            tracing::info!(host = %self.context.host_name(), ?source, "Unloaded unit");
        }
        if let Some((_, handler)) = self.standalone.remove(source) {
            if let Some(pipeline) = self.pipeline.upgrade() {
                pipeline.remove(&handler);
            }
        }
        self.record_units();
    }

    fn install_standalone(&self, source: &Path, handler: Arc<dyn Handler>) {
        if let Some((_, unit)) = self.units.remove(source) {
            self.routes.retain(|_, owner| !Arc::ptr_eq(owner, &unit));
        }
        let Some(pipeline) = self.pipeline.upgrade() else {
            return;
        };
        let previous = self.standalone.insert(source.to_path_buf(), handler.clone());
        pipeline.replace_or_insert(previous.as_ref(), 0, handler);
        tracing::info!(host = %self.context.host_name(), ?source, "Installed standalone handler");
        self.record_units();
    }

    async fn compile_source(&self, oppy_path: &str, source: &Path) {
        let text = match tokio::fs::read_to_string(source).await {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(host = %self.context.host_name(), oppy_path, error = %error, "Could not read unit source");
                self.unload(source);
                return;
            }
        };

        let ctx = CompileContext {
            source_path: source,
            handler_context: &self.context,
            imports: &self.imports,
        };
        let mut unit = match self.compiler.compile(&text, &ctx) {
            Ok(CompiledUnit::Unit(unit)) => unit,
            Ok(CompiledUnit::HandlerWithMode(handler, mode)) => HandlerScript::new(handler, mode),
            Ok(CompiledUnit::Handler(handler)) => HandlerScript::new(handler, PathMatchingMode::DEFAULT),
            Ok(CompiledUnit::Standalone(handler)) => {
                self.install_standalone(source, handler);
                return;
            }
            Ok(CompiledUnit::Unrecognized(what)) => {
                tracing::error!(host = %self.context.host_name(), oppy_path, reason = %what, "Not a valid unit");
                self.unload(source);
                return;
            }
            Err(error) => {
                tracing::error!(host = %self.context.host_name(), oppy_path, error = %error, "Unit failed to compile");
                self.unload(source);
                return;
            }
        };
        unit.set_script_path(source);
        let unit = Arc::new(unit);

        let www_dir = self.context.www_dir().to_path_buf();
        let walker = unit.clone();
        let owned = match tokio::task::spawn_blocking(move || walker.collect_matches(&www_dir)).await {
            Ok(Ok(owned)) => owned,
            Ok(Err(error)) => {
                tracing::error!(host = %self.context.host_name(), oppy_path, error = %error, "Unit could not be attached");
                self.unload(source);
                return;
            }
            Err(error) => {
                tracing::error!(host = %self.context.host_name(), oppy_path, error = %error, "Unit route walk failed");
                self.unload(source);
                return;
            }
        };

        if let Some((_, handler)) = self.standalone.remove(source) {
            if let Some(pipeline) = self.pipeline.upgrade() {
                pipeline.remove(&handler);
            }
        }
        for path in &owned {
            self.routes.insert(path.clone(), unit.clone());
        }
        if let Some(previous) = self.units.insert(source.to_path_buf(), unit) {
            self.routes.retain(|_, owner| !Arc::ptr_eq(owner, &previous));
        }

        tracing::info!(
            host = %self.context.host_name(),
            oppy_path,
            routes = owned.len(),
            "Loaded unit"
        );
        self.record_units();
    }

    fn record_units(&self) {
        metrics::set_unit_count(self.context.host_name(), self.units.len() + self.standalone.len());
    }
}

#[async_trait]
impl Handler for ScriptHandler {
    fn name(&self) -> &str {
        "ScriptHandler"
    }

    async fn load_file(&self, oppy_path: &str, disk_path: &Path, next: LoadNext<'_>) -> Result<(), HandlerError> {
        let is_source = self.is_unit_source(disk_path);

        if !tokio::fs::try_exists(disk_path).await.unwrap_or(false) {
            if is_source {
                self.unload(disk_path);
            } else {
                self.routes.remove(oppy_path);
            }
            return next.run(oppy_path, disk_path).await;
        }

        if !is_source {
            self.claim(oppy_path, disk_path);
            return next.run(oppy_path, disk_path).await;
        }

        // unit sources never reach later handlers, compiled or not
        self.compile_source(oppy_path, disk_path).await;
        Ok(())
    }

    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> HandlerResult {
        match self.route(&ctx.oppy_path()) {
            Some(unit) => unit.handler().handle(ctx, next).await,
            None => next.run(ctx).await,
        }
    }
}
