//! Turning unit source text into handlers.
//!
//! # Design Decisions
//! - Units are statically linked: a source file names a registered handler
//!   factory and passes it options, nothing is evaluated
//! - Factory names are namespaced (`oppy::respond`); bare names resolve
//!   through the import list, first hit wins
//! - A document that does not name a handler is not a unit at all and is
//!   reported as unrecognized, never as a plain file

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use thiserror::Error;

use crate::content::context::{HandlerContext, RequestContext};
use crate::content::handler::{Handler, HandlerResult, Next};
use crate::scripting::matching::{PathMatchingMode, ParseModeError};
use crate::scripting::unit::HandlerScript;

/// Namespace of the built-in factories; always imported.
pub const BUILTIN_NAMESPACE: &str = "oppy";

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown handler `{0}`")]
    UnknownHandler(String),

    #[error("invalid options for `{handler}`: {message}")]
    InvalidOptions { handler: String, message: String },

    #[error(transparent)]
    InvalidMatching(#[from] ParseModeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a compiler made of one unit source.
pub enum CompiledUnit {
    /// A fully formed unit, possibly with a custom matcher.
    Unit(HandlerScript),
    HandlerWithMode(Arc<dyn Handler>, PathMatchingMode),
    /// A handler using [`PathMatchingMode::DEFAULT`].
    Handler(Arc<dyn Handler>),
    /// Insert into the host pipeline directly, outside unit routing.
    Standalone(Arc<dyn Handler>),
    /// The source compiled to something that is not a unit.
    Unrecognized(String),
}

/// Inputs available to a compiler besides the source text.
pub struct CompileContext<'a> {
    pub source_path: &'a Path,
    pub handler_context: &'a HandlerContext,
    pub imports: &'a [String],
}

pub trait ExtensionCompiler: Send + Sync {
    fn compile(&self, source: &str, ctx: &CompileContext<'_>) -> Result<CompiledUnit, CompileError>;
}

pub type HandlerFactory =
    Arc<dyn Fn(toml::Value, &CompileContext<'_>) -> Result<Arc<dyn Handler>, CompileError> + Send + Sync>;

#[derive(Debug, Deserialize)]
struct UnitSource {
    handler: String,
    matching: Option<String>,
    #[serde(default)]
    standalone: bool,
    #[serde(default)]
    options: toml::Table,
}

/// Compiles TOML unit sources by looking up registered handler factories.
///
/// ```toml
/// handler = "respond"
/// matching = "AnyMatching"
///
/// [options]
/// body = "hello"
/// ```
pub struct DeclarativeCompiler {
    factories: HashMap<String, HandlerFactory>,
}

impl DeclarativeCompiler {
    /// A compiler with the built-in `oppy::respond` and `oppy::redirect`.
    pub fn new() -> Self {
        let mut compiler = Self::empty();
        compiler.register("oppy::respond", |options, _| {
            Ok(Arc::new(RespondHandler::from_options(options)?) as Arc<dyn Handler>)
        });
        compiler.register("oppy::redirect", |options, _| {
            Ok(Arc::new(RedirectHandler::from_options(options)?) as Arc<dyn Handler>)
        });
        compiler
    }

    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory under a qualified name (`namespace::name`).
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(toml::Value, &CompileContext<'_>) -> Result<Arc<dyn Handler>, CompileError> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    fn resolve(&self, name: &str, imports: &[String]) -> Option<&HandlerFactory> {
        if name.contains("::") {
            return self.factories.get(name);
        }
        std::iter::once(BUILTIN_NAMESPACE)
            .chain(imports.iter().map(String::as_str))
            .find_map(|namespace| self.factories.get(&format!("{namespace}::{name}")))
    }
}

impl Default for DeclarativeCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionCompiler for DeclarativeCompiler {
    fn compile(&self, source: &str, ctx: &CompileContext<'_>) -> Result<CompiledUnit, CompileError> {
        let document: toml::Table = toml::from_str(source)?;
        if !document.contains_key("handler") {
            return Ok(CompiledUnit::Unrecognized(
                "document does not name a handler".to_string(),
            ));
        }
        let unit: UnitSource = toml::Value::Table(document).try_into()?;

        let factory = self
            .resolve(&unit.handler, ctx.imports)
            .ok_or_else(|| CompileError::UnknownHandler(unit.handler.clone()))?;
        let handler = factory(toml::Value::Table(unit.options), ctx)?;

        if unit.standalone {
            return Ok(CompiledUnit::Standalone(handler));
        }
        match unit.matching {
            Some(mode) => Ok(CompiledUnit::HandlerWithMode(handler, mode.parse()?)),
            None => Ok(CompiledUnit::Handler(handler)),
        }
    }
}

fn invalid(handler: &str, message: impl ToString) -> CompileError {
    CompileError::InvalidOptions {
        handler: handler.to_string(),
        message: message.to_string(),
    }
}

fn status(handler: &str, code: u16) -> Result<StatusCode, CompileError> {
    StatusCode::from_u16(code).map_err(|e| invalid(handler, e))
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RespondOptions {
    status: u16,
    body: String,
    content_type: Option<String>,
    headers: BTreeMap<String, String>,
}

impl Default for RespondOptions {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
            content_type: None,
            headers: BTreeMap::new(),
        }
    }
}

/// Answers every request it owns with a fixed response.
#[derive(Debug)]
pub struct RespondHandler {
    status: StatusCode,
    body: String,
    headers: HeaderMap,
}

impl RespondHandler {
    fn from_options(options: toml::Value) -> Result<Self, CompileError> {
        const NAME: &str = "respond";
        let options: RespondOptions = options.try_into().map_err(|e| invalid(NAME, e))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(NAME, e))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(NAME, e))?;
            headers.insert(name, value);
        }
        let content_type = options.content_type.as_deref().unwrap_or("text/plain; charset=utf-8");
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).map_err(|e| invalid(NAME, e))?,
        );

        Ok(Self {
            status: status(NAME, options.status)?,
            body: options.body,
            headers,
        })
    }
}

#[async_trait]
impl Handler for RespondHandler {
    fn name(&self) -> &str {
        "respond"
    }

    async fn handle(&self, _ctx: RequestContext, _next: Next<'_>) -> HandlerResult {
        let mut response = (self.status, Body::from(self.body.clone())).into_response();
        response.headers_mut().extend(self.headers.clone());
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct RedirectOptions {
    location: String,
    #[serde(default = "default_redirect_status")]
    status: u16,
}

fn default_redirect_status() -> u16 {
    302
}

/// Redirects every request it owns to a fixed location.
#[derive(Debug)]
pub struct RedirectHandler {
    status: StatusCode,
    location: HeaderValue,
}

impl RedirectHandler {
    fn from_options(options: toml::Value) -> Result<Self, CompileError> {
        const NAME: &str = "redirect";
        let options: RedirectOptions = options.try_into().map_err(|e| invalid(NAME, e))?;
        let status = status(NAME, options.status)?;
        if !status.is_redirection() {
            return Err(invalid(NAME, format!("{status} is not a redirect status")));
        }
        Ok(Self {
            status,
            location: HeaderValue::from_str(&options.location).map_err(|e| invalid(NAME, e))?,
        })
    }
}

#[async_trait]
impl Handler for RedirectHandler {
    fn name(&self) -> &str {
        "redirect"
    }

    async fn handle(&self, _ctx: RequestContext, _next: Next<'_>) -> HandlerResult {
        let mut response = self.status.into_response();
        response
            .headers_mut()
            .insert(header::LOCATION, self.location.clone());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(source: &str) -> Result<CompiledUnit, CompileError> {
        let handler_context = HandlerContext::new("test", "/srv", Arc::new(json!({})));
        let imports = vec!["site".to_string()];
        let ctx = CompileContext {
            source_path: Path::new("/srv/page.unit"),
            handler_context: &handler_context,
            imports: &imports,
        };
        let mut compiler = DeclarativeCompiler::new();
        compiler.register("site::hello", |_, _| {
            Ok(Arc::new(RespondHandler::from_options(toml::Value::Table(Default::default()))?) as Arc<dyn Handler>)
        });
        compiler.compile(source, &ctx)
    }

    #[test]
    fn bare_handler_uses_default_mode() {
        let unit = compile("handler = \"respond\"\n[options]\nbody = \"hi\"\n").unwrap();
        assert!(matches!(unit, CompiledUnit::Handler(h) if h.name() == "respond"));
    }

    #[test]
    fn matching_mode_is_carried() {
        let unit = compile("handler = \"oppy::redirect\"\nmatching = \"ExactMatch\"\n[options]\nlocation = \"/x\"\n")
            .unwrap();
        assert!(matches!(
            unit,
            CompiledUnit::HandlerWithMode(_, mode) if mode == PathMatchingMode::EXACT_MATCH
        ));
    }

    #[test]
    fn standalone_flag_wins() {
        let unit = compile("handler = \"respond\"\nmatching = \"AnyMatching\"\nstandalone = true\n").unwrap();
        assert!(matches!(unit, CompiledUnit::Standalone(_)));
    }

    #[test]
    fn imports_resolve_bare_names() {
        let unit = compile("handler = \"hello\"\n").unwrap();
        assert!(matches!(unit, CompiledUnit::Handler(_)));
    }

    #[test]
    fn documents_without_handler_are_unrecognized() {
        assert!(matches!(compile("title = \"just data\"\n"), Ok(CompiledUnit::Unrecognized(_))));
    }

    #[test]
    fn broken_sources_fail() {
        assert!(matches!(compile("handler = "), Err(CompileError::Parse(_))));
        assert!(matches!(compile("handler = \"nope\"\n"), Err(CompileError::UnknownHandler(_))));
        assert!(matches!(
            compile("handler = \"redirect\"\n[options]\nlocation = \"/x\"\nstatus = 200\n"),
            Err(CompileError::InvalidOptions { .. })
        ));
        assert!(matches!(
            compile("handler = \"respond\"\nmatching = \"Sideways\"\n"),
            Err(CompileError::InvalidMatching(_))
        ));
    }

    #[tokio::test]
    async fn respond_handler_builds_its_response() {
        let handler = RespondHandler::from_options(
            toml::from_str::<toml::Value>(
                "status = 201\nbody = \"made\"\ncontent_type = \"text/html\"\n[headers]\nx-unit = \"yes\"\n",
            )
            .unwrap(),
        )
        .unwrap();
        let chain = crate::content::handler::HandlerChain::aggregate(&[Arc::new(handler) as Arc<dyn Handler>]);
        let request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let fallback = |_ctx: RequestContext| -> futures_util::future::BoxFuture<'static, Response> {
            Box::pin(async { StatusCode::NOT_FOUND.into_response() })
        };
        let response = chain
            .handle(RequestContext::new(request, 80, None), &fallback)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-unit"], "yes");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
    }
}
