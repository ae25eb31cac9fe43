//! Extension units: a compiled handler bound to its source file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::content::handler::Handler;
use crate::content::path::{oppy_path, oppy_path_unchecked};
use crate::scripting::matching::{PathMatcher, PathMatchingMode};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("unit has no source path attached")]
    NotAttached,

    #[error("unit source {0:?} has no parent directory")]
    NoParent(PathBuf),
}

/// A handler produced from one unit source, plus the rule deciding which
/// other paths it owns.
pub struct HandlerScript {
    handler: Arc<dyn Handler>,
    matcher: PathMatcher,
    script_path: Option<PathBuf>,
}

impl HandlerScript {
    pub fn new(handler: Arc<dyn Handler>, mode: PathMatchingMode) -> Self {
        Self::with_matcher(handler, PathMatcher::Mode(mode))
    }

    pub fn with_matcher(handler: Arc<dyn Handler>, matcher: PathMatcher) -> Self {
        Self {
            handler,
            matcher,
            script_path: None,
        }
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    pub fn script_path(&self) -> Option<&Path> {
        self.script_path.as_deref()
    }

    pub fn set_script_path(&mut self, path: impl Into<PathBuf>) {
        self.script_path = Some(path.into());
    }

    /// Whether this unit owns the entry at `disk_path`.
    pub fn matches(&self, disk_path: &Path) -> Result<bool, UnitError> {
        let script = self.script_path.as_deref().ok_or(UnitError::NotAttached)?;
        Ok(self.matcher.matches(script, disk_path))
    }

    /// Every oppy path this unit owns below its own directory, found in one
    /// walk: matching files, matching directories (and their subtrees), and
    /// the extension-less stem path of the unit itself.
    ///
    /// Touches the disk; run off the async executor.
    pub fn collect_matches(&self, www_dir: &Path) -> Result<Vec<String>, UnitError> {
        let script = self.script_path.as_deref().ok_or(UnitError::NotAttached)?;
        let dir = script
            .parent()
            .ok_or_else(|| UnitError::NoParent(script.to_path_buf()))?;

        let mut routes = Vec::new();
        self.add_matches(script, dir, www_dir, false, &mut routes);
        routes.sort();
        routes.dedup();
        Ok(routes)
    }

    fn add_matches(&self, script: &Path, dir: &Path, www_dir: &Path, dir_matched: bool, routes: &mut Vec<String>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::debug!(?dir, error = %error, "Skipping unreadable directory");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                if self.matcher.matches(script, &path) {
                    routes.extend(oppy_path(&path, www_dir));
                    self.add_matches(script, &path, www_dir, true, routes);
                }
                continue;
            }

            let is_index = entry
                .file_name()
                .to_string_lossy()
                .to_lowercase()
                .starts_with("index");
            if dir_matched && is_index {
                routes.extend(oppy_path(dir, www_dir));
            }
            if self.matcher.matches(script, &path) {
                routes.extend(oppy_path(&path, www_dir));
            }
            if path == script {
                routes.extend(oppy_path_unchecked(&script.with_extension(""), www_dir));
            }
        }
    }
}

impl fmt::Debug for HandlerScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerScript")
            .field("handler", &self.handler.name())
            .field("matcher", &self.matcher)
            .field("script_path", &self.script_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::context::RequestContext;
    use crate::content::handler::{HandlerResult, Next};
    use async_trait::async_trait;
    use std::fs;

    struct Nop;

    #[async_trait]
    impl Handler for Nop {
        async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> HandlerResult {
            next.run(ctx).await
        }
    }

    #[test]
    fn matching_requires_an_attached_source() {
        let unit = HandlerScript::new(Arc::new(Nop), PathMatchingMode::DEFAULT);
        assert_eq!(unit.matches(Path::new("/x")), Err(UnitError::NotAttached));
        assert_eq!(unit.collect_matches(Path::new("/")), Err(UnitError::NotAttached));
    }

    #[test]
    fn collects_the_owned_route_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let a = root.join("a");
        fs::create_dir_all(a.join("widget/sub")).unwrap();
        fs::create_dir_all(a.join("elsewhere")).unwrap();
        for file in [
            "widget.unit",
            "widget.html",
            "other.html",
            "widget/index.html",
            "widget/sub/page.html",
            "elsewhere/widget.html",
        ] {
            fs::write(a.join(file), b"x").unwrap();
        }

        let mut unit = HandlerScript::new(Arc::new(Nop), PathMatchingMode::ANY_MATCHING);
        unit.set_script_path(a.join("widget.unit"));

        assert_eq!(
            unit.collect_matches(&root).unwrap(),
            vec![
                "/a/widget",
                "/a/widget.html",
                "/a/widget.unit",
                "/a/widget/index.html",
                "/a/widget/sub",
                "/a/widget/sub/page.html",
            ]
        );
    }
}
