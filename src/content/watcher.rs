//! Content directory watcher.

use std::path::{Path, PathBuf};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Watches a content root and signals that something below it changed.
///
/// Events carry no payload: the registrar rescans the whole tree.
pub struct ContentWatcher {
    root: PathBuf,
    tx: mpsc::UnboundedSender<()>,
}

impl ContentWatcher {
    /// Create a watcher for `root` and the receiver it will signal.
    pub fn new(root: &Path) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                root: root.to_path_buf(),
                tx,
            },
            rx,
        )
    }

    /// Start watching. Dropping the returned handle stops the watch and
    /// closes the channel.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.tx;
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_access() => {}
                Ok(event) => {
                    tracing::trace!(kind = ?event.kind, paths = ?event.paths, "Content change detected");
                    let _ = tx.send(());
                }
                Err(e) => tracing::error!(error = %e, "Content watch error"),
            },
            Config::default(),
        )?;

        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        tracing::info!(path = ?self.root, "Content watcher started");
        Ok(watcher)
    }
}
