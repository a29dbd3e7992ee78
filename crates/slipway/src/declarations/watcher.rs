//! File system watcher for the declarations directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use tokio::sync::broadcast;

use super::error::{LoaderError, Result};

const DEBOUNCE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    /// Created or modified; the debouncer merges the two.
    Modified,
    Deleted,
}

/// Emitted when a declaration file changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationChange {
    pub change: FileChange,
    /// Relative to the declarations directory.
    pub path: PathBuf,
}

pub struct DeclarationWatcher {
    dir: PathBuf,
    sender: broadcast::Sender<DeclarationChange>,
    shutdown: Arc<AtomicBool>,
}

impl DeclarationWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            dir: dir.into(),
            sender,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeclarationChange> {
        self.sender.subscribe()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Watches the directory until [`DeclarationWatcher::stop`] is called.
    ///
    /// Blocks the calling thread.
    pub fn watch(&self) -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer: Debouncer<RecommendedWatcher> =
            new_debouncer(DEBOUNCE, tx).map_err(|e| LoaderError::Watch(e.to_string()))?;
        debouncer
            .watcher()
            .watch(&self.dir, RecursiveMode::Recursive)
            .map_err(|e| LoaderError::Watch(e.to_string()))?;

        log::info!("Watching declarations in {}", self.dir.display());

        while !self.shutdown.load(Ordering::Relaxed) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(events)) => {
                    for event in events {
                        if let Some(change) = self.process_event(&event) {
                            log::debug!(
                                "Declaration {:?}: {}",
                                change.change,
                                change.path.display()
                            );
                            let _ = self.sender.send(change);
                        }
                    }
                }
                Ok(Err(e)) => log::error!("Watch error: {}", e),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        log::info!("Stopped watching declarations");
        Ok(())
    }

    /// Keeps YAML files outside hidden directories; drops everything else.
    fn process_event(&self, event: &DebouncedEvent) -> Option<DeclarationChange> {
        let path = &event.path;
        let ext = path.extension().and_then(|e| e.to_str())?;
        if ext != "yaml" && ext != "yml" {
            return None;
        }

        let relative = path.strip_prefix(&self.dir).ok()?;
        let hidden = relative
            .components()
            .any(|c| c.as_os_str().to_str().is_some_and(|s| s.starts_with('.')));
        if hidden {
            return None;
        }

        let change = if path.exists() {
            FileChange::Modified
        } else {
            FileChange::Deleted
        };

        Some(DeclarationChange {
            change,
            path: relative.to_path_buf(),
        })
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Runs a [`DeclarationWatcher`] on a background thread.
pub struct BackgroundWatcher {
    watcher: Arc<DeclarationWatcher>,
    handle: Option<std::thread::JoinHandle<Result<()>>>,
}

impl BackgroundWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            watcher: Arc::new(DeclarationWatcher::new(dir)),
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let watcher = Arc::clone(&self.watcher);
        self.handle = Some(std::thread::spawn(move || {
            watcher.watch().inspect_err(|e| log::error!("Declaration watcher failed: {}", e))
        }));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeclarationChange> {
        self.watcher.subscribe()
    }

    pub fn stop(&mut self) {
        self.watcher.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
