//! File watching trait for the provider configuration directory

use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum FileWatcherError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
    #[error("Watch error: {0}")]
    WatchError(String),
}

/// Event emitted when a watched file changes
#[derive(Debug, Clone, PartialEq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl FileEvent {
    pub fn new(path: PathBuf, kind: FileEventKind) -> Self {
        Self {
            path,
            kind,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Removed,
}

/// Channel on which watchers publish events
pub type EventSender = mpsc::UnboundedSender<FileEvent>;

/// Trait for file system watching
///
/// Production: inotify/FSEvents via `notify` crate
/// Testing: Manual event emission
#[cfg_attr(test, mockall::automock)]
pub trait FileWatcher: Send + Sync {
    /// Start watching a directory (non-recursive)
    fn watch(&self, path: PathBuf) -> Result<(), FileWatcherError>;

    /// Stop watching a path
    fn unwatch(&self, path: PathBuf) -> Result<(), FileWatcherError>;

    /// Get the list of currently watched paths
    fn watched_paths(&self) -> Vec<PathBuf>;
}
