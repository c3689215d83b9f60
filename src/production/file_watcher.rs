//! Filesystem watcher backed by the `notify` crate
//!
//! Raw events are forwarded one path at a time; collapsing bursts is the
//! config watcher's job.

use std::path::PathBuf;

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::traits::{EventSender, FileEvent, FileEventKind, FileWatcher, FileWatcherError};

pub struct NotifyWatcher {
    watcher: Mutex<RecommendedWatcher>,
    watched_paths: Mutex<Vec<PathBuf>>,
}

impl NotifyWatcher {
    pub fn new(events: EventSender) -> Result<Self, FileWatcherError> {
        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                let Some(kind) = classify(&event.kind) else {
                    return;
                };
                for path in event.paths {
                    tracing::trace!(path = %path.display(), kind = ?kind, "Filesystem event");
                    // Receiver gone means the service is shutting down
                    let _ = events.send(FileEvent::new(path, kind));
                }
            }
            Err(e) => tracing::error!(error = %e, "Filesystem watch error"),
        })
        .map_err(|e| FileWatcherError::WatchError(e.to_string()))?;

        Ok(Self {
            watcher: Mutex::new(watcher),
            watched_paths: Mutex::new(Vec::new()),
        })
    }
}

fn classify(kind: &EventKind) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(FileEventKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FileEventKind::Created),
        EventKind::Modify(_) => Some(FileEventKind::Modified),
        EventKind::Remove(_) => Some(FileEventKind::Removed),
        _ => None,
    }
}

impl FileWatcher for NotifyWatcher {
    fn watch(&self, path: PathBuf) -> Result<(), FileWatcherError> {
        if !path.exists() {
            return Err(FileWatcherError::PathNotFound(path));
        }

        self.watcher
            .lock()
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| FileWatcherError::WatchError(e.to_string()))?;

        let mut watched = self.watched_paths.lock();
        if !watched.contains(&path) {
            watched.push(path.clone());
        }
        tracing::info!(path = %path.display(), "Watching directory");
        Ok(())
    }

    fn unwatch(&self, path: PathBuf) -> Result<(), FileWatcherError> {
        self.watcher
            .lock()
            .unwatch(&path)
            .map_err(|e| FileWatcherError::WatchError(e.to_string()))?;

        self.watched_paths.lock().retain(|p| p != &path);
        tracing::info!(path = %path.display(), "Stopped watching directory");
        Ok(())
    }

    fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched_paths.lock().clone()
    }
}
