//! Config Watcher - keeps the registry in sync with the config directory
//!
//! Filesystem events flow through three stages:
//!
//! 1. event loop: drops non-`.json` paths, arms the per-path debouncer
//! 2. debouncer: collapses bursts, forwards the settled path
//! 3. reload loop: loads the file and creates, replaces or removes the provider
//!
//! The reload loop is the only writer driven by the filesystem, so reloads are
//! applied one at a time. A load or parse failure leaves the registry untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::debounce::Debouncer;
use crate::provider_config::{self, ConfigError};
use crate::providers::ProviderFactory;
use crate::registry::{ProviderRegistry, RegistryError};
use crate::traits::FileEvent;

/// What a single reload did to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Created,
    Replaced,
    /// Checksum matched the installed provider
    Unchanged,
    Removed,
    /// Disabled record with nothing installed, or deleted file with nothing installed
    Skipped,
    /// Not a provider config file
    Ignored,
    /// Load, parse or validation failed; registry untouched
    Rejected,
}

/// Applies single config file changes to the registry
struct Reloader {
    registry: Arc<ProviderRegistry>,
    factory: Arc<ProviderFactory>,
}

impl Reloader {
    fn apply(&self, path: &Path) -> ReloadOutcome {
        let Some(file_id) = provider_config::provider_id_from_path(path) else {
            return ReloadOutcome::Ignored;
        };

        if !path.exists() {
            return self.remove(&file_id, "config file deleted");
        }

        let record = match provider_config::load_record(path) {
            Ok(record) => record,
            Err(e) => {
                log_load_failure(path, &e);
                return ReloadOutcome::Rejected;
            }
        };

        if !record.enabled {
            if self.registry.contains(&record.id) {
                return self.remove(&record.id, "provider disabled");
            }
            tracing::debug!(provider_id = %record.id, "Provider disabled, nothing installed");
            return ReloadOutcome::Skipped;
        }

        match self.registry.get(&record.id) {
            Err(_) => {
                let provider = self.factory.build_or_failed(&record);
                match self.registry.register(provider) {
                    Ok(()) => {
                        tracing::info!(
                            provider_id = %record.id,
                            provider_type = %record.kind,
                            checksum = %record.checksum,
                            "Provider created from config"
                        );
                        ReloadOutcome::Created
                    }
                    Err(e) => {
                        tracing::error!(provider_id = %record.id, error = %e, "Failed to register provider");
                        ReloadOutcome::Rejected
                    }
                }
            }
            Ok(existing) if existing.config_checksum() == record.checksum => {
                tracing::debug!(provider_id = %record.id, "Config unchanged, skipping reload");
                ReloadOutcome::Unchanged
            }
            Ok(_) => {
                let provider = self.factory.build_or_failed(&record);
                match self.registry.replace(&record.id, provider) {
                    Ok(()) => ReloadOutcome::Replaced,
                    Err(e) => {
                        tracing::error!(provider_id = %record.id, error = %e, "Failed to replace provider");
                        ReloadOutcome::Rejected
                    }
                }
            }
        }
    }

    fn remove(&self, id: &str, reason: &str) -> ReloadOutcome {
        match self.registry.remove(id) {
            Ok(()) => {
                tracing::info!(provider_id = %id, reason, "Provider removed");
                ReloadOutcome::Removed
            }
            Err(RegistryError::NotFound(_)) => ReloadOutcome::Skipped,
            Err(e) => {
                // Entry is gone; only the close failed
                tracing::warn!(provider_id = %id, error = %e, "Provider removed with close error");
                ReloadOutcome::Removed
            }
        }
    }
}

fn log_load_failure(path: &Path, error: &ConfigError) {
    tracing::error!(
        path = %path.display(),
        error = %error,
        "Failed to load provider config, keeping current provider state"
    );
}

/// Watches one config directory and mirrors it into the registry
pub struct ConfigWatcher {
    config_dir: PathBuf,
    reloader: Arc<Reloader>,
    debouncer: Arc<Debouncer<PathBuf>>,
    reload_rx: Mutex<Option<mpsc::UnboundedReceiver<PathBuf>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConfigWatcher {
    pub fn new(
        config_dir: PathBuf,
        registry: Arc<ProviderRegistry>,
        factory: Arc<ProviderFactory>,
        debounce: Duration,
    ) -> Self {
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(debounce, move |path: PathBuf| {
            // Receiver is gone only after stop()
            let _ = reload_tx.send(path);
        });

        Self {
            config_dir,
            reloader: Arc::new(Reloader { registry, factory }),
            debouncer: Arc::new(debouncer),
            reload_rx: Mutex::new(Some(reload_rx)),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Apply every config file already present; returns how many providers were installed
    pub fn load_existing(&self) -> Result<usize, ConfigError> {
        let scan = provider_config::load_directory(&self.config_dir)?;

        for (path, error) in &scan.failures {
            log_load_failure(path, error);
        }

        let installed = scan
            .records
            .iter()
            .filter(|(path, _)| {
                matches!(self.apply_change(path), ReloadOutcome::Created | ReloadOutcome::Replaced)
            })
            .count();

        tracing::info!(
            dir = %self.config_dir.display(),
            installed,
            failed = scan.failures.len(),
            "Loaded initial provider configs"
        );
        Ok(installed)
    }

    /// Process one path immediately, bypassing the debouncer
    pub fn apply_change(&self, path: &Path) -> ReloadOutcome {
        self.reloader.apply(path)
    }

    /// Start consuming filesystem events. Call once; later calls are ignored.
    pub fn spawn(&self, mut events: mpsc::UnboundedReceiver<FileEvent>) {
        let Some(mut reload_rx) = self.reload_rx.lock().take() else {
            tracing::warn!("Config watcher already started");
            return;
        };

        let shutdown = self.shutdown.clone();
        let debouncer = Arc::clone(&self.debouncer);
        let event_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            if !provider_config::is_config_file(&event.path) {
                                continue;
                            }
                            tracing::debug!(path = %event.path.display(), kind = ?event.kind, "Config file event");
                            debouncer.notify(event.path);
                        }
                        None => {
                            tracing::warn!("File event channel closed");
                            break;
                        }
                    },
                }
            }
            tracing::debug!("Config event loop stopped");
        });

        let shutdown = self.shutdown.clone();
        let reloader = Arc::clone(&self.reloader);
        let reload_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    path = reload_rx.recv() => match path {
                        Some(path) => {
                            // File reads and provider construction block
                            let worker = Arc::clone(&reloader);
                            let target = path.clone();
                            match tokio::task::spawn_blocking(move || worker.apply(&target)).await {
                                Ok(outcome) => {
                                    tracing::debug!(path = %path.display(), outcome = ?outcome, "Applied config change");
                                }
                                Err(e) => {
                                    tracing::error!(path = %path.display(), error = %e, "Config reload task failed");
                                }
                            }
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("Config reload loop stopped");
        });

        self.tasks.lock().extend([event_loop, reload_loop]);
        tracing::info!(dir = %self.config_dir.display(), "Config watcher started");
    }

    /// Cancel pending timers and wait for the background tasks to exit
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.debouncer.shutdown();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Config watcher task ended abnormally");
            }
        }
        tracing::info!("Config watcher stopped");
    }
}
