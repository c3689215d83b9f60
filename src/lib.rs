//! notirelay - Multi-channel notification relay with live-reloading providers
//!
//! Provider instances (Telegram, SMTP) are built from JSON files in a watched
//! directory and kept in a registry that is updated in place as files change.
//! Delivery outcomes are persisted asynchronously in batches. External
//! dependencies sit behind traits for testability.

pub mod traits;
pub mod mocks;
pub mod production;

pub mod config_watcher;
pub mod debounce;
pub mod dispatch;
pub mod notification;
pub mod notification_logger;
pub mod provider_config;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod settings;

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config_watcher::{ConfigWatcher, ReloadOutcome};
pub use dispatch::{DispatchError, DispatchOutcome, Dispatcher};
pub use notification::{DeliveryLogEntry, Notification, NotificationRequest};
pub use notification_logger::{LoggerSettings, NotificationLogger};
pub use providers::ProviderFactory;
pub use registry::{ProviderRegistry, RegistryError};
pub use settings::RelayConfig;

/// Install logging to stdout and, when `log_dir` is set, a daily rolling file
///
/// The returned guard flushes the file writer on drop; hold it until exit.
pub fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(rolling::daily(dir, "notirelay.log"));
            let layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "notirelay=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
