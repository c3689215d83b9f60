use std::sync::Arc;

use notirelay::production::{NotifyWatcher, SqliteLogSink};
use notirelay::traits::FileWatcher;
use notirelay::{
    init_tracing, ConfigWatcher, Dispatcher, NotificationLogger, ProviderFactory, ProviderRegistry, RelayConfig,
};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::from_env()?;
    let _guard = init_tracing(config.log_dir.as_deref())?;

    tracing::info!(
        config_dir = %config.config_dir.display(),
        db_path = %config.db_path.display(),
        "notirelay starting up"
    );

    let sink = Arc::new(SqliteLogSink::open(&config.db_path)?);
    let logger = Arc::new(NotificationLogger::spawn(sink, config.logger.clone()));

    std::fs::create_dir_all(&config.config_dir)?;
    let registry = Arc::new(ProviderRegistry::new());
    let watcher = ConfigWatcher::new(
        config.config_dir.clone(),
        registry.clone(),
        Arc::new(ProviderFactory::production()),
        config.debounce,
    );

    // Events queue up while the bootstrap load runs; unchanged files are skipped on replay
    let (tx, rx) = mpsc::unbounded_channel();
    let fs_watcher = NotifyWatcher::new(tx)?;
    fs_watcher.watch(config.config_dir.clone())?;

    let loaded = watcher.load_existing()?;
    tracing::info!(providers = loaded, "Loaded existing provider configs");
    watcher.spawn(rx);

    let dispatcher = Dispatcher::new(registry.clone(), logger.clone(), config.send_timeout);

    for (id, status) in registry.statuses().await {
        tracing::info!(provider_id = %id, state = ?status.state, detail = ?status.detail, "Provider status");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    if let Err(e) = fs_watcher.unwatch(config.config_dir.clone()) {
        tracing::warn!(error = %e, "Failed to stop filesystem watcher");
    }
    watcher.stop().await;
    dispatcher.shutdown();
    if let Err(e) = registry.clear() {
        tracing::warn!(error = %e, "Some providers failed to close");
    }
    if let Err(e) = logger.close().await {
        tracing::error!(error = %e, "Notification logger did not drain cleanly");
    }

    tracing::info!("notirelay stopped");
    Ok(())
}
