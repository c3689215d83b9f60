//! End-to-end tests for the relay pipeline.
//!
//! Tests the full flow: config file -> notify event -> debounce -> registry,
//! and request -> provider -> async logger -> SQLite.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

use notirelay::mocks::{MailBehavior, RecordedMailTransport, RecordedTelegramApi};
use notirelay::production::{NotifyWatcher, SqliteLogSink};
use notirelay::provider_config::{compute_checksum, ProviderRecord};
use notirelay::retry::RetryPolicy;
use notirelay::traits::{
    FileWatcher, MailError, MailTransport, ProviderKind, ProviderState, TelegramApi,
};
use notirelay::{
    ConfigWatcher, DispatchError, Dispatcher, LoggerSettings, NotificationLogger, NotificationRequest,
    ProviderFactory, ProviderRegistry,
};

const DEBOUNCE: Duration = Duration::from_millis(100);

struct Relay {
    dir: TempDir,
    registry: Arc<ProviderRegistry>,
    watcher: ConfigWatcher,
    _fs: NotifyWatcher,
    transport: Arc<RecordedMailTransport>,
    mail_builds: Arc<AtomicUsize>,
}

/// Config watcher on a temp dir, fed by a real filesystem watcher
fn start_relay() -> Relay {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(ProviderRegistry::new());
    let transport = Arc::new(RecordedMailTransport::success());
    let mail_builds = Arc::new(AtomicUsize::new(0));

    let shared = transport.clone();
    let builds = mail_builds.clone();
    let factory = ProviderFactory::new(
        |_| Ok(Arc::new(RecordedTelegramApi::success()) as Arc<dyn TelegramApi>),
        move |_| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(shared.clone() as Arc<dyn MailTransport>)
        },
    )
    .with_retry_policy(RetryPolicy::default().with_delays(Duration::from_millis(10), Duration::from_millis(20)));

    let watcher = ConfigWatcher::new(dir.path().to_path_buf(), registry.clone(), Arc::new(factory), DEBOUNCE);
    let (tx, rx) = mpsc::unbounded_channel();
    let fs = NotifyWatcher::new(tx).unwrap();
    fs.watch(dir.path().to_path_buf()).unwrap();
    watcher.spawn(rx);

    Relay { dir, registry, watcher, _fs: fs, transport, mail_builds }
}

fn email_config(from: &str) -> serde_json::Value {
    json!({"host": "smtp.example.com", "port": 587, "from": from})
}

fn write_config(dir: &Path, id: &str, kind: &str, enabled: bool, config: serde_json::Value) -> PathBuf {
    let path = dir.join(format!("{}.json", id));
    let body = json!({"id": id, "type": kind, "enabled": enabled, "config": config});
    std::fs::write(&path, serde_json::to_vec_pretty(&body).unwrap()).unwrap();
    path
}

async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for: {}", what);
}

#[tokio::test]
async fn test_file_lifecycle_drives_registry() {
    let relay = start_relay();

    // Create
    write_config(relay.dir.path(), "a", "email", true, email_config("x@example.com"));
    eventually("provider a created", || relay.registry.contains("a")).await;

    let first = relay.registry.get("a").unwrap();
    let expected = compute_checksum(
        "a",
        ProviderKind::Email,
        true,
        email_config("x@example.com").as_object().unwrap(),
    );
    assert_eq!(first.config_checksum(), expected);
    assert_eq!(first.status().await.state, ProviderState::Active);

    // Modify
    write_config(relay.dir.path(), "a", "email", true, email_config("y@example.com"));
    eventually("provider a replaced", || {
        relay.registry.get("a").map(|p| p.config_checksum() != expected).unwrap_or(false)
    })
    .await;
    let second = relay.registry.get("a").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(first.is_closed());
    assert!(!second.is_closed());
    assert_eq!(relay.mail_builds.load(Ordering::SeqCst), 2);

    // Delete
    std::fs::remove_file(relay.dir.path().join("a.json")).unwrap();
    eventually("provider a removed", || !relay.registry.contains("a")).await;
    assert!(second.is_closed());

    relay.watcher.stop().await;
}

#[tokio::test]
async fn test_broken_file_does_not_block_siblings() {
    let relay = start_relay();

    std::fs::write(relay.dir.path().join("bad.json"), b"{ not json").unwrap();
    write_config(relay.dir.path(), "good", "email", true, email_config("x@example.com"));

    eventually("sibling created", || relay.registry.contains("good")).await;
    assert!(!relay.registry.contains("bad"));
    assert_eq!(relay.registry.count(), 1);

    relay.watcher.stop().await;
}

#[tokio::test]
async fn test_disabling_removes_provider() {
    let relay = start_relay();

    write_config(relay.dir.path(), "mail", "email", true, email_config("x@example.com"));
    eventually("provider created", || relay.registry.contains("mail")).await;

    write_config(relay.dir.path(), "mail", "email", false, email_config("x@example.com"));
    eventually("provider removed", || !relay.registry.contains("mail")).await;

    relay.watcher.stop().await;
}

#[tokio::test]
async fn test_invalid_token_installs_failed_placeholder() {
    let relay = start_relay();

    write_config(
        relay.dir.path(),
        "tg",
        "telegram",
        true,
        json!({"bot_token": "not-a-token", "chat_id": "1001"}),
    );
    eventually("placeholder installed", || relay.registry.contains("tg")).await;

    let statuses = relay.registry.statuses().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].1.state, ProviderState::Error);
    assert!(statuses[0].1.error_message.as_deref().unwrap().contains("bot_token"));

    let provider = relay.registry.get("tg").unwrap();
    let cancel = tokio_util::sync::CancellationToken::new();
    let notification = notirelay::Notification::new("n-1", "tg", "1001", "hello");
    assert!(provider.send(&notification, &cancel).await.is_err());
    assert!(provider.test(&cancel).await.is_err());

    relay.watcher.stop().await;
}

#[tokio::test]
async fn test_existing_configs_loaded_at_startup() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), "one", "email", true, email_config("x@example.com"));
    write_config(dir.path(), "two", "email", false, email_config("x@example.com"));
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let registry = Arc::new(ProviderRegistry::new());
    let factory = ProviderFactory::new(
        |_| Ok(Arc::new(RecordedTelegramApi::success()) as Arc<dyn TelegramApi>),
        |_| Ok(Arc::new(RecordedMailTransport::success()) as Arc<dyn MailTransport>),
    );
    let watcher = ConfigWatcher::new(dir.path().to_path_buf(), registry.clone(), Arc::new(factory), DEBOUNCE);

    assert_eq!(watcher.load_existing().unwrap(), 1);
    let ids: Vec<String> = registry.list().iter().map(|p| p.id().to_string()).collect();
    assert_eq!(ids, vec!["one".to_string()]);
}

#[tokio::test]
async fn test_file_written_during_bootstrap_is_not_missed() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(ProviderRegistry::new());
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let factory = ProviderFactory::new(
        |_| Ok(Arc::new(RecordedTelegramApi::success()) as Arc<dyn TelegramApi>),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(RecordedMailTransport::success()) as Arc<dyn MailTransport>)
        },
    );
    let watcher = ConfigWatcher::new(dir.path().to_path_buf(), registry.clone(), Arc::new(factory), DEBOUNCE);

    // Same order as startup: watch, load, then consume events
    let (tx, rx) = mpsc::unbounded_channel();
    let fs = NotifyWatcher::new(tx).unwrap();
    fs.watch(dir.path().to_path_buf()).unwrap();

    write_config(dir.path(), "early", "email", true, email_config("x@example.com"));
    assert_eq!(watcher.load_existing().unwrap(), 1);
    write_config(dir.path(), "late", "email", true, email_config("x@example.com"));
    watcher.spawn(rx);

    eventually("late provider created", || registry.contains("late")).await;
    // Queued events for the bootstrap file replay as unchanged
    tokio::time::sleep(DEBOUNCE * 3).await;
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(registry.count(), 2);

    watcher.stop().await;
}

#[tokio::test]
async fn test_dispatch_outcomes_reach_sqlite() {
    let relay = start_relay();
    let db_dir = TempDir::new().unwrap();
    let sink = Arc::new(SqliteLogSink::open(&db_dir.path().join("logs.db")).unwrap());
    let logger = Arc::new(NotificationLogger::spawn(
        sink.clone(),
        LoggerSettings {
            batch_size: 10,
            flush_interval: Duration::from_millis(100),
            ..LoggerSettings::default()
        },
    ));
    let dispatcher = Dispatcher::new(relay.registry.clone(), logger.clone(), Duration::from_secs(5));

    write_config(relay.dir.path(), "mail", "email", true, email_config("relay@example.com"));
    eventually("provider created", || relay.registry.contains("mail")).await;

    // Delivered after two transient failures
    relay.transport.set_behavior(MailBehavior::FailThenSucceed {
        fail_count: 2,
        error: MailError::Transient("421 try again later".into()),
    });
    let outcome = dispatcher
        .dispatch(NotificationRequest::new("mail", "ops@example.com", "disk almost full").with_subject("Alert"))
        .await
        .unwrap();
    assert_eq!(outcome.attempts, 3);

    // Rejected outright
    relay.transport.set_behavior(MailBehavior::AlwaysFail(MailError::Permanent("550 no such user".into())));
    let err = dispatcher
        .dispatch(NotificationRequest::new("mail", "ghost@example.com", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Delivery { .. }));

    // Self-test goes to the sender address
    relay.transport.set_behavior(MailBehavior::AlwaysSucceed);
    dispatcher.test_provider("mail").await.unwrap();

    logger.close().await.unwrap();
    let rows = sink.recent(10).unwrap();
    assert_eq!(rows.len(), 3);

    assert!(rows[0].is_test);
    assert_eq!(rows[0].recipient, "relay@example.com");

    assert_eq!(rows[1].status, "failed");
    assert_eq!(rows[1].attempts, 1);
    assert!(rows[1].error_message.as_deref().unwrap().starts_with("non-retryable error"));

    assert_eq!(rows[2].status, "sent");
    assert_eq!(rows[2].attempts, 3);
    assert_eq!(rows[2].notification_id, outcome.notification_id);

    relay.watcher.stop().await;
}

#[test]
fn test_record_rejects_bad_ids() {
    assert!(ProviderRecord::new("Ops_Team", ProviderKind::Email, true, Default::default()).is_err());
    assert!(ProviderRecord::new("ops-team", ProviderKind::Email, true, Default::default()).is_ok());
}
