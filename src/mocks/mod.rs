//! Test doubles for dependency injection
//!
//! In-memory implementations of every external seam: the Telegram Bot API,
//! SMTP, the log sink, the filesystem watcher, plus a provider that only
//! counts lifecycle calls.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

use crate::notification::{DeliveryLogEntry, Notification};
use crate::traits::{
    BotInfo, DeliveryError, DeliveryReceipt, EventSender, FileEvent, FileEventKind, FileWatcher,
    FileWatcherError, LogSink, MailError, MailTransport, OutgoingMail, OutgoingMessage, Provider,
    ProviderError, ProviderKind, ProviderStatus, SinkError, TelegramApi, TelegramApiError, TestDelivery,
};

// ============================================================================
// RecordedTelegramApi
// ============================================================================

/// Failure configuration for the Telegram API double
#[derive(Clone)]
pub enum TelegramBehavior {
    AlwaysSucceed,
    /// Fail N times, then succeed
    FailThenSucceed { fail_count: usize, error: TelegramApiError },
    AlwaysFail(TelegramApiError),
    Custom(Arc<dyn Fn(&OutgoingMessage) -> Result<i64, TelegramApiError> + Send + Sync>),
}

/// Records every outgoing message and answers per the configured behavior
#[derive(Clone)]
pub struct RecordedTelegramApi {
    messages: Arc<Mutex<Vec<OutgoingMessage>>>,
    behavior: Arc<Mutex<TelegramBehavior>>,
    probe_error: Arc<Mutex<Option<TelegramApiError>>>,
    call_count: Arc<AtomicUsize>,
}

impl RecordedTelegramApi {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            behavior: Arc::new(Mutex::new(TelegramBehavior::AlwaysSucceed)),
            probe_error: Arc::new(Mutex::new(None)),
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn success() -> Self {
        Self::new()
    }

    pub fn always_fail(error: TelegramApiError) -> Self {
        let api = Self::new();
        api.set_behavior(TelegramBehavior::AlwaysFail(error));
        api
    }

    pub fn set_behavior(&self, behavior: TelegramBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Make `get_me` fail with `error`
    pub fn set_probe_error(&self, error: Option<TelegramApiError>) {
        *self.probe_error.lock() = error;
    }

    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.messages.lock().clone()
    }

    /// Number of `send_message` calls, successful or not
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for RecordedTelegramApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelegramApi for RecordedTelegramApi {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<i64, TelegramApiError> {
        self.messages.lock().push(message.clone());
        let current = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        let behavior = self.behavior.lock().clone();
        match behavior {
            TelegramBehavior::AlwaysSucceed => Ok(current as i64),
            TelegramBehavior::FailThenSucceed { fail_count, error } => {
                if current <= fail_count {
                    Err(error)
                } else {
                    Ok(current as i64)
                }
            }
            TelegramBehavior::AlwaysFail(error) => Err(error),
            TelegramBehavior::Custom(func) => func(message),
        }
    }

    async fn get_me(&self) -> Result<BotInfo, TelegramApiError> {
        if let Some(error) = self.probe_error.lock().clone() {
            return Err(error);
        }
        Ok(BotInfo {
            id: 1,
            first_name: "Relay".to_string(),
            username: Some("relay_bot".to_string()),
        })
    }
}

// ============================================================================
// RecordedMailTransport
// ============================================================================

#[derive(Clone)]
pub enum MailBehavior {
    AlwaysSucceed,
    FailThenSucceed { fail_count: usize, error: MailError },
    AlwaysFail(MailError),
    Custom(Arc<dyn Fn(&OutgoingMail) -> Result<(), MailError> + Send + Sync>),
}

/// Records every outgoing mail and answers per the configured behavior
#[derive(Clone)]
pub struct RecordedMailTransport {
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
    behavior: Arc<Mutex<MailBehavior>>,
    probe_error: Arc<Mutex<Option<MailError>>>,
    call_count: Arc<AtomicUsize>,
}

impl RecordedMailTransport {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            behavior: Arc::new(Mutex::new(MailBehavior::AlwaysSucceed)),
            probe_error: Arc::new(Mutex::new(None)),
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn success() -> Self {
        Self::new()
    }

    pub fn always_fail(error: MailError) -> Self {
        let transport = Self::new();
        transport.set_behavior(MailBehavior::AlwaysFail(error));
        transport
    }

    pub fn set_behavior(&self, behavior: MailBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Make `test_connection` fail with `error`
    pub fn set_probe_error(&self, error: Option<MailError>) {
        *self.probe_error.lock() = error;
    }

    /// Every mail handed to the transport, including failed attempts
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for RecordedMailTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for RecordedMailTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        self.sent.lock().push(mail.clone());
        let current = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        let behavior = self.behavior.lock().clone();
        match behavior {
            MailBehavior::AlwaysSucceed => Ok(()),
            MailBehavior::FailThenSucceed { fail_count, error } => {
                if current <= fail_count {
                    Err(error)
                } else {
                    Ok(())
                }
            }
            MailBehavior::AlwaysFail(error) => Err(error),
            MailBehavior::Custom(func) => func(mail),
        }
    }

    async fn test_connection(&self) -> Result<(), MailError> {
        match self.probe_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ============================================================================
// InMemoryLogSink
// ============================================================================

/// Log sink that keeps batches in memory
///
/// `pause` makes writers block inside `write_batch` until `resume`, which lets
/// tests hold the logger's worker busy.
#[derive(Default)]
pub struct InMemoryLogSink {
    entries: Mutex<Vec<DeliveryLogEntry>>,
    batch_sizes: Mutex<Vec<usize>>,
    fail_writes: Mutex<bool>,
    paused: Mutex<bool>,
    unpaused: Condvar,
    writes_started: AtomicUsize,
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DeliveryLogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// Make every subsequent write fail
    pub fn set_failing(&self, failing: bool) {
        *self.fail_writes.lock() = failing;
    }

    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    pub fn resume(&self) {
        *self.paused.lock() = false;
        self.unpaused.notify_all();
    }

    /// Number of `write_batch` calls entered so far
    pub fn writes_started(&self) -> usize {
        self.writes_started.load(Ordering::SeqCst)
    }
}

impl LogSink for InMemoryLogSink {
    fn write_batch(&self, entries: &[DeliveryLogEntry]) -> Result<usize, SinkError> {
        self.writes_started.fetch_add(1, Ordering::SeqCst);

        let mut paused = self.paused.lock();
        while *paused {
            self.unpaused.wait(&mut paused);
        }
        drop(paused);

        if *self.fail_writes.lock() {
            return Err(SinkError::DatabaseError("simulated write failure".to_string()));
        }

        self.entries.lock().extend_from_slice(entries);
        self.batch_sizes.lock().push(entries.len());
        Ok(entries.len())
    }
}

// ============================================================================
// TrackingProvider
// ============================================================================

/// Provider that records sends and counts `close` calls
pub struct TrackingProvider {
    id: String,
    checksum: String,
    fail_close: bool,
    close_count: AtomicUsize,
    sent: Mutex<Vec<Notification>>,
}

impl TrackingProvider {
    pub fn new(id: &str, checksum: &str) -> Self {
        Self {
            id: id.to_string(),
            checksum: checksum.to_string(),
            fail_close: false,
            close_count: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Make `close` report an error (it is still counted)
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Provider for TrackingProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Telegram
    }

    fn config_checksum(&self) -> &str {
        &self.checksum
    }

    async fn send(
        &self,
        notification: &Notification,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        if cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled { attempts: 0 });
        }
        self.sent.lock().push(notification.clone());
        Ok(DeliveryReceipt { attempts: 1 })
    }

    async fn status(&self) -> ProviderStatus {
        ProviderStatus::active(&self.checksum)
    }

    fn test_recipient(&self) -> Result<String, DeliveryError> {
        Ok("tracking".to_string())
    }

    async fn test(&self, cancel: &CancellationToken) -> Result<TestDelivery, DeliveryError> {
        let notification = Notification::new(format!("test-{}", self.id), &self.id, "tracking", "test");
        let result = self.send(&notification, cancel).await;
        Ok(TestDelivery { notification, result })
    }

    fn close(&self) -> Result<(), ProviderError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(ProviderError::Close {
                id: self.id.clone(),
                message: "simulated close failure".to_string(),
            });
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

// ============================================================================
// ManualFileWatcher
// ============================================================================

/// Manual file watcher for testing
///
/// Does not touch the filesystem. Tests call `simulate_event` to publish
/// events on the channel the watcher was built with.
#[derive(Clone)]
pub struct ManualFileWatcher {
    watched: Arc<Mutex<Vec<PathBuf>>>,
    events: EventSender,
}

impl ManualFileWatcher {
    pub fn new(events: EventSender) -> Self {
        Self {
            watched: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    pub fn is_watching(&self, path: &PathBuf) -> bool {
        self.watched.lock().contains(path)
    }

    /// Publish an event; dropped silently once the receiver is gone
    pub fn simulate_event(&self, path: PathBuf, kind: FileEventKind) {
        let _ = self.events.send(FileEvent::new(path, kind));
    }
}

impl FileWatcher for ManualFileWatcher {
    fn watch(&self, path: PathBuf) -> Result<(), FileWatcherError> {
        let mut watched = self.watched.lock();
        if !watched.contains(&path) {
            watched.push(path);
        }
        Ok(())
    }

    fn unwatch(&self, path: PathBuf) -> Result<(), FileWatcherError> {
        self.watched.lock().retain(|p| p != &path);
        Ok(())
    }

    fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched.lock().clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChatId;
    use tokio::sync::mpsc;

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            chat_id: ChatId::Numeric(1),
            text: "hi".to_string(),
            parse_mode: None,
        }
    }

    #[tokio::test]
    async fn test_telegram_fail_then_succeed() {
        let api = RecordedTelegramApi::new();
        api.set_behavior(TelegramBehavior::FailThenSucceed {
            fail_count: 2,
            error: TelegramApiError::Timeout,
        });

        assert!(api.send_message(&message()).await.is_err());
        assert!(api.send_message(&message()).await.is_err());
        assert!(api.send_message(&message()).await.is_ok());
        assert_eq!(api.call_count(), 3);
        assert_eq!(api.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_telegram_probe_error() {
        let api = RecordedTelegramApi::success();
        assert!(api.get_me().await.is_ok());

        api.set_probe_error(Some(TelegramApiError::NetworkError("unreachable".into())));
        assert!(api.get_me().await.is_err());
    }

    #[tokio::test]
    async fn test_mail_custom_behavior() {
        let transport = RecordedMailTransport::new();
        transport.set_behavior(MailBehavior::Custom(Arc::new(|mail: &OutgoingMail| {
            if mail.to.ends_with("@blocked.example") {
                Err(MailError::Permanent("550 mailbox unavailable".into()))
            } else {
                Ok(())
            }
        })));

        let mut mail = OutgoingMail {
            from: "relay@example.com".into(),
            from_name: None,
            to: "ops@example.com".into(),
            subject: "s".into(),
            body: "b".into(),
        };
        assert!(transport.send(&mail).await.is_ok());
        mail.to = "x@blocked.example".into();
        assert!(matches!(transport.send(&mail).await, Err(MailError::Permanent(_))));
        assert_eq!(transport.sent().len(), 2);
    }

    #[test]
    fn test_tracking_provider_counts_close() {
        let p = TrackingProvider::new("ops", "c").failing_close();
        assert!(p.close().is_err());
        assert!(p.close().is_err());
        assert_eq!(p.close_count(), 2);
    }

    #[test]
    fn test_in_memory_sink_failure_toggle() {
        let sink = InMemoryLogSink::new();
        let n = Notification::new("n", "ops", "1", "hi");
        let entry = DeliveryLogEntry::sent(n, ProviderKind::Telegram, 1);

        sink.set_failing(true);
        assert!(sink.write_batch(&[entry.clone()]).is_err());
        sink.set_failing(false);
        assert_eq!(sink.write_batch(&[entry]).unwrap(), 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.writes_started(), 2);
    }

    #[test]
    fn test_manual_file_watcher() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = ManualFileWatcher::new(tx);
        let dir = PathBuf::from("/etc/notirelay/providers");

        watcher.watch(dir.clone()).unwrap();
        watcher.watch(dir.clone()).unwrap();
        assert!(watcher.is_watching(&dir));
        assert_eq!(watcher.watched_paths().len(), 1);

        watcher.simulate_event(dir.join("ops.json"), FileEventKind::Removed);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.path, dir.join("ops.json"));
        assert_eq!(event.kind, FileEventKind::Removed);

        watcher.unwatch(dir.clone()).unwrap();
        assert!(watcher.watched_paths().is_empty());
    }
}
