//! Async notification logger
//!
//! `log` never blocks: entries go onto a bounded queue and are dropped (and
//! counted) when it is full. A single background task drains the queue and
//! persists batches through a `LogSink`, flushing when a batch fills up or the
//! flush interval elapses. A failed batch is logged and discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::notification::DeliveryLogEntry;
use crate::traits::LogSink;

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("timeout waiting for logger to close after {0:?}")]
    ShutdownTimeout(Duration),
    #[error("logger worker failed: {0}")]
    WorkerFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggerSettings {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerStats {
    pub accepted: u64,
    pub dropped: u64,
    pub flushed: u64,
    pub failed_batches: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    failed_batches: AtomicU64,
}

pub struct NotificationLogger {
    sender: Mutex<Option<mpsc::Sender<DeliveryLogEntry>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    shutdown_timeout: Duration,
}

impl NotificationLogger {
    /// Start the background flush task. Must be called within a tokio runtime.
    pub fn spawn(sink: Arc<dyn LogSink>, settings: LoggerSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        let worker = tokio::spawn(run_worker(
            rx,
            sink,
            settings.batch_size.max(1),
            settings.flush_interval,
            Arc::clone(&counters),
        ));

        tracing::info!(
            queue_capacity = settings.queue_capacity,
            batch_size = settings.batch_size,
            flush_interval_ms = settings.flush_interval.as_millis() as u64,
            "Notification logger started"
        );

        Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            counters,
            shutdown_timeout: settings.shutdown_timeout,
        }
    }

    /// Queue an entry for persistence without waiting
    pub fn log(&self, entry: DeliveryLogEntry) {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(notification_id = %entry.notification.id, "Logger is closed, dropping log entry");
            return;
        };

        match tx.try_send(entry) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(entry)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    notification_id = %entry.notification.id,
                    provider_id = %entry.notification.provider_id,
                    "Log queue full, dropping log entry"
                );
            }
            Err(TrySendError::Closed(entry)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(notification_id = %entry.notification.id, "Logger worker gone, dropping log entry");
            }
        }
    }

    pub fn stats(&self) -> LoggerStats {
        LoggerStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            failed_batches: self.counters.failed_batches.load(Ordering::Relaxed),
        }
    }

    /// Stop intake, flush what is buffered, and wait for the worker
    ///
    /// Safe to call more than once. On timeout the worker is left to finish
    /// in the background.
    pub async fn close(&self) -> Result<(), LoggerError> {
        // Dropping the sender ends the worker's receive loop
        drop(self.sender.lock().take());

        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.shutdown_timeout, worker).await {
            Ok(Ok(())) => {
                let stats = self.stats();
                tracing::info!(
                    flushed = stats.flushed,
                    dropped = stats.dropped,
                    failed_batches = stats.failed_batches,
                    "Notification logger closed"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(LoggerError::WorkerFailed(e.to_string())),
            Err(_) => {
                tracing::error!(timeout_ms = self.shutdown_timeout.as_millis() as u64, "Timed out closing notification logger");
                Err(LoggerError::ShutdownTimeout(self.shutdown_timeout))
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<DeliveryLogEntry>,
    sink: Arc<dyn LogSink>,
    batch_size: usize,
    flush_interval: Duration,
    counters: Arc<Counters>,
) {
    let mut batch: Vec<DeliveryLogEntry> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(entry) => {
                    batch.push(entry);
                    if batch.len() >= batch_size {
                        flush(&sink, &mut batch, &counters).await;
                    }
                }
                None => {
                    flush(&sink, &mut batch, &counters).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                flush(&sink, &mut batch, &counters).await;
            }
        }
    }

    tracing::debug!("Notification logger worker exited");
}

async fn flush(sink: &Arc<dyn LogSink>, batch: &mut Vec<DeliveryLogEntry>, counters: &Counters) {
    if batch.is_empty() {
        return;
    }
    let entries = std::mem::take(batch);
    let size = entries.len();
    let sink = Arc::clone(sink);

    match tokio::task::spawn_blocking(move || sink.write_batch(&entries)).await {
        Ok(Ok(written)) => {
            counters.flushed.fetch_add(written as u64, Ordering::Relaxed);
            tracing::debug!(batch_size = size, "Flushed notification log batch");
        }
        Ok(Err(e)) => {
            counters.failed_batches.fetch_add(1, Ordering::Relaxed);
            tracing::error!(batch_size = size, error = %e, "Failed to persist notification log batch, discarding");
        }
        Err(e) => {
            counters.failed_batches.fetch_add(1, Ordering::Relaxed);
            tracing::error!(batch_size = size, error = %e, "Log batch writer panicked, discarding");
        }
    }
}
