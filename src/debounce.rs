//! Per-key debouncer
//!
//! `notify(key)` arms a timer for `key`; notifying again before it fires
//! restarts that key's timer only. Timers are cancellable tokio tasks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

struct PendingTimer {
    generation: u64,
    handle: AbortHandle,
}

pub struct Debouncer<K> {
    delay: Duration,
    pending: Arc<Mutex<HashMap<K, PendingTimer>>>,
    handler: Arc<dyn Fn(K) + Send + Sync>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(delay: Duration, handler: impl Fn(K) + Send + Sync + 'static) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            handler: Arc::new(handler),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Schedule the handler for `key` after the quiet interval.
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, key: K) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let handler = Arc::clone(&self.handler);
        let delay = self.delay;
        let fire_key = key.clone();

        let mut timers = self.pending.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer timer for the same key supersedes this one
            let current = {
                let mut timers = pending.lock();
                match timers.get(&fire_key) {
                    Some(timer) if timer.generation == generation => {
                        timers.remove(&fire_key);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                handler(fire_key);
            }
        });

        let timer = PendingTimer {
            generation,
            handle: task.abort_handle(),
        };
        if let Some(previous) = timers.insert(key, timer) {
            previous.handle.abort();
        }
    }

    /// Number of armed timers
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Cancel every armed timer without firing it; later notifications are ignored
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<PendingTimer> = self.pending.lock().drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.handle.abort();
        }
        if !drained.is_empty() {
            tracing::debug!(cancelled = drained.len(), "Cancelled pending debounce timers");
        }
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for (_, timer) in self.pending.lock().drain() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (Arc<Mutex<Vec<String>>>, Debouncer<String>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let debouncer = Debouncer::new(DEFAULT_DEBOUNCE, move |key: String| sink.lock().push(key));
        (fired, debouncer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_call() {
        let (fired, debouncer) = recording();

        for _ in 0..5 {
            debouncer.notify("a.json".to_string());
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(fired.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*fired.lock(), vec!["a.json".to_string()]);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (fired, debouncer) = recording();

        debouncer.notify("a.json".to_string());
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.notify("b.json".to_string());
        tokio::time::sleep(Duration::from_millis(150)).await;

        // a fired on schedule; b's timer was not reset by a
        assert_eq!(*fired.lock(), vec!["a.json".to_string()]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*fired.lock(), vec!["a.json".to_string(), "b.json".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_without_firing() {
        let (fired, debouncer) = recording();

        debouncer.notify("a.json".to_string());
        debouncer.notify("b.json".to_string());
        assert_eq!(debouncer.pending(), 2);

        debouncer.shutdown();
        debouncer.notify("c.json".to_string());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(fired.lock().is_empty());
        assert_eq!(debouncer.pending(), 0);
    }
}
