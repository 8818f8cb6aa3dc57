//! Rate-limited work queue for node sync keys.
//!
//! Mirrors the controller workqueue contract: a key is never queued
//! twice (dirty set), a key being processed is re-queued only after its
//! worker calls `done`, and failed keys come back with per-key
//! exponential backoff until `forget`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

pub struct RateLimitingQueue {
    base_delay: Duration,
    max_delay: Duration,
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shut_down: bool,
}

impl RateLimitingQueue {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue a key. A key already queued or being processed is not
    /// duplicated; the latter re-queues when its worker calls `done`.
    pub fn add(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        if state.shut_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if state.shut_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark a key's processing finished; re-queues it if it was re-added
    /// in the meantime.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shut_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Re-enqueue a failed key after its backoff delay
    /// (`base · 2^(failures-1)`, capped).
    pub fn add_rate_limited(self: Arc<Self>, key: &str) {
        let delay = self.next_delay(key);
        trace!(key, ?delay, "re-queueing with backoff");

        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            self.add(&key);
        });
    }

    /// Clear a key's failure history after a successful sync.
    pub fn forget(&self, key: &str) {
        self.state.lock().unwrap().failures.remove(key);
    }

    /// Recorded failures for a key.
    pub fn num_requeues(&self, key: &str) -> u32 {
        *self.state.lock().unwrap().failures.get(key).unwrap_or(&0)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the queue; pending keys are dropped and waiting workers get
    /// `None`.
    pub fn shut_down(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.shut_down = true;
            state.queue.clear();
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    fn next_delay(&self, key: &str) -> Duration {
        let mut state = self.state.lock().unwrap();
        let failures = state.failures.entry(key.to_string()).or_insert(0);
        *failures += 1;
        let exponent = (*failures - 1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Arc<RateLimitingQueue> {
        Arc::new(RateLimitingQueue::new(
            Duration::from_secs(10),
            Duration::from_secs(360),
        ))
    }

    #[tokio::test]
    async fn add_and_get() {
        let q = queue();
        q.add("n1/cpu_usage");
        assert_eq!(q.get().await.as_deref(), Some("n1/cpu_usage"));
    }

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let q = queue();
        q.add("n1/cpu_usage");
        q.add("n1/cpu_usage");
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn readd_while_processing_requeues_after_done() {
        let q = queue();
        q.add("k");
        let key = q.get().await.unwrap();

        // Re-added mid-processing: not queued yet.
        q.add("k");
        assert_eq!(q.len(), 0);

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn shutdown_unblocks_getters() {
        let q = queue();
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shut_down();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn backoff_grows_and_caps() {
        let q = queue();
        assert_eq!(q.next_delay("k"), Duration::from_secs(10));
        assert_eq!(q.next_delay("k"), Duration::from_secs(20));
        assert_eq!(q.next_delay("k"), Duration::from_secs(40));
        for _ in 0..10 {
            q.next_delay("k");
        }
        assert_eq!(q.next_delay("k"), Duration::from_secs(360));
    }

    #[tokio::test]
    async fn forget_resets_backoff() {
        let q = queue();
        q.next_delay("k");
        q.next_delay("k");
        assert_eq!(q.num_requeues("k"), 2);

        q.forget("k");
        assert_eq!(q.num_requeues("k"), 0);
        assert_eq!(q.next_delay("k"), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_add_lands_after_delay() {
        let q = queue();
        q.clone().add_rate_limited("k");
        assert_eq!(q.len(), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(q.len(), 1);
    }
}
