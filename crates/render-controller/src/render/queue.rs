//! Deduplicating, rate-limited work queue of group names
//!
//! A key is in at most one of three places: queued, processing, or neither.
//! Adding a key that is processing marks it dirty; it is queued again when the
//! worker calls [`WorkQueue::done`]. This is what keeps reconciliation of a
//! single group sequential across workers.

use crate::render::rate_limit::RateLimiter;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    /// Earliest pending delayed insertion per key
    waiting: HashMap<String, Instant>,
    shutting_down: bool,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter>,
}

#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    #[must_use]
    pub fn new(name: &str, rate_limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                rate_limiter,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` now. No-op once shut down or when already pending.
    pub fn add(&self, key: &str) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }

        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            trace!(queue = %self.inner.name, key = %key, "Key is in flight, marked dirty");
            return;
        }

        state.queue.push_back(key.to_string());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Queue `key` once `delay` has elapsed. When several delayed insertions
    /// are pending for a key, the earliest one wins.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let ready_at = Instant::now() + delay;
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            if state
                .waiting
                .get(key)
                .is_some_and(|scheduled| *scheduled <= ready_at)
            {
                return;
            }
            state.waiting.insert(key.to_string(), ready_at);
        }

        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(ready_at).await;
            {
                let mut state = queue.state();
                if state.waiting.get(&key) != Some(&ready_at) {
                    // Superseded by an earlier insertion
                    return;
                }
                state.waiting.remove(&key);
            }
            queue.add(&key);
        });
    }

    /// Queue `key` after the rate limiter's delay for it.
    pub fn add_rate_limited(&self, key: &str) {
        let delay = self.inner.rate_limiter.when(key);
        trace!(queue = %self.inner.name, key = %key, ?delay, "Rate-limited requeue");
        self.add_after(key, delay);
    }

    /// Reset the rate limiter's backoff for `key`.
    pub fn forget(&self, key: &str) {
        self.inner.rate_limiter.forget(key);
    }

    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Wait for the next key and mark it in flight.
    ///
    /// Returns `None` once the queue has been shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release the in-flight marker, requeueing `key` if it was re-added
    /// while processing.
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting keys. Queued keys are still handed out by [`get`](Self::get).
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Keys queued and not yet handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
