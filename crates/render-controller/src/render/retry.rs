//! Retry handling for finished syncs
//!
//! Failures are retried with the queue's rate limiter until `max_retries` is
//! reached. At that point the error is reported once and the key drops to a
//! fixed slow cadence, where it stays until a sync succeeds.

use crate::render::events::ErrorReporter;
use crate::render::queue::WorkQueue;
use crate::render::types::Error;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sync succeeded; backoff reset
    Forgotten,
    /// Requeued through the rate limiter
    RateLimited,
    /// Retry ceiling hit just now; reported and requeued after the fallback delay
    Dropped,
    /// Already past the ceiling; requeued after the fallback delay
    SlowRetry,
}

pub struct RetryController {
    queue: WorkQueue,
    max_retries: u32,
    fallback_delay: Duration,
    reporter: Arc<dyn ErrorReporter>,
    slow_keys: Mutex<HashSet<String>>,
}

impl RetryController {
    #[must_use]
    pub fn new(
        queue: WorkQueue,
        max_retries: u32,
        fallback_delay: Duration,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            queue,
            max_retries,
            fallback_delay,
            reporter,
            slow_keys: Mutex::new(HashSet::new()),
        }
    }

    /// Decide what happens to `key` after a sync returned `result`.
    pub fn handle_result(&self, key: &str, result: Result<(), Error>) -> RetryDecision {
        let err = match result {
            Ok(()) => {
                self.queue.forget(key);
                if self.slow_keys().remove(key) {
                    info!(group = %key, "FragmentGroup recovered after exceeding retry limit");
                }
                return RetryDecision::Forgotten;
            }
            Err(err) => err,
        };

        if self.slow_keys().contains(key) {
            debug!(group = %key, error = %err, "Error syncing FragmentGroup, retrying at fallback cadence");
            self.queue.add_after(key, self.fallback_delay);
            return RetryDecision::SlowRetry;
        }

        if self.queue.num_requeues(key) < self.max_retries {
            debug!(group = %key, error = %err, "Error syncing FragmentGroup");
            self.queue.add_rate_limited(key);
            return RetryDecision::RateLimited;
        }

        self.reporter.report(key, &err);
        warn!(group = %key, error = %err, "Dropping FragmentGroup out of the rate-limited queue");
        self.queue.forget(key);
        self.slow_keys().insert(key.to_string());
        self.queue.add_after(key, self.fallback_delay);
        RetryDecision::Dropped
    }

    fn slow_keys(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.slow_keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
