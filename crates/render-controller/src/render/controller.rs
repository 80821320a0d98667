//! Worker pool driving the reconciler from the work queue

use crate::render::config::RenderConfig;
use crate::render::dispatcher::Dispatcher;
use crate::render::events::{ErrorReporter, EventRecorder};
use crate::render::merge::FragmentMerger;
use crate::render::queue::WorkQueue;
use crate::render::rate_limit::default_controller_rate_limiter;
use crate::render::reconciler::Reconciler;
use crate::render::repository::Repository;
use crate::render::retry::RetryController;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the work queue, used in queue logs
pub const QUEUE_NAME: &str = "render-controller";

pub struct RenderController {
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    retry: Arc<RetryController>,
    dispatcher: Dispatcher,
    workers: usize,
}

impl RenderController {
    #[must_use]
    pub fn new(
        config: &RenderConfig,
        repository: Arc<dyn Repository>,
        recorder: Arc<dyn EventRecorder>,
        merger: Arc<dyn FragmentMerger>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let queue = WorkQueue::new(QUEUE_NAME, Box::new(default_controller_rate_limiter(config)));
        let retry = RetryController::new(
            queue.clone(),
            config.max_retries,
            config.fallback_delay(),
            reporter,
        );

        Self {
            dispatcher: Dispatcher::new(queue.clone(), repository.clone()),
            reconciler: Arc::new(Reconciler::new(repository, recorder, merger)),
            retry: Arc::new(retry),
            queue,
            workers: config.workers,
        }
    }

    /// Dispatcher feeding this controller's queue
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    #[must_use]
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Run workers until `token` is cancelled.
    ///
    /// Workers start once `synced` resolves to `true`. A `false` result means
    /// the caches will never be usable and `run` returns without starting.
    /// On cancellation the queue is shut down and the workers drain what is
    /// left before `run` returns.
    pub async fn run<F>(&self, synced: F, token: CancellationToken)
    where
        F: Future<Output = bool>,
    {
        info!(workers = self.workers, "Starting render controller");

        tokio::select! {
            ready = synced => {
                if !ready {
                    error!("Caches failed to sync, not starting workers");
                    self.queue.shut_down();
                    return;
                }
            }
            () = token.cancelled() => {
                info!("Cancelled before caches synced");
                self.queue.shut_down();
                return;
            }
        }
        debug!("Caches synced");

        let handles: Vec<_> = (0..self.workers)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    self.queue.clone(),
                    self.reconciler.clone(),
                    self.retry.clone(),
                ))
            })
            .collect();
        info!("Started {} workers", handles.len());

        token.cancelled().await;
        info!("Shutting down render controller");
        self.queue.shut_down();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Worker task failed: {:?}", e);
            }
        }
        info!("Render controller stopped");
    }
}

async fn worker(
    id: usize,
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    retry: Arc<RetryController>,
) {
    while let Some(key) = queue.get().await {
        let result = reconciler.sync(&key).await;
        match &result {
            Ok(outcome) => debug!(worker = id, group = %key, ?outcome, "Sync finished"),
            Err(e) => warn!(worker = id, group = %key, error = %e, "Sync failed"),
        }
        retry.handle_result(&key, result.map(|_| ()));
        queue.done(&key);
    }
    debug!(worker = id, "Worker exiting");
}
