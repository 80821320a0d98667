use crate::render::controller::RenderController;
use crate::render::events::{KubeEventRecorder, TracingErrorReporter};
use crate::render::kube_repository::KubeRepository;
use crate::render::merge::JsonMerger;
use kube::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

pub mod apply;
pub mod association;
pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod events;
pub mod generate;
pub mod kube_repository;
pub mod merge;
pub mod naming;
pub mod patch;
pub mod queue;
pub mod rate_limit;
pub mod reconciler;
pub mod repository;
pub mod retry;
pub mod selector;
pub mod types;

// Re-export commonly used items
pub use config::RenderConfig;
pub use dispatcher::ChangeEvent;
pub use reconciler::{CleanupReport, SyncOutcome};
pub use repository::Repository;
pub use types::{Error, Result};

/// Main entry point for the render controller
///
/// Runs the watchers and the worker pool against the cluster until `token`
/// is cancelled. `ready` flips to `true` once both caches have synced.
#[instrument(skip_all, fields(workers = config.workers))]
pub async fn run_render_controller(
    client: Client,
    config: RenderConfig,
    ready: Arc<AtomicBool>,
    token: CancellationToken,
) -> Result<()> {
    if let Err(validation_error) = config.validate() {
        error!("Configuration validation failed: {}", validation_error);
        return Err(Error::ConfigError(validation_error.to_string()));
    }
    debug!("Configuration validation passed");

    let (repository, informers) = KubeRepository::new(client.clone());
    let controller = RenderController::new(
        &config,
        Arc::new(repository.clone()),
        Arc::new(KubeEventRecorder::new(client, &config.reporter)),
        Arc::new(JsonMerger),
        Arc::new(TracingErrorReporter),
    );

    let informer_handle = tokio::spawn(informers.run(controller.dispatcher(), token.clone()));

    let synced = async {
        let synced = repository.wait_until_synced().await;
        if synced {
            info!("FragmentGroup and Fragment caches synced");
            ready.store(true, Ordering::SeqCst);
        }
        synced
    };
    controller.run(synced, token.clone()).await;

    // Workers are gone; make sure the watchers stop too
    token.cancel();
    if let Err(e) = informer_handle.await {
        error!("Watcher task failed: {:?}", e);
    }
    ready.store(false, Ordering::SeqCst);
    Ok(())
}
