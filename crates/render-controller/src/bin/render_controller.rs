/*
 * 5D Labs Agent Platform - Fragment Render Controller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Render Controller Service
//!
//! Watches `FragmentGroup` and `Fragment` resources and keeps one rendered
//! `Fragment` per group. Serves health and readiness endpoints.

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use render_controller::render::run_render_controller;
use render_controller::RenderConfig;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[derive(Clone)]
struct AppState {
    ready: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,render_controller=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting 5D Labs Render Controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let config = load_render_config();
    let ready = Arc::new(AtomicBool::new(false));
    let token = CancellationToken::new();

    // Start the controller in the background
    let controller_handle = {
        let ready = ready.clone();
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = run_render_controller(client, config, ready, token.clone()).await {
                error!("Controller error: {}", e);
                token.cancel();
            }
        })
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(10),
                )),
        )
        .with_state(AppState { ready });

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    info!("Render controller HTTP server listening on 0.0.0.0:8080");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(token.clone()))
        .await?;

    // Let in-flight syncs finish
    token.cancel();
    if let Err(e) = controller_handle.await {
        error!("Controller task failed: {:?}", e);
    }
    info!("Render controller stopped");

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "render-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.ready.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "status": "ready",
        "service": "render-controller",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

fn load_render_config() -> RenderConfig {
    let override_path = std::env::var("RENDER_CONFIG_PATH").ok();
    let config_path = resolve_config_path(override_path.as_deref());

    match RenderConfig::from_mounted_file(config_path) {
        Ok(cfg) => {
            info!("Loaded render configuration from {}", config_path);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                config_path, err
            );
            RenderConfig::default()
        }
    }
}

/// Config file to read: the override when it exists, the mounted default otherwise.
fn resolve_config_path(override_path: Option<&str>) -> &str {
    match override_path {
        Some(path) if Path::new(path).exists() => path,
        Some(path) => {
            warn!(
                "RENDER_CONFIG_PATH {} does not exist, falling back to {}",
                path, DEFAULT_CONFIG_PATH
            );
            DEFAULT_CONFIG_PATH
        }
        None => DEFAULT_CONFIG_PATH,
    }
}

/// Resolves on SIGINT, SIGTERM, or when the controller stopped on its own.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
        () = token.cancelled() => {
            warn!("Controller stopped, shutting down HTTP server");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_override_is_used() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        assert_eq!(resolve_config_path(Some(path)), path);
    }

    #[test]
    fn missing_override_falls_back_to_mounted_default() {
        assert_eq!(
            resolve_config_path(Some("/nonexistent/render-config.yaml")),
            DEFAULT_CONFIG_PATH
        );
    }

    #[test]
    fn no_override_uses_mounted_default() {
        assert_eq!(resolve_config_path(None), DEFAULT_CONFIG_PATH);
    }
}
