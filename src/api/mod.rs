// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! HTTP adapter over the generation orchestrator

pub mod errors;
pub mod handlers;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::{
    AppState, GenerationRequest, HealthResponse, ListResponse, SelectResponse, SettingsRequest,
};

/// Build the router. `media_root` mounts the public bucket at `/media`.
pub fn router(state: AppState, media_root: Option<PathBuf>) -> Router {
    let mut app = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route(
            "/v1/drafts/:draft_id/generations",
            post(handlers::submit_generation_handler).get(handlers::list_generations_handler),
        )
        .route(
            "/v1/drafts/:draft_id/images/:image_id/select",
            post(handlers::select_image_handler),
        );

    if let Some(root) = media_root {
        info!("Serving public media from {}", root.display());
        app = app.nest_service("/media", ServeDir::new(root));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` fires
pub async fn serve(bind: &str, app: Router, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding API listener on {}", bind))?;
    info!("API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server failed")?;
    info!("API server stopped");
    Ok(())
}
