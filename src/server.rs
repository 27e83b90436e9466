//! Data server: exposes a clustering run directory under `/data/`.
//!
//! SYSTEM CONTEXT
//! ==============
//! The HTTP source fetches `{base}/data/{file}`. This router is the other end
//! of that contract: every file of the run directory is served as-is, and any
//! other path answers 404.

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;

use std::path::Path;

use axum::Router;
use axum::http::StatusCode;
use axum::response::Html;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::VizConfig;
use crate::error::VizError;

/// Router serving `run_dir` under `/data/`.
pub fn router(run_dir: impl AsRef<Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest_service("/data", ServeDir::new(run_dir.as_ref()))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> (StatusCode, Html<&'static str>) {
    (StatusCode::NOT_FOUND, Html("<html><head></head><body>Page not found</body></html>"))
}

/// Serve the configured run directory on `0.0.0.0:{port}` until the
/// process stops.
///
/// # Errors
///
/// Returns [`VizError::Server`] if the port cannot be bound or serving fails.
pub async fn serve(config: &VizConfig) -> Result<(), VizError> {
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| VizError::Server(format!("bind {addr}: {e}")))?;

    info!(port = config.port, run_dir = %config.run_dir.display(), "data server listening");
    axum::serve(listener, router(&config.run_dir))
        .await
        .map_err(|e| VizError::Server(e.to_string()))
}
