//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::BoothError;
use crate::server::handlers::{
    capture_handler, health_handler, restart_handler, status_handler, stream_handler,
    version_handler,
};
use crate::server::state::ServerState;

/// Routes without the listener
pub fn router(state: Arc<ServerState>) -> Router {
    let photos = ServeDir::new(&state.public_dir);

    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Camera
        .route("/api/camera/status", get(status_handler))
        .route("/api/camera/capture", post(capture_handler))
        .route("/api/camera/restart", post(restart_handler))
        .route("/api/camera/stream", get(stream_handler))
        // Delivered photos
        .nest_service("/photos", photos)
        // State and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), BoothError>>, BoothError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| BoothError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| BoothError::ServerError(e.to_string()))
    });

    Ok(handle)
}
