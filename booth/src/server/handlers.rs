//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::warn;

use crate::camera::service::CameraStatus;
use crate::camera::setup::SetupStatus;
use crate::devices::model::CameraIdentity;
use crate::errors::BoothError;
use crate::pipeline::result::CaptureResult;
use crate::server::state::ServerState;
use crate::stream::encoder::MJPEG_CONTENT_TYPE;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "boothd".to_string(),
        version: state.version.clone(),
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// JSON body of every failed camera request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub retryable: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<SetupStatus>,
}

/// A [`BoothError`] on its way to the client
pub struct ApiError {
    error: BoothError,
    setup: Option<SetupStatus>,
}

impl ApiError {
    fn from_camera(error: BoothError, state: &ServerState) -> Self {
        let setup = matches!(error, BoothError::CameraUnavailable(_))
            .then(|| state.camera.setup_status());
        Self { error, setup }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.error {
            BoothError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            BoothError::Busy(_) | BoothError::CameraUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BoothError> for ApiError {
    fn from(error: BoothError) -> Self {
        Self { error, setup: None }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Camera request failed: {}", self.error);
        }

        let body = ErrorResponse {
            success: false,
            error: self.error.to_string(),
            retryable: self.error.is_retryable(),
            setup: self.setup,
        };
        (status, Json(body)).into_response()
    }
}

/// Camera status handler
pub async fn status_handler(State(state): State<Arc<ServerState>>) -> Json<CameraStatus> {
    Json(state.camera.status())
}

/// Capture response
#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub success: bool,

    /// Cloud URL if uploaded, otherwise the local URL
    pub url: Option<String>,

    #[serde(flatten)]
    pub result: CaptureResult,
}

/// Capture handler
pub async fn capture_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let result = state
        .camera
        .capture_photo()
        .await
        .map_err(|e| ApiError::from_camera(e, &state))?;

    Ok(Json(CaptureResponse {
        success: true,
        url: result.preferred_url().map(str::to_string),
        result,
    }))
}

/// Restart response
#[derive(Debug, Serialize)]
pub struct RestartResponse {
    pub success: bool,
    pub connected: bool,
    pub camera: CameraIdentity,
    pub stream_url: Option<String>,
}

/// Restart handler
pub async fn restart_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<RestartResponse>, ApiError> {
    let connected = state.camera.restart().await?;

    Ok(Json(RestartResponse {
        success: true,
        connected,
        camera: state.camera.identity(),
        stream_url: state.camera.stream_url(),
    }))
}

/// Multipart MJPEG preview handler
pub async fn stream_handler(State(state): State<Arc<ServerState>>) -> Result<Response, ApiError> {
    let viewer = state
        .camera
        .open_viewer()
        .await
        .map_err(|e| ApiError::from_camera(e, &state))?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::CONNECTION, "close")
        .body(Body::from_stream(viewer.into_stream()))
        .map_err(|e| BoothError::ServerError(e.to_string()))?;

    Ok(response)
}
