//! Error types for the photobooth daemon

use std::time::Duration;

use thiserror::Error;

/// Main error type for boothd
#[derive(Error, Debug)]
pub enum BoothError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Command timed out after {0:?}: {1}")]
    CommandTimeout(Duration, String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Kernel module error: {0}")]
    ModuleError(String),

    #[error("Elevated privileges required: {0}")]
    NeedsRoot(String),

    #[error("Capture error: {0}")]
    CaptureError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Camera not available: {0}")]
    CameraUnavailable(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BoothError {
    /// Contention errors: the caller should back off and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BoothError::Busy(_) | BoothError::RateLimited(_))
    }
}

impl From<anyhow::Error> for BoothError {
    fn from(err: anyhow::Error) -> Self {
        BoothError::Internal(err.to_string())
    }
}
