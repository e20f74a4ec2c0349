//! Capture results handed to callers

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capture::attempt::{CaptureAttempt, CaptureMethodKind};
use crate::devices::model::CameraIdentity;

/// Where a processed photo ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Delivery {
    Cloud { url: String, key: String },
    Local { url: String, path: PathBuf },
    Unavailable { reason: String },
}

impl Delivery {
    pub fn url(&self) -> Option<&str> {
        match self {
            Delivery::Cloud { url, .. } | Delivery::Local { url, .. } => Some(url),
            Delivery::Unavailable { .. } => None,
        }
    }
}

/// A processed capture
#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    pub filename: String,
    pub local_path: PathBuf,
    pub method: CaptureMethodKind,
    pub placeholder: bool,
    pub identity: CameraIdentity,
    pub attempts: Vec<CaptureAttempt>,
    pub delivery: Delivery,
    pub captured_at: DateTime<Utc>,
    pub watermarked: bool,
}

impl CaptureResult {
    /// Cloud URL, else local URL, else nothing
    pub fn preferred_url(&self) -> Option<&str> {
        self.delivery.url()
    }
}
