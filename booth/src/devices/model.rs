//! Device and camera identity types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a video node can do, as reported by introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Capture,
    Output,
    Unknown,
}

/// A `/dev/videoN` character device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoDevice {
    /// Node path, e.g. `/dev/video7`
    pub path: String,

    /// Capability from the last classification
    pub capability: Capability,

    /// Raw introspection dump used for pattern matching
    #[serde(skip)]
    pub raw_info: String,

    /// Last successful capability check
    pub verified_at: Option<DateTime<Utc>>,
}

impl VideoDevice {
    /// An unclassified device at `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            capability: Capability::Unknown,
            raw_info: String::new(),
            verified_at: None,
        }
    }

    /// Numeric suffix of the node name
    pub fn index(&self) -> Option<u32> {
        device_index(&self.path)
    }
}

/// Parse `N` out of `.../videoN`
pub fn device_index(path: &str) -> Option<u32> {
    let name = path.rsplit('/').next()?;
    let digits = name.strip_prefix("video")?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Kind of camera currently bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraType {
    Canon,
    Webcam,
    Browser,
    None,
}

/// Profile key: cameras sharing capture/stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraFamily {
    #[serde(rename = "r6-mark-ii")]
    R6MarkII,
    #[serde(rename = "5d-mark-iv")]
    FiveDMarkIV,
    #[serde(rename = "canon")]
    Canon,
    #[serde(rename = "webcam")]
    Webcam,
}

impl CameraFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraFamily::R6MarkII => "r6-mark-ii",
            CameraFamily::FiveDMarkIV => "5d-mark-iv",
            CameraFamily::Canon => "canon",
            CameraFamily::Webcam => "webcam",
        }
    }
}

impl std::fmt::Display for CameraFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The logical camera currently selected by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraIdentity {
    #[serde(rename = "type")]
    pub camera_type: CameraType,
    pub model: String,
    pub family: CameraFamily,
    pub device_path: Option<String>,
    pub connected: bool,
}

impl CameraIdentity {
    /// No camera bound
    pub fn disconnected() -> Self {
        Self {
            camera_type: CameraType::None,
            model: String::new(),
            family: CameraFamily::Webcam,
            device_path: None,
            connected: false,
        }
    }

    /// No hardware camera; the UI should fall back to the browser camera
    pub fn browser() -> Self {
        Self {
            camera_type: CameraType::Browser,
            model: "Browser Camera".to_string(),
            ..Self::disconnected()
        }
    }

    /// Device path, model or type differ
    pub fn differs_from(&self, other: &CameraIdentity) -> bool {
        self.device_path != other.device_path
            || self.model != other.model
            || self.camera_type != other.camera_type
    }
}

impl Default for CameraIdentity {
    fn default() -> Self {
        Self::disconnected()
    }
}
