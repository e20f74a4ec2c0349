//! Capture attempt records

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::devices::model::CameraIdentity;
use crate::devices::profiles::CameraProfile;

/// Capture methods, in the order the chain tries them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMethodKind {
    SpecializedR6,
    Specialized5d,
    StandardV4l2,
    FallbackV4l2,
    Mock,
}

impl CaptureMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMethodKind::SpecializedR6 => "specialized-r6",
            CaptureMethodKind::Specialized5d => "specialized-5d",
            CaptureMethodKind::StandardV4l2 => "standard-v4l2",
            CaptureMethodKind::FallbackV4l2 => "fallback-v4l2",
            CaptureMethodKind::Mock => "mock",
        }
    }
}

impl fmt::Display for CaptureMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a capture runs against
#[derive(Debug, Clone)]
pub struct CaptureContext {
    pub identity: CameraIdentity,
    pub profile: CameraProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// One method tried by the chain
#[derive(Debug, Clone, Serialize)]
pub struct CaptureAttempt {
    pub method: CaptureMethodKind,
    pub device_path: Option<String>,
    pub outcome: AttemptOutcome,
    pub output_path: PathBuf,

    /// Failure reason
    pub detail: Option<String>,
    pub duration_ms: u64,
}

impl CaptureAttempt {
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Outcome of a successful chain run
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub output: PathBuf,
    pub method: CaptureMethodKind,
    pub attempts: Vec<CaptureAttempt>,

    /// The image came from the mock method, not a camera
    pub placeholder: bool,
}
