//! Known camera models, matched against free-text tool output.
//!
//! Rules are tried in order and the first match wins, so specific models
//! must come before vendor-wide patterns.

use crate::devices::model::{CameraFamily, CameraType};

/// Model label used when a capture device matches no vendor rule
pub const GENERIC_WEBCAM_MODEL: &str = "USB Webcam";

/// Capability marker that makes an unmatched device a generic webcam
const CAPTURE_MARKER: &str = "Video Capture";

/// One row of the model table
#[derive(Debug, Clone, Copy)]
pub struct ModelRule {
    pub pattern: &'static str,
    pub case_sensitive: bool,
    pub model: &'static str,
    pub camera_type: CameraType,
    pub family: CameraFamily,
}

impl ModelRule {
    const fn canon(pattern: &'static str, model: &'static str, family: CameraFamily) -> Self {
        Self {
            pattern,
            case_sensitive: false,
            model,
            camera_type: CameraType::Canon,
            family,
        }
    }

    fn matches(&self, text: &str, lowered: &str) -> bool {
        if self.case_sensitive {
            text.contains(self.pattern)
        } else {
            lowered.contains(&self.pattern.to_lowercase())
        }
    }
}

pub const MODEL_RULES: &[ModelRule] = &[
    ModelRule::canon("R6 Mark II", "Canon EOS R6 Mark II", CameraFamily::R6MarkII),
    ModelRule::canon("R6 Mk II", "Canon EOS R6 Mark II", CameraFamily::R6MarkII),
    ModelRule::canon("R6m2", "Canon EOS R6 Mark II", CameraFamily::R6MarkII),
    ModelRule::canon("5D Mark IV", "Canon EOS 5D Mark IV", CameraFamily::FiveDMarkIV),
    ModelRule::canon("5D Mk IV", "Canon EOS 5D Mark IV", CameraFamily::FiveDMarkIV),
    ModelRule::canon("5D4", "Canon EOS 5D Mark IV", CameraFamily::FiveDMarkIV),
    ModelRule::canon("Canon EOS", "Canon EOS", CameraFamily::Canon),
    ModelRule {
        pattern: "EOS",
        case_sensitive: true,
        model: "Canon EOS",
        camera_type: CameraType::Canon,
        family: CameraFamily::Canon,
    },
    ModelRule::canon("Canon", "Canon Camera", CameraFamily::Canon),
];

/// Result of matching introspection text against the model table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMatch {
    pub model: String,
    pub camera_type: CameraType,
    pub family: CameraFamily,
}

impl From<&ModelRule> for ModelMatch {
    fn from(rule: &ModelRule) -> Self {
        Self {
            model: rule.model.to_string(),
            camera_type: rule.camera_type,
            family: rule.family,
        }
    }
}

impl ModelMatch {
    pub fn generic_webcam() -> Self {
        Self {
            model: GENERIC_WEBCAM_MODEL.to_string(),
            camera_type: CameraType::Webcam,
            family: CameraFamily::Webcam,
        }
    }
}

/// First vendor rule matching `text`
pub fn identify_vendor(text: &str) -> Option<ModelMatch> {
    let lowered = text.to_lowercase();
    MODEL_RULES
        .iter()
        .find(|rule| rule.matches(text, &lowered))
        .map(ModelMatch::from)
}

/// Vendor match, or a generic webcam when `text` reports capture capability
pub fn identify(text: &str) -> Option<ModelMatch> {
    identify_vendor(text).or_else(|| {
        text.contains(CAPTURE_MARKER)
            .then(ModelMatch::generic_webcam)
    })
}
