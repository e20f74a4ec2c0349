//! Settings file management

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::options::{AppOptions, ServerOptions, StorageOptions};
use crate::devices::model::CameraFamily;
use crate::devices::profiles::ProfileOverride;
use crate::kmod::manager::LoopbackParams;
use crate::logs::LogLevel;
use crate::storage::layout::StorageLayout;

/// boothd settings. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Also write daily-rotated log files under the logs directory
    #[serde(default = "default_true")]
    pub file_logs: bool,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub camera: CameraSettings,

    #[serde(default)]
    pub stream: StreamSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Per-family selection and polling overrides
    #[serde(default)]
    pub profiles: HashMap<CameraFamily, ProfileOverride>,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            file_logs: true,
            server: ServerSettings::default(),
            camera: CameraSettings::default(),
            stream: StreamSettings::default(),
            pipeline: PipelineSettings::default(),
            profiles: HashMap::new(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix of local photo URLs; derived from host and port when absent
    #[serde(default)]
    pub public_base_url: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            public_base_url: None,
        }
    }
}

/// Camera behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Report a browser camera when no hardware camera is attached
    #[serde(default)]
    pub browser_fallback: bool,

    #[serde(default = "default_capture_cooldown")]
    pub capture_cooldown_secs: u64,

    #[serde(default = "default_restart_limit")]
    pub restart_limit: usize,

    #[serde(default = "default_restart_window")]
    pub restart_window_secs: u64,

    /// Load and reload the loopback module
    #[serde(default = "default_true")]
    pub manage_module: bool,

    #[serde(default)]
    pub loopback: LoopbackSettings,

    /// Fall back to the placeholder image when every capture method fails
    #[serde(default = "default_true")]
    pub placeholder_capture: bool,

    /// Ask gphoto2 for the DSLR model
    #[serde(default = "default_true")]
    pub detect_dslr_model: bool,
}

fn default_capture_cooldown() -> u64 {
    3
}

fn default_restart_limit() -> usize {
    3
}

fn default_restart_window() -> u64 {
    60
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            browser_fallback: false,
            capture_cooldown_secs: default_capture_cooldown(),
            restart_limit: default_restart_limit(),
            restart_window_secs: default_restart_window(),
            manage_module: true,
            loopback: LoopbackSettings::default(),
            placeholder_capture: true,
            detect_dslr_model: true,
        }
    }
}

/// v4l2loopback parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopbackSettings {
    #[serde(default = "default_video_nr")]
    pub video_nr: Vec<u32>,

    #[serde(default = "default_card_label")]
    pub card_label: String,

    #[serde(default)]
    pub exclusive_caps: bool,
}

fn default_video_nr() -> Vec<u32> {
    vec![2]
}

fn default_card_label() -> String {
    "Photobooth DSLR".to_string()
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            video_nr: default_video_nr(),
            card_label: default_card_label(),
            exclusive_caps: false,
        }
    }
}

impl LoopbackSettings {
    fn to_params(&self) -> LoopbackParams {
        LoopbackParams {
            devices: self.video_nr.len().max(1) as u32,
            video_nr: self.video_nr.clone(),
            card_label: self.card_label.clone(),
            exclusive_caps: self.exclusive_caps,
            ..Default::default()
        }
    }
}

/// Preview stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_max_viewers")]
    pub max_viewers: usize,

    /// New viewers admitted per burst window
    #[serde(default = "default_burst_limit")]
    pub burst_limit: usize,

    #[serde(default = "default_burst_window")]
    pub burst_window_secs: u64,

    /// JPEG quality passed to the encoder (2 best, 31 worst)
    #[serde(default = "default_quality")]
    pub quality: u32,
}

fn default_max_viewers() -> usize {
    10
}

fn default_burst_limit() -> usize {
    5
}

fn default_burst_window() -> u64 {
    2
}

fn default_quality() -> u32 {
    5
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_viewers: default_max_viewers(),
            burst_limit: default_burst_limit(),
            burst_window_secs: default_burst_window(),
            quality: default_quality(),
        }
    }
}

/// Post-capture processing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_true")]
    pub watermark: bool,

    #[serde(default = "default_min_width")]
    pub min_width: u32,
}

fn default_min_width() -> u32 {
    1920
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            watermark: true,
            min_width: default_min_width(),
        }
    }
}

impl Settings {
    /// Application options for a daemon rooted at `layout`
    pub fn to_app_options(&self, layout: StorageLayout) -> AppOptions {
        let mut options = AppOptions {
            storage: StorageOptions { layout },
            enable_server: self.server.enabled,
            server: ServerOptions {
                host: self.server.host.clone(),
                port: self.server.port,
                public_base_url: self.server.public_base_url.clone().unwrap_or_else(|| {
                    format!("http://{}:{}", self.server.host, self.server.port)
                }),
            },
            profile_overrides: self.profiles.clone(),
            placeholder_capture: self.camera.placeholder_capture,
            ..Default::default()
        };

        let camera = &mut options.camera;
        camera.browser_fallback = self.camera.browser_fallback;
        camera.capture_cooldown = Duration::from_secs(self.camera.capture_cooldown_secs);
        camera.restart_limit = self.camera.restart_limit;
        camera.restart_window = Duration::from_secs(self.camera.restart_window_secs);
        camera.manage_module = self.camera.manage_module;
        camera.loopback = self.camera.loopback.to_params();

        options.registry.detect_dslr_model = self.camera.detect_dslr_model;

        let admission = &mut options.stream.admission;
        admission.max_viewers = self.stream.max_viewers;
        admission.burst_limit = self.stream.burst_limit;
        admission.burst_window = Duration::from_secs(self.stream.burst_window_secs);
        options.stream.encoder.quality = self.stream.quality;

        options.pipeline.watermark = self.pipeline.watermark;
        options.pipeline.min_width = self.pipeline.min_width;

        options
    }
}
