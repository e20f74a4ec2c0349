//! Host readiness checks

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::BoothError;
use crate::kmod::manager::{KernelModuleManager, LoopbackParams};
use crate::system::command::CommandRunner;

/// Tools the camera core cannot work without
pub const REQUIRED_TOOLS: &[&str] = &["v4l2-ctl", "ffmpeg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupType {
    Dependencies,
    Module,
    Error,
}

/// Outcome of the readiness checks, with operator guidance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupStatus {
    pub success: bool,
    pub message: String,
    pub needs_setup: bool,
    pub setup_type: Option<SetupType>,
    pub needs_root: bool,
}

impl SetupStatus {
    pub fn ready() -> Self {
        Self {
            success: true,
            message: "Camera system ready".to_string(),
            needs_setup: false,
            setup_type: None,
            needs_root: false,
        }
    }

    /// Not checked yet
    pub fn pending() -> Self {
        Self {
            success: false,
            message: "Camera system not initialized".to_string(),
            needs_setup: false,
            setup_type: None,
            needs_root: false,
        }
    }

    pub fn missing_dependencies(missing: &[&str]) -> Self {
        Self {
            success: false,
            message: format!(
                "Missing required tools: {}. Install them (e.g. apt install v4l-utils ffmpeg) and restart.",
                missing.join(", ")
            ),
            needs_setup: true,
            setup_type: Some(SetupType::Dependencies),
            needs_root: false,
        }
    }

    pub fn module_needs_root(message: String) -> Self {
        Self {
            success: false,
            message,
            needs_setup: true,
            setup_type: Some(SetupType::Module),
            needs_root: true,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            message,
            needs_setup: true,
            setup_type: Some(SetupType::Error),
            needs_root: false,
        }
    }

    /// Device discovery is pointless without the introspection tools
    pub fn blocks_discovery(&self) -> bool {
        self.setup_type == Some(SetupType::Dependencies)
    }
}

/// Checks tools and, optionally, the loopback module
pub struct SetupChecker {
    runner: Arc<dyn CommandRunner>,
    kmod: Arc<KernelModuleManager>,
    loopback: LoopbackParams,
    manage_module: bool,
}

impl SetupChecker {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        kmod: Arc<KernelModuleManager>,
        loopback: LoopbackParams,
        manage_module: bool,
    ) -> Self {
        Self {
            runner,
            kmod,
            loopback,
            manage_module,
        }
    }

    pub async fn check(&self) -> SetupStatus {
        let missing: Vec<&str> = REQUIRED_TOOLS
            .iter()
            .copied()
            .filter(|tool| !self.runner.exists(tool))
            .collect();
        if !missing.is_empty() {
            warn!("Missing camera tools: {:?}", missing);
            return SetupStatus::missing_dependencies(&missing);
        }

        if !self.manage_module || self.kmod.is_loaded().await {
            return SetupStatus::ready();
        }

        match self.kmod.load(&self.loopback).await {
            Ok(()) => {
                info!("Loopback module loaded during setup");
                SetupStatus::ready()
            }
            Err(BoothError::NeedsRoot(message)) => SetupStatus::module_needs_root(message),
            Err(e) => SetupStatus::error(format!("Failed to load the video loopback module: {}", e)),
        }
    }
}
