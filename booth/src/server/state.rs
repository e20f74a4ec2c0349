//! Server state

use std::path::PathBuf;
use std::sync::Arc;

use crate::camera::service::CameraService;

/// Server state shared across handlers
pub struct ServerState {
    pub version: String,
    pub camera: Arc<CameraService>,

    /// Locally delivered photos, served under `/photos`
    pub public_dir: PathBuf,
}

impl ServerState {
    pub fn new(version: String, camera: Arc<CameraService>, public_dir: PathBuf) -> Self {
        Self {
            version,
            camera,
            public_dir,
        }
    }
}
