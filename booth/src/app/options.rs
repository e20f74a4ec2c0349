//! Application options

use std::collections::HashMap;
use std::time::Duration;

use crate::camera::service::CameraOptions;
use crate::capture::methods::StillOptions;
use crate::devices::model::CameraFamily;
use crate::devices::profiles::ProfileOverride;
use crate::devices::registry::RegistryOptions;
use crate::kmod::manager::ModuleOptions;
use crate::pipeline::PipelineOptions;
use crate::storage::layout::StorageLayout;
use crate::stream::supervisor::StreamOptions;

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Upper bound for the whole shutdown sequence
    pub max_shutdown_delay: Duration,

    /// Open preview connections get this long to drain before the server is aborted
    pub server_drain_timeout: Duration,

    /// Given to the camera service to stop its reconnect worker
    pub camera_shutdown_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
            server_drain_timeout: Duration::from_secs(5),
            camera_shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Storage options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    pub layout: StorageLayout,
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,

    /// Prefix of locally delivered photo URLs
    pub public_base_url: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            public_base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,
    pub storage: StorageOptions,
    pub server: ServerOptions,
    pub enable_server: bool,

    /// Janitor command timeout (`fuser`)
    pub janitor_timeout: Duration,

    pub registry: RegistryOptions,
    pub module: ModuleOptions,
    pub stream: StreamOptions,
    pub still: StillOptions,
    pub camera: CameraOptions,
    pub pipeline: PipelineOptions,
    pub profile_overrides: HashMap<CameraFamily, ProfileOverride>,

    /// Append the placeholder method to the capture chain
    pub placeholder_capture: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            server: ServerOptions::default(),
            enable_server: true,
            janitor_timeout: Duration::from_secs(3),
            registry: RegistryOptions::default(),
            module: ModuleOptions::default(),
            stream: StreamOptions::default(),
            still: StillOptions::default(),
            camera: CameraOptions::default(),
            pipeline: PipelineOptions::default(),
            profile_overrides: HashMap::new(),
            placeholder_capture: true,
        }
    }
}
