//! Application context: one instance of every component

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::camera::service::{CameraParts, CameraService};
use crate::camera::setup::SetupChecker;
use crate::capture::default_chain;
use crate::devices::profiles::ProfileTable;
use crate::devices::registry::DeviceRegistry;
use crate::errors::BoothError;
use crate::kmod::manager::KernelModuleManager;
use crate::pipeline::delivery::{LocalDelivery, RoutedDelivery};
use crate::pipeline::imaging::{OverlayWatermarker, Watermarker};
use crate::pipeline::ImagePipeline;
use crate::storage::layout::StorageLayout;
use crate::stream::supervisor::StreamSupervisor;
use crate::system::command::{CommandRunner, SystemCommandRunner};
use crate::system::devfs::{DeviceFs, SystemDeviceFs};
use crate::system::janitor::DeviceJanitor;
use crate::system::privilege::{PrivilegeCheck, SystemPrivilegeCheck};
use crate::system::process::{ProcessControl, ProcessSpawner, SysinfoProcessControl, SystemSpawner};

/// Host collaborators. Swapped for fakes in tests.
#[derive(Clone)]
pub struct HostParts {
    pub runner: Arc<dyn CommandRunner>,
    pub fs: Arc<dyn DeviceFs>,
    pub privileges: Arc<dyn PrivilegeCheck>,
    pub processes: Arc<dyn ProcessControl>,
    pub spawner: Arc<dyn ProcessSpawner>,
}

impl HostParts {
    /// The real host
    pub fn system() -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        Self {
            privileges: Arc::new(SystemPrivilegeCheck::new(runner.clone())),
            runner,
            fs: Arc::new(SystemDeviceFs),
            processes: Arc::new(SysinfoProcessControl::new()),
            spawner: Arc::new(SystemSpawner),
        }
    }
}

/// Main application context
pub struct AppContext {
    pub layout: StorageLayout,
    pub registry: Arc<DeviceRegistry>,
    pub kmod: Arc<KernelModuleManager>,
    pub janitor: Arc<DeviceJanitor>,
    pub profiles: Arc<ProfileTable>,
    pub stream: Arc<StreamSupervisor>,
    pub camera: Arc<CameraService>,
}

impl AppContext {
    /// Build the context on the real host
    pub async fn init(options: &AppOptions) -> Result<Self, BoothError> {
        Self::build(options, HostParts::system()).await
    }

    /// Wire every component over `host`. Nothing is started.
    pub async fn build(options: &AppOptions, host: HostParts) -> Result<Self, BoothError> {
        info!("Initializing application context...");

        let layout = options.storage.layout.clone();
        layout.setup().await?;

        let janitor = Arc::new(DeviceJanitor::new(
            host.runner.clone(),
            host.processes.clone(),
            options.janitor_timeout,
        ));

        let registry = Arc::new(DeviceRegistry::new(
            options.registry.clone(),
            host.runner.clone(),
            host.fs.clone(),
        ));

        let kmod = Arc::new(KernelModuleManager::new(
            options.module.clone(),
            host.runner.clone(),
            host.privileges.clone(),
            janitor.clone(),
        ));

        let profiles = Arc::new(ProfileTable::default().with_overrides(&options.profile_overrides));

        let stream = Arc::new(StreamSupervisor::new(
            options.stream.clone(),
            profiles.clone(),
            host.spawner.clone(),
            host.processes.clone(),
            janitor.clone(),
        ));

        let placeholder = options
            .placeholder_capture
            .then(|| layout.placeholder_file().path().to_path_buf());
        let chain = default_chain(
            registry.clone(),
            host.runner.clone(),
            Some(stream.clone()),
            options.still.clone(),
            placeholder,
        );

        let watermarker: Arc<dyn Watermarker> =
            Arc::new(OverlayWatermarker::new(layout.watermark_file().path().to_path_buf()));
        let delivery = RoutedDelivery::new(
            None,
            LocalDelivery::new(layout.public_dir(), options.server.public_base_url.clone()),
        );
        let pipeline = ImagePipeline::new(options.pipeline.clone(), Some(watermarker), delivery);

        let setup = SetupChecker::new(
            host.runner.clone(),
            kmod.clone(),
            options.camera.loopback.clone(),
            options.camera.manage_module,
        );

        let mut camera_options = options.camera.clone();
        camera_options.captures_dir = layout.captures_dir().path().to_path_buf();

        let camera = CameraService::new(
            camera_options,
            CameraParts {
                registry: registry.clone(),
                kmod: kmod.clone(),
                stream: stream.clone(),
                janitor: janitor.clone(),
                profiles: profiles.clone(),
                setup,
                chain,
                pipeline,
            },
        );

        Ok(Self {
            layout,
            registry,
            kmod,
            janitor,
            profiles,
            stream,
            camera,
        })
    }
}
