//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppContext;
use crate::camera::service::CameraService;
use crate::errors::BoothError;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the booth daemon until `shutdown_signal` resolves
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BoothError> {
    info!("Initializing boothd...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(version, &options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start boothd: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    version: String,
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppContext>, BoothError> {
    let context = Arc::new(AppContext::init(options).await?);
    init_camera(context.camera.clone(), shutdown_manager).await?;

    if options.enable_server {
        init_server(
            version,
            options,
            context.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(context)
}

async fn init_camera(
    camera: Arc<CameraService>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), BoothError> {
    info!("Initializing camera service...");

    // Registered before init; a failed server start must still stop it
    shutdown_manager.with_camera(camera.clone())?;

    if camera.init().await {
        let identity = camera.identity();
        info!("Camera ready: {} ({})", identity.model, identity.family);
    } else {
        info!("No camera bound yet; waiting for one to be connected");
    }
    Ok(())
}

async fn init_server(
    version: String,
    options: &AppOptions,
    context: Arc<AppContext>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), BoothError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(
        version,
        context.camera.clone(),
        context.layout.public_dir().path().to_path_buf(),
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    camera: Option<Arc<CameraService>>,
    server_handle: Option<JoinHandle<Result<(), BoothError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            camera: None,
            server_handle: None,
        }
    }

    pub fn with_camera(&mut self, camera: Arc<CameraService>) -> Result<(), BoothError> {
        if self.camera.is_some() {
            return Err(BoothError::ShutdownError("camera already set".to_string()));
        }
        self.camera = Some(camera);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), BoothError>>,
    ) -> Result<(), BoothError> {
        if self.server_handle.is_some() {
            return Err(BoothError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), BoothError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), BoothError> {
        info!("Shutting down boothd...");

        // 1. HTTP server, so no new captures or viewers arrive
        if let Some(mut handle) = self.server_handle.take() {
            let drain = self.lifecycle_options.server_drain_timeout;
            match tokio::time::timeout(drain, &mut handle).await {
                Ok(joined) => joined.map_err(|e| BoothError::ShutdownError(e.to_string()))??,
                Err(_) => {
                    warn!("HTTP connections still open after {:?}; aborting server", drain);
                    handle.abort();
                }
            }
        }

        // 2. Camera service: reconnect worker and preview process
        if let Some(camera) = self.camera.take() {
            camera
                .shutdown(self.lifecycle_options.camera_shutdown_timeout)
                .await;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
