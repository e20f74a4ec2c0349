//! Camera facade.
//!
//! Owns the bound [`CameraIdentity`] and drives every transition of it:
//! initialization, reconnection polling and full restarts. Transitions are
//! serialized by one async lock; captures hold it too so a poll never
//! rebinds the camera underneath a running capture.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::camera::restart::RestartGuard;
use crate::camera::setup::{SetupChecker, SetupStatus};
use crate::capture::attempt::CaptureContext;
use crate::capture::chain::CaptureChain;
use crate::capture::guard::CaptureGuard;
use crate::devices::model::CameraIdentity;
use crate::devices::profiles::ProfileTable;
use crate::devices::registry::DeviceRegistry;
use crate::errors::BoothError;
use crate::kmod::manager::{KernelModuleManager, LoopbackParams, ModuleStatus};
use crate::pipeline::result::CaptureResult;
use crate::pipeline::ImagePipeline;
use crate::stream::admission::AdmissionStats;
use crate::stream::encoder::StreamTarget;
use crate::stream::supervisor::{StreamInfo, StreamState, StreamStats, StreamSupervisor};
use crate::stream::viewer::ViewerStream;
use crate::system::janitor::{DeviceJanitor, CAMERA_TOOL_PATTERNS};
use crate::utils::capture_filename;
use crate::workers::reconnect;

/// Camera service options
#[derive(Debug, Clone)]
pub struct CameraOptions {
    /// Report a browser camera instead of "none" when nothing is attached
    pub browser_fallback: bool,

    /// Raw captures are written here
    pub captures_dir: PathBuf,

    /// Minimum time between the end of one capture and the next
    pub capture_cooldown: Duration,

    pub restart_limit: usize,

    pub restart_window: Duration,

    /// Pause between teardown and rediscovery during a restart
    pub restart_settle: Duration,

    /// Reload the loopback module during restarts
    pub manage_module: bool,

    pub loopback: LoopbackParams,

    /// Poll interval while no camera is bound
    pub idle_poll_interval: Duration,

    pub reconnect: reconnect::Options,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            browser_fallback: false,
            captures_dir: PathBuf::from("/var/lib/boothd/captures"),
            capture_cooldown: Duration::from_secs(3),
            restart_limit: 3,
            restart_window: Duration::from_secs(60),
            restart_settle: Duration::from_secs(2),
            manage_module: true,
            loopback: LoopbackParams::default(),
            idle_poll_interval: Duration::from_secs(5),
            reconnect: reconnect::Options::default(),
        }
    }
}

/// Collaborators of the camera service
pub struct CameraParts {
    pub registry: Arc<DeviceRegistry>,
    pub kmod: Arc<KernelModuleManager>,
    pub stream: Arc<StreamSupervisor>,
    pub janitor: Arc<DeviceJanitor>,
    pub profiles: Arc<ProfileTable>,
    pub setup: SetupChecker,
    pub chain: CaptureChain,
    pub pipeline: ImagePipeline,
}

/// Result of one reconnection poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollTransition {
    Unchanged,
    Connected,
    Disconnected,
    Rebound,
    /// Same camera, but its dead preview was restarted
    Repaired,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub state: StreamState,
    pub active: Option<StreamInfo>,
    pub stats: StreamStats,
    pub admission: AdmissionStats,
}

/// Snapshot served by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub identity: CameraIdentity,
    pub setup: SetupStatus,
    pub stream: StreamStatus,
    pub module: ModuleStatus,
    pub capture_in_flight: bool,
    pub restart_in_progress: bool,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_transition: Option<PollTransition>,
}

pub struct CameraService {
    options: CameraOptions,
    registry: Arc<DeviceRegistry>,
    kmod: Arc<KernelModuleManager>,
    stream: Arc<StreamSupervisor>,
    janitor: Arc<DeviceJanitor>,
    profiles: Arc<ProfileTable>,
    setup: SetupChecker,
    chain: CaptureChain,
    pipeline: ImagePipeline,

    identity: RwLock<CameraIdentity>,
    setup_status: RwLock<SetupStatus>,
    last_poll: Mutex<Option<(DateTime<Utc>, PollTransition)>>,
    transition: tokio::sync::Mutex<()>,
    capture_guard: Arc<CaptureGuard>,
    restart_guard: Arc<RestartGuard>,

    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl CameraService {
    pub fn new(options: CameraOptions, parts: CameraParts) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let capture_guard = CaptureGuard::new(options.capture_cooldown);
        let restart_guard = RestartGuard::new(options.restart_limit, options.restart_window);

        Arc::new(Self {
            options,
            registry: parts.registry,
            kmod: parts.kmod,
            stream: parts.stream,
            janitor: parts.janitor,
            profiles: parts.profiles,
            setup: parts.setup,
            chain: parts.chain,
            pipeline: parts.pipeline,
            identity: RwLock::new(CameraIdentity::disconnected()),
            setup_status: RwLock::new(SetupStatus::pending()),
            last_poll: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
            capture_guard,
            restart_guard,
            worker: Mutex::new(None),
            shutdown_tx,
        })
    }

    /// Currently bound camera
    pub fn identity(&self) -> CameraIdentity {
        self.identity.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_identity(&self, identity: CameraIdentity) {
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = identity;
    }

    pub fn setup_status(&self) -> SetupStatus {
        self.setup_status.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn absent_identity(&self) -> CameraIdentity {
        if self.options.browser_fallback {
            CameraIdentity::browser()
        } else {
            CameraIdentity::disconnected()
        }
    }

    /// Check setup, discover and bind a camera, and start the reconnect worker.
    ///
    /// Returns whether a camera was bound. The worker starts either way, so a
    /// camera plugged in later is still picked up.
    pub async fn init(self: &Arc<Self>) -> bool {
        let bound = {
            let _transition = self.transition.lock().await;

            let setup = self.setup.check().await;
            if !setup.success {
                warn!("Camera setup incomplete: {}", setup.message);
            }
            let blocks = setup.blocks_discovery();
            *self.setup_status.write().unwrap_or_else(|e| e.into_inner()) = setup;

            let discovery = if blocks {
                None
            } else {
                self.registry.discover(&self.profiles).await
            };

            match discovery {
                Some(discovery) => {
                    self.bind(discovery.identity).await;
                    true
                }
                None => {
                    info!("No camera found during init");
                    self.set_identity(self.absent_identity());
                    false
                }
            }
        };

        self.spawn_worker();
        bound
    }

    fn spawn_worker(self: &Arc<Self>) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return;
        }

        let service = Arc::clone(self);
        let events = self.registry.take_events();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let options = self.options.reconnect.clone();

        *worker = Some(tokio::spawn(async move {
            let shutdown_signal = Box::pin(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            });
            reconnect::run(&options, &service, events, tokio::time::sleep, shutdown_signal).await;
        }));
    }

    /// Bind `identity` and start its preview
    async fn bind(&self, identity: CameraIdentity) {
        info!(
            "Bound {} ({}) at {}",
            identity.model,
            identity.family,
            identity.device_path.as_deref().unwrap_or("-")
        );
        let target = StreamTarget::from_identity(&identity);
        self.set_identity(identity);

        if let Some(target) = target {
            if let Err(e) = self.stream.start(target).await {
                error!("Preview failed to start: {}", e);
            }
        }
    }

    async fn unbind(&self) {
        self.stream.stop().await;
        self.stream.clear_target();
        self.set_identity(self.absent_identity());
    }

    /// Interval until the next reconnection poll
    pub fn poll_interval(&self) -> Duration {
        let identity = self.identity();
        if identity.connected {
            self.profiles.get(identity.family).poll_interval
        } else {
            self.options.idle_poll_interval
        }
    }

    /// Rediscover and reconcile the bound camera with what is attached now
    pub async fn poll_once(&self) -> PollTransition {
        let _transition = self.transition.lock().await;

        let current = self.identity();
        let found = self
            .registry
            .discover(&self.profiles)
            .await
            .map(|discovery| discovery.identity);

        let transition = match found {
            None if !current.connected => PollTransition::Unchanged,
            None => {
                warn!("Camera {} disconnected", current.model);
                self.unbind().await;
                PollTransition::Disconnected
            }
            Some(identity) if !current.connected => {
                info!("Camera {} connected", identity.model);
                self.bind(identity).await;
                PollTransition::Connected
            }
            Some(identity) if identity.differs_from(&current) => {
                info!(
                    "Camera changed from {} at {} to {} at {}",
                    current.model,
                    current.device_path.as_deref().unwrap_or("-"),
                    identity.model,
                    identity.device_path.as_deref().unwrap_or("-")
                );
                self.stream.stop().await;
                self.stream.clear_target();
                self.bind(identity).await;
                PollTransition::Rebound
            }
            Some(_) => self.repair_stream(&current).await,
        };

        *self.last_poll.lock().unwrap_or_else(|e| e.into_inner()) = Some((Utc::now(), transition));
        transition
    }

    async fn repair_stream(&self, current: &CameraIdentity) -> PollTransition {
        if self.stream.get_handle().is_some() {
            return PollTransition::Unchanged;
        }
        let Some(target) = StreamTarget::from_identity(current) else {
            return PollTransition::Unchanged;
        };

        match self.stream.start(target).await {
            Ok(_) => {
                info!("Preview restarted for {}", current.model);
                PollTransition::Repaired
            }
            Err(e) => {
                warn!("Preview repair failed: {}", e);
                PollTransition::Unchanged
            }
        }
    }

    /// Capture, process and deliver one photo.
    ///
    /// A concurrent request fails with [`BoothError::Busy`], one inside the
    /// cooldown with [`BoothError::RateLimited`].
    pub async fn capture_photo(&self) -> Result<CaptureResult, BoothError> {
        let _ticket = self.capture_guard.try_begin()?;
        let _transition = self.transition.lock().await;

        let identity = self.identity();
        let ctx = CaptureContext {
            identity: identity.clone(),
            profile: self.profiles.get(identity.family).clone(),
        };

        tokio::fs::create_dir_all(&self.options.captures_dir).await?;
        let output = self.options.captures_dir.join(capture_filename(Utc::now()));

        let report = self.chain.run(&ctx, &output).await?;
        if report.placeholder {
            warn!("Capture fell back to the placeholder image");
        }
        Ok(self.pipeline.process(report, identity).await)
    }

    /// Tear the camera subsystem down and bring it back up.
    ///
    /// Returns whether a camera was bound afterwards.
    pub async fn restart(&self) -> Result<bool, BoothError> {
        let _ticket = self.restart_guard.try_begin()?;
        let _transition = self.transition.lock().await;

        info!("Restarting camera subsystem");
        self.stream.stop().await;
        self.stream.clear_target();

        self.janitor.kill_tools(CAMERA_TOOL_PATTERNS);
        let nodes: Vec<String> = self
            .registry
            .enumerate()
            .await
            .into_iter()
            .map(|device| device.path)
            .collect();
        let released = self.janitor.release_all(&nodes).await;
        debug!("Released {} device holders", released);

        if self.options.manage_module {
            match self.kmod.reload(&self.options.loopback).await {
                Ok(()) => {}
                Err(BoothError::NeedsRoot(_)) => debug!("Skipping module reload without privileges"),
                Err(e) => warn!("Module reload failed: {}", e),
            }
        }

        self.registry.invalidate_all();
        self.set_identity(self.absent_identity());
        tokio::time::sleep(self.options.restart_settle).await;

        match self.registry.discover(&self.profiles).await {
            Some(discovery) => {
                self.bind(discovery.identity).await;
                Ok(true)
            }
            None => {
                warn!("No camera found after restart");
                Ok(false)
            }
        }
    }

    /// Public preview URL while a camera is bound
    pub fn stream_url(&self) -> Option<String> {
        self.identity()
            .connected
            .then(|| self.stream.public_url().to_string())
    }

    /// Admit a preview viewer
    pub async fn open_viewer(&self) -> Result<ViewerStream, BoothError> {
        if !self.identity().connected {
            return Err(BoothError::CameraUnavailable(self.setup_status().message));
        }
        self.stream.open_viewer().await
    }

    pub fn status(&self) -> CameraStatus {
        let last_poll = *self.last_poll.lock().unwrap_or_else(|e| e.into_inner());

        CameraStatus {
            identity: self.identity(),
            setup: self.setup_status(),
            stream: StreamStatus {
                state: self.stream.state(),
                active: self.stream.get_handle().map(|handle| StreamInfo::from(handle.as_ref())),
                stats: self.stream.stats(),
                admission: self.stream.admission_stats(),
            },
            module: self.kmod.status(),
            capture_in_flight: self.capture_guard.in_flight(),
            restart_in_progress: self.restart_guard.in_progress(),
            last_poll: last_poll.map(|(at, _)| at),
            last_transition: last_poll.map(|(_, transition)| transition),
        }
    }

    /// Stop the reconnect worker and the preview
    pub async fn shutdown(&self, timeout: Duration) {
        info!("Shutting down camera service");
        let _ = self.shutdown_tx.send(true);

        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut worker) = worker {
            if tokio::time::timeout(timeout, &mut worker).await.is_err() {
                warn!("Reconnect worker did not stop within {:?}; aborting", timeout);
                worker.abort();
            }
        }

        self.stream.stop().await;
    }
}
