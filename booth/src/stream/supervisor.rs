//! Preview stream lifecycle.
//!
//! At most one preview process runs at a time. Its stdout is fanned out to
//! viewers over a broadcast channel; its stderr is scanned by the watchdog.
//! Start and stop are serialized by an async operation lock, while the
//! bookkeeping lives behind a plain mutex that is never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::devices::profiles::ProfileTable;
use crate::errors::BoothError;
use crate::stream::admission::{AdmissionOptions, AdmissionStats, ViewerAdmission};
use crate::stream::encoder::{preview_args, EncoderOptions, StreamTarget};
use crate::stream::viewer::{DedicatedProcess, ViewerStream};
use crate::stream::watchdog;
use crate::system::janitor::DeviceJanitor;
use crate::system::process::{ProcessControl, ProcessSpawner};

/// Stream supervisor options
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub encoder: EncoderOptions,

    /// Public URL viewers use to reach the preview
    pub public_url: String,

    /// Grace period between SIGTERM and SIGKILL
    pub stop_grace: Duration,

    /// Pause after stopping before a capture opens the device
    pub settle_delay: Duration,

    /// Upper bound on waiting for the post-stop device cleanup
    pub janitor_timeout: Duration,

    /// Kill leftover readers of the device after every stop
    pub release_on_stop: bool,

    /// Read size for encoder output
    pub chunk_size: usize,

    /// Chunks buffered per viewer before it lags
    pub channel_capacity: usize,

    pub admission: AdmissionOptions,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            encoder: EncoderOptions::default(),
            public_url: "/api/camera/stream".to_string(),
            stop_grace: Duration::from_secs(2),
            settle_delay: Duration::from_millis(1000),
            janitor_timeout: Duration::from_secs(3),
            release_on_stop: true,
            chunk_size: 64 * 1024,
            channel_capacity: 64,
            admission: AdmissionOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// A running preview
#[derive(Debug)]
pub struct StreamHandle {
    pub id: Uuid,
    pub pid: Option<u32>,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub target: StreamTarget,
    frames: broadcast::Sender<Bytes>,
}

impl StreamHandle {
    /// Receive encoder output from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.frames.subscribe()
    }

    pub fn viewers(&self) -> usize {
        self.frames.receiver_count()
    }
}

/// Serializable view of a [`StreamHandle`]
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub id: Uuid,
    pub pid: Option<u32>,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub device_path: String,
    pub viewers: usize,
}

impl From<&StreamHandle> for StreamInfo {
    fn from(handle: &StreamHandle) -> Self {
        Self {
            id: handle.id,
            pid: handle.pid,
            url: handle.url.clone(),
            started_at: handle.started_at,
            device_path: handle.target.device_path.clone(),
            viewers: handle.viewers(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub starts: u64,
    pub stops: u64,
    pub watchdog_kills: u64,
    pub unexpected_exits: u64,
}

#[derive(Default)]
struct Counters {
    starts: AtomicU64,
    stops: AtomicU64,
    watchdog_kills: AtomicU64,
    unexpected_exits: AtomicU64,
}

struct ActiveStream {
    handle: Arc<StreamHandle>,
    child: Child,
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    state: StreamState,
    active: Option<ActiveStream>,
    last_target: Option<StreamTarget>,
    generation: u64,
}

/// Owns the preview process and everything attached to it
pub struct StreamSupervisor {
    options: StreamOptions,
    profiles: Arc<ProfileTable>,
    spawner: Arc<dyn ProcessSpawner>,
    processes: Arc<dyn ProcessControl>,
    janitor: Arc<DeviceJanitor>,
    admission: Arc<ViewerAdmission>,
    op_lock: tokio::sync::Mutex<()>,
    inner: Mutex<Inner>,
    janitor_task: Mutex<Option<JoinHandle<()>>>,
    dedicated: Mutex<HashMap<Uuid, u32>>,
    counters: Counters,
}

impl StreamSupervisor {
    pub fn new(
        options: StreamOptions,
        profiles: Arc<ProfileTable>,
        spawner: Arc<dyn ProcessSpawner>,
        processes: Arc<dyn ProcessControl>,
        janitor: Arc<DeviceJanitor>,
    ) -> Self {
        let admission = Arc::new(ViewerAdmission::new(options.admission.clone()));
        Self {
            options,
            profiles,
            spawner,
            processes,
            janitor,
            admission,
            op_lock: tokio::sync::Mutex::new(()),
            inner: Mutex::new(Inner {
                state: StreamState::Idle,
                active: None,
                last_target: None,
                generation: 0,
            }),
            janitor_task: Mutex::new(None),
            dedicated: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the preview for `target`.
    ///
    /// Idempotent: when a stream is already running its handle is returned
    /// and no second process is spawned.
    pub async fn start(self: &Arc<Self>, target: StreamTarget) -> Result<Arc<StreamHandle>, BoothError> {
        let _op = self.op_lock.lock().await;

        {
            let mut inner = self.lock_inner();
            if let Some(active) = &inner.active {
                if active.handle.target != target {
                    debug!(
                        "Preview already running on {}; ignoring request for {}",
                        active.handle.target.device_path, target.device_path
                    );
                }
                return Ok(active.handle.clone());
            }
            inner.state = StreamState::Starting;
            inner.last_target = Some(target.clone());
        }

        let profile = self.profiles.get(target.family);
        let argv = preview_args(&self.options.encoder, profile, &target.device_path);

        let mut child = match self.spawner.spawn(&self.options.encoder.program, &argv) {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start preview on {}: {}", target.device_path, e);
                self.lock_inner().state = StreamState::Idle;
                return Err(BoothError::StreamError(e.to_string()));
            }
        };

        let (frames, _) = broadcast::channel(self.options.channel_capacity);
        let handle = Arc::new(StreamHandle {
            id: Uuid::new_v4(),
            pid: child.id(),
            url: self.options.public_url.clone(),
            started_at: Utc::now(),
            target: target.clone(),
            frames: frames.clone(),
        });

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut inner = self.lock_inner();
        inner.generation += 1;
        let generation = inner.generation;

        let mut tasks = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            tasks.push(tokio::spawn(pump_supervised(
                stdout,
                frames,
                self.options.chunk_size,
                Arc::downgrade(self),
                generation,
            )));
        }
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(watch_diagnostics(
                stderr,
                Arc::downgrade(self),
                generation,
            )));
        }

        inner.active = Some(ActiveStream {
            handle: handle.clone(),
            child,
            generation,
            tasks,
        });
        inner.state = StreamState::Active;
        drop(inner);

        self.counters.starts.fetch_add(1, Ordering::Relaxed);
        info!(
            "Preview started on {} (pid {:?}, {} {})",
            target.device_path, handle.pid, target.model, profile.stream
        );
        Ok(handle)
    }

    /// Stop the preview. Safe to call when nothing runs.
    ///
    /// Returns whether a stream was stopped. The handle is cleared even when
    /// termination fails; a background cleanup then kills leftover readers of
    /// the device.
    pub async fn stop(&self) -> bool {
        let _op = self.op_lock.lock().await;

        let active = {
            let mut inner = self.lock_inner();
            let active = inner.active.take();
            inner.state = if active.is_some() {
                StreamState::Stopping
            } else {
                StreamState::Idle
            };
            active
        };

        let Some(active) = active else {
            return false;
        };

        let device_path = active.handle.target.device_path.clone();
        self.terminate(active, true).await;
        self.lock_inner().state = StreamState::Idle;
        self.counters.stops.fetch_add(1, Ordering::Relaxed);
        info!("Preview stopped on {}", device_path);

        if self.options.release_on_stop {
            let janitor = self.janitor.clone();
            // Process table scans block
            let task = tokio::task::spawn_blocking(move || {
                janitor.release_readers(&device_path);
            });
            let mut slot = self.janitor_task.lock().unwrap_or_else(|e| e.into_inner());
            *slot = Some(task);
        }

        true
    }

    /// Tear down the stream started as `generation`, unless it was already
    /// replaced or stopped. Used when the process dies or the watchdog fires.
    async fn invalidate(&self, generation: u64, reason: &str) -> bool {
        let active = {
            let mut inner = self.lock_inner();
            match &inner.active {
                Some(active) if active.generation == generation => {}
                _ => return false,
            }
            inner.state = StreamState::Idle;
            inner.active.take()
        };

        let Some(active) = active else {
            return false;
        };

        warn!(
            "Preview on {} invalidated: {}",
            active.handle.target.device_path, reason
        );
        self.terminate(active, false).await;
        true
    }

    async fn terminate(&self, active: ActiveStream, abort_tasks: bool) {
        let ActiveStream {
            handle,
            mut child,
            tasks,
            ..
        } = active;

        if let Some(pid) = child.id() {
            if !self.processes.terminate(pid, false) {
                debug!("SIGTERM not delivered to preview pid {}", pid);
            }
        }

        // Dropping the readers closes the pipes whether or not the process exits
        if abort_tasks {
            for task in &tasks {
                task.abort();
            }
        }

        match tokio::time::timeout(self.options.stop_grace, child.wait()).await {
            Ok(Ok(status)) => debug!("Preview {} exited with {}", handle.id, status),
            Ok(Err(e)) => warn!("Failed to reap preview {}: {}", handle.id, e),
            Err(_) => {
                warn!(
                    "Preview {} ignored SIGTERM for {:?}; killing",
                    handle.id, self.options.stop_grace
                );
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill preview {}: {}", handle.id, e);
                }
                let _ = tokio::time::timeout(self.options.stop_grace, child.wait()).await;
            }
        }
    }

    /// Current stream, if any
    pub fn get_handle(&self) -> Option<Arc<StreamHandle>> {
        self.lock_inner()
            .active
            .as_ref()
            .map(|active| active.handle.clone())
    }

    pub fn public_url(&self) -> &str {
        &self.options.public_url
    }

    pub fn state(&self) -> StreamState {
        self.lock_inner().state
    }

    /// Target of the most recent start request
    pub fn last_target(&self) -> Option<StreamTarget> {
        self.lock_inner().last_target.clone()
    }

    /// Forget the last target so no resume restarts a vanished camera
    pub fn clear_target(&self) {
        self.lock_inner().last_target = None;
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            starts: self.counters.starts.load(Ordering::Relaxed),
            stops: self.counters.stops.load(Ordering::Relaxed),
            watchdog_kills: self.counters.watchdog_kills.load(Ordering::Relaxed),
            unexpected_exits: self.counters.unexpected_exits.load(Ordering::Relaxed),
        }
    }

    pub fn admission_stats(&self) -> AdmissionStats {
        self.admission.stats()
    }

    /// Release the device for a still capture.
    ///
    /// Stops the shared preview and any on-demand viewer processes, waits
    /// for the device cleanup and lets the device settle. Returns whether a
    /// shared preview was running.
    pub async fn pause_for_capture(&self) -> bool {
        let was_active = self.stop().await;

        let dedicated: Vec<u32> = {
            let viewers = self.dedicated.lock().unwrap_or_else(|e| e.into_inner());
            viewers.values().copied().collect()
        };
        for pid in dedicated {
            debug!("Stopping on-demand viewer process {} for capture", pid);
            self.processes.terminate(pid, false);
        }

        let cleanup = self
            .janitor_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = cleanup {
            match tokio::time::timeout(self.options.janitor_timeout, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Device cleanup task failed: {}", e),
                Err(_) => {
                    warn!("Device cleanup still running after {:?}", self.options.janitor_timeout)
                }
            }
        }

        tokio::time::sleep(self.options.settle_delay).await;
        was_active
    }

    /// Restart the preview on the last target, whatever the capture outcome was
    pub async fn resume_after_capture(self: &Arc<Self>) -> Option<Arc<StreamHandle>> {
        let target = self.last_target()?;
        match self.start(target).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to resume preview after capture: {}", e);
                None
            }
        }
    }

    /// Admit a viewer.
    ///
    /// Viewers share the running preview. Without one, a dedicated encoder
    /// process is spawned for this viewer alone and killed when it leaves.
    pub async fn open_viewer(self: &Arc<Self>) -> Result<ViewerStream, BoothError> {
        let permit = self.admission.admit()?;

        if let Some(handle) = self.get_handle() {
            return Ok(ViewerStream::shared(handle.subscribe(), permit));
        }

        let Some(target) = self.last_target() else {
            return Err(BoothError::CameraUnavailable(
                "no camera is bound for preview".to_string(),
            ));
        };

        let profile = self.profiles.get(target.family);
        let argv = preview_args(&self.options.encoder, profile, &target.device_path);
        let mut child = self
            .spawner
            .spawn(&self.options.encoder.program, &argv)
            .map_err(|e| BoothError::StreamError(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BoothError::StreamError("viewer process has no stdout".to_string()))?;
        let (frames, receiver) = broadcast::channel(self.options.channel_capacity);

        let mut tasks = vec![tokio::spawn(pump(stdout, frames, self.options.chunk_size))];
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(drain(stderr)));
        }

        let id = Uuid::new_v4();
        if let Some(pid) = child.id() {
            self.dedicated
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(id, pid);
        }
        info!("On-demand preview {} started on {}", id, target.device_path);

        let process = DedicatedProcess::new(id, child, tasks, Arc::downgrade(self));
        Ok(ViewerStream::dedicated(receiver, permit, process))
    }

    pub(crate) fn forget_dedicated(&self, id: &Uuid) {
        self.dedicated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Number of live on-demand viewer processes
    pub fn dedicated_count(&self) -> usize {
        self.dedicated.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

async fn pump<R>(mut reader: R, frames: broadcast::Sender<Bytes>, chunk_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                // No receivers is fine; the stream keeps running
                let _ = frames.send(Bytes::copy_from_slice(&buf[..n]));
            }
            Err(e) => {
                debug!("Preview output read failed: {}", e);
                break;
            }
        }
    }
}

async fn pump_supervised<R>(
    reader: R,
    frames: broadcast::Sender<Bytes>,
    chunk_size: usize,
    supervisor: Weak<StreamSupervisor>,
    generation: u64,
) where
    R: AsyncRead + Unpin,
{
    pump(reader, frames, chunk_size).await;

    if let Some(supervisor) = supervisor.upgrade() {
        if supervisor.invalidate(generation, "preview process exited").await {
            supervisor
                .counters
                .unexpected_exits
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn watch_diagnostics<R>(reader: R, supervisor: Weak<StreamSupervisor>, generation: u64)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "preview", "{}", line);

        let Some(rule) = watchdog::scan(&line) else {
            continue;
        };

        warn!("Preview watchdog: {} ({})", rule.reason, line.trim());
        if let Some(supervisor) = supervisor.upgrade() {
            if supervisor.invalidate(generation, &rule.reason.to_string()).await {
                supervisor
                    .counters
                    .watchdog_kills
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        return;
    }
}

async fn drain<R>(reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "preview", "{}", line);
    }
}
