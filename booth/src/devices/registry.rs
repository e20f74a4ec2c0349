//! Video device discovery and verification

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::devices::catalog::{identify_vendor, ModelMatch};
use crate::devices::formats::{parse_formats, PixelFormat};
use crate::devices::model::{device_index, Capability, CameraIdentity, VideoDevice};
use crate::devices::profiles::ProfileTable;
use crate::system::command::{args, CommandRunner};
use crate::system::devfs::DeviceFs;

/// Introspection errors that mean the node is not usable at all
const TRANSPORT_ERRORS: &[&str] = &[
    "Cannot open device",
    "Failed to open",
    "Input/output error",
    "No such device",
    "No such file or directory",
];

/// Device registry options
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Root of the device namespace
    pub dev_root: PathBuf,

    /// Introspection tool (v4l2-ctl compatible output)
    pub introspection_tool: String,

    /// Timeout for each introspection call
    pub command_timeout: Duration,

    /// How long a verification result is trusted
    pub verify_ttl: Duration,

    /// Ask gphoto2 for the DSLR model behind the loopback device
    pub detect_dslr_model: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            dev_root: PathBuf::from("/dev"),
            introspection_tool: "v4l2-ctl".to_string(),
            command_timeout: Duration::from_secs(5),
            verify_ttl: Duration::from_secs(10),
            detect_dslr_model: true,
        }
    }
}

/// Change in the set of video nodes between two enumerations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Changed {
        added: Vec<String>,
        removed: Vec<String>,
    },
}

/// A selected device and the identity bound to it
#[derive(Debug, Clone)]
pub struct Discovery {
    pub device: VideoDevice,
    pub identity: CameraIdentity,
}

struct VerifyEntry {
    checked_at: Instant,
    ok: bool,
}

/// Answers "which node, if any, is a working camera, and what model is it"
pub struct DeviceRegistry {
    options: RegistryOptions,
    runner: Arc<dyn CommandRunner>,
    fs: Arc<dyn DeviceFs>,
    verify_cache: Mutex<HashMap<String, VerifyEntry>>,
    last_seen: Mutex<Option<BTreeSet<String>>>,
    events_tx: mpsc::UnboundedSender<DeviceEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<DeviceEvent>>>,
}

impl DeviceRegistry {
    pub fn new(
        options: RegistryOptions,
        runner: Arc<dyn CommandRunner>,
        fs: Arc<dyn DeviceFs>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            options,
            runner,
            fs,
            verify_cache: Mutex::new(HashMap::new()),
            last_seen: Mutex::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Take the device event receiver. Only the first caller gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<DeviceEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Path of node `index` under the device root
    pub fn device_path(&self, index: u32) -> String {
        self.options
            .dev_root
            .join(format!("video{}", index))
            .to_string_lossy()
            .into_owned()
    }

    /// All `videoN` nodes, ordered by index. Unclassified.
    pub async fn enumerate(&self) -> Vec<VideoDevice> {
        let mut nodes: Vec<(u32, String)> = self
            .fs
            .list(&self.options.dev_root)
            .await
            .into_iter()
            .filter_map(|name| {
                let path = self.options.dev_root.join(&name).to_string_lossy().into_owned();
                device_index(&path).map(|index| (index, path))
            })
            .collect();
        nodes.sort_by_key(|(index, _)| *index);

        self.record_node_set(nodes.iter().map(|(_, path)| path.clone()).collect());

        nodes
            .into_iter()
            .map(|(_, path)| VideoDevice::new(path))
            .collect()
    }

    /// Compare with the previous pass; publish and invalidate on change
    fn record_node_set(&self, current: BTreeSet<String>) {
        let previous = {
            let mut last_seen = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
            last_seen.replace(current.clone())
        };

        // The first pass establishes the baseline
        let Some(previous) = previous else {
            return;
        };
        if previous == current {
            return;
        }

        let added: Vec<String> = current.difference(&previous).cloned().collect();
        let removed: Vec<String> = previous.difference(&current).cloned().collect();
        info!("Video devices changed: added {:?}, removed {:?}", added, removed);

        for path in added.iter().chain(removed.iter()) {
            self.invalidate(path);
        }

        // No subscriber is fine
        let _ = self.events_tx.send(DeviceEvent::Changed { added, removed });
    }

    /// Raw introspection text, `None` when the tool fails or times out
    async fn introspect(&self, path: &str) -> Option<String> {
        let result = self
            .runner
            .run(
                &self.options.introspection_tool,
                &args(["--device", path, "--all"]),
                self.options.command_timeout,
            )
            .await;

        match result {
            Ok(output) if output.success() => Some(output.stdout),
            Ok(output) => {
                debug!("Introspection of {} failed: {}", path, output.stderr.trim());
                None
            }
            Err(e) => {
                debug!("Introspection of {} failed: {}", path, e);
                None
            }
        }
    }

    /// Capability of `device`. Fails closed to [`Capability::Unknown`].
    pub async fn classify(&self, device: &VideoDevice) -> Capability {
        match self.introspect(&device.path).await {
            Some(info) => capability_from_info(&info),
            None => Capability::Unknown,
        }
    }

    /// Classify `path` and keep the introspection text
    pub async fn inspect(&self, path: &str) -> VideoDevice {
        let mut device = VideoDevice::new(path);
        if let Some(info) = self.introspect(path).await {
            device.capability = capability_from_info(&info);
            device.raw_info = info;
            device.verified_at = Some(Utc::now());
        }
        device
    }

    /// Node exists, is a character device and answers an introspection query.
    ///
    /// Results are cached for a short window; the cache is advisory.
    pub async fn verify(&self, path: &str) -> bool {
        {
            let cache = self.verify_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(path) {
                if entry.checked_at.elapsed() < self.options.verify_ttl {
                    return entry.ok;
                }
            }
        }

        let ok = self.verify_uncached(path).await;

        self.verify_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                path.to_string(),
                VerifyEntry {
                    checked_at: Instant::now(),
                    ok,
                },
            );
        ok
    }

    async fn verify_uncached(&self, path: &str) -> bool {
        let node = Path::new(path);
        if !self.fs.exists(node).await || !self.fs.is_char_device(node).await {
            return false;
        }

        match self
            .runner
            .run(
                &self.options.introspection_tool,
                &args(["--device", path, "--info"]),
                self.options.command_timeout,
            )
            .await
        {
            Ok(output) => {
                let text = output.combined();
                output.success() && !TRANSPORT_ERRORS.iter().any(|e| text.contains(e))
            }
            Err(e) => {
                debug!("Verification of {} failed: {}", path, e);
                false
            }
        }
    }

    /// Drop the cached verification of `path`
    pub fn invalidate(&self, path: &str) {
        self.verify_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }

    /// Drop every cached verification
    pub fn invalidate_all(&self) {
        self.verify_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Verified, capture-capable devices ordered by index
    pub async fn capture_candidates(&self) -> Vec<VideoDevice> {
        let mut candidates = Vec::new();
        for device in self.enumerate().await {
            let device = self.inspect(&device.path).await;
            if device.capability != Capability::Capture {
                continue;
            }
            if self.verify(&device.path).await {
                candidates.push(device);
            } else {
                debug!("{} reports capture but failed verification", device.path);
            }
        }
        candidates
    }

    /// Pixel formats supported by `path`; empty when unknown
    pub async fn list_formats(&self, path: &str) -> Vec<PixelFormat> {
        match self
            .runner
            .run(
                &self.options.introspection_tool,
                &args(["--device", path, "--list-formats-ext"]),
                self.options.command_timeout,
            )
            .await
        {
            Ok(output) if output.success() => parse_formats(&output.stdout),
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!("Format query for {} failed: {}", path, e);
                Vec::new()
            }
        }
    }

    /// `gphoto2 --auto-detect` output when the tool is installed
    async fn dslr_model_text(&self) -> Option<String> {
        if !self.options.detect_dslr_model || !self.runner.exists("gphoto2") {
            return None;
        }

        match self
            .runner
            .run(
                "gphoto2",
                &args(["--auto-detect"]),
                self.options.command_timeout,
            )
            .await
        {
            Ok(output) if output.success() => Some(output.stdout),
            Ok(_) => None,
            Err(e) => {
                debug!("gphoto2 auto-detect failed: {}", e);
                None
            }
        }
    }

    /// Find the camera to bind.
    ///
    /// Devices whose own introspection names a vendor are preferred; the
    /// matched family's selection strategy picks the node.
    pub async fn discover(&self, profiles: &ProfileTable) -> Option<Discovery> {
        let candidates = self.capture_candidates().await;
        if candidates.is_empty() {
            debug!("No capture-capable video devices found");
            return None;
        }

        let vendor_devices: Vec<VideoDevice> = candidates
            .iter()
            .filter(|device| identify_vendor(&device.raw_info).is_some())
            .cloned()
            .collect();

        let dslr_match = self
            .dslr_model_text()
            .await
            .and_then(|text| identify_vendor(&text));

        let model = dslr_match
            .or_else(|| {
                vendor_devices
                    .iter()
                    .find_map(|device| identify_vendor(&device.raw_info))
            })
            .unwrap_or_else(ModelMatch::generic_webcam);

        let pool = if vendor_devices.is_empty() {
            &candidates
        } else {
            &vendor_devices
        };

        let profile = profiles.get(model.family);
        let Some(device) = profile.selection.select(pool).cloned() else {
            warn!("No device selectable for {} among {} candidates", model.family, pool.len());
            return None;
        };

        info!("Discovered {} ({}) at {}", model.model, model.family, device.path);

        let identity = CameraIdentity {
            camera_type: model.camera_type,
            model: model.model,
            family: model.family,
            device_path: Some(device.path.clone()),
            connected: true,
        };

        Some(Discovery { device, identity })
    }
}

/// "Video Capture" wins over "Video Output" when a node reports both
pub fn capability_from_info(info: &str) -> Capability {
    if info.contains("Video Capture") {
        Capability::Capture
    } else if info.contains("Video Output") {
        Capability::Output
    } else {
        Capability::Unknown
    }
}
