//! v4l2loopback kernel module management

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::errors::BoothError;
use crate::system::command::{args, CommandRunner};
use crate::system::janitor::DeviceJanitor;
use crate::system::privilege::PrivilegeCheck;

/// Module parameters compatible with camera streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackParams {
    /// Number of loopback devices
    pub devices: u32,

    /// Fixed node numbers for the loopback devices
    pub video_nr: Vec<u32>,

    /// Card label reported to introspection tools
    pub card_label: String,

    /// Exclusive capabilities hide the capture side until a producer writes
    pub exclusive_caps: bool,

    pub max_buffers: u32,
}

impl Default for LoopbackParams {
    fn default() -> Self {
        Self {
            devices: 1,
            video_nr: vec![2],
            card_label: "Photobooth DSLR".to_string(),
            exclusive_caps: false,
            max_buffers: 2,
        }
    }
}

impl LoopbackParams {
    /// `key=value` arguments for modprobe
    pub fn to_args(&self) -> Vec<String> {
        let mut params = vec![format!("devices={}", self.devices)];
        if !self.video_nr.is_empty() {
            let numbers: Vec<String> = self.video_nr.iter().map(|n| n.to_string()).collect();
            params.push(format!("video_nr={}", numbers.join(",")));
        }
        params.push(format!("card_label={}", self.card_label));
        params.push(format!("exclusive_caps={}", u8::from(self.exclusive_caps)));
        params.push(format!("max_buffers={}", self.max_buffers));
        params
    }
}

/// Module lifecycle. A failed transition reverts instead of entering an error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

/// Current state plus the reason of the last failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    pub state: ModuleState,
    pub last_error: Option<String>,
}

/// Kernel module manager options
#[derive(Debug, Clone)]
pub struct ModuleOptions {
    pub module_name: String,

    /// Device root used to name the loopback nodes
    pub dev_root: PathBuf,

    pub load_timeout: Duration,

    pub unload_timeout: Duration,

    /// Pause between unload and load
    pub reload_delay: Duration,

    /// Tools killed before unloading
    pub tool_patterns: Vec<String>,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            module_name: "v4l2loopback".to_string(),
            dev_root: PathBuf::from("/dev"),
            load_timeout: Duration::from_secs(10),
            unload_timeout: Duration::from_secs(5),
            reload_delay: Duration::from_millis(500),
            tool_patterns: crate::system::janitor::CAMERA_TOOL_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Loads, unloads and reloads the video-loopback module
pub struct KernelModuleManager {
    options: ModuleOptions,
    runner: Arc<dyn CommandRunner>,
    privileges: Arc<dyn PrivilegeCheck>,
    janitor: Arc<DeviceJanitor>,
    status: Mutex<ModuleStatus>,
}

impl KernelModuleManager {
    pub fn new(
        options: ModuleOptions,
        runner: Arc<dyn CommandRunner>,
        privileges: Arc<dyn PrivilegeCheck>,
        janitor: Arc<DeviceJanitor>,
    ) -> Self {
        Self {
            options,
            runner,
            privileges,
            janitor,
            status: Mutex::new(ModuleStatus {
                state: ModuleState::Unloaded,
                last_error: None,
            }),
        }
    }

    pub fn status(&self) -> ModuleStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, state: ModuleState) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.state = state;
        if state == ModuleState::Loaded || state == ModuleState::Unloaded {
            status.last_error = None;
        }
    }

    fn fail(&self, state: ModuleState, reason: String) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.state = state;
        status.last_error = Some(reason);
    }

    fn needs_root_message(&self, action: &str, modprobe_args: &[String]) -> String {
        let command = modprobe_args
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{} {} requires root privileges. Run boothd as root, allow passwordless sudo for modprobe, or run: sudo modprobe {}",
            action, self.options.module_name, command
        )
    }

    fn load_args(&self, params: &LoopbackParams) -> Vec<String> {
        let mut modprobe_args = vec![self.options.module_name.clone()];
        modprobe_args.extend(params.to_args());
        modprobe_args
    }

    /// Whether the module appears in the running module table
    pub async fn is_loaded(&self) -> bool {
        let loaded = match self
            .runner
            .run("lsmod", &[], self.options.load_timeout)
            .await
        {
            Ok(output) if output.success() => output.stdout.lines().any(|line| {
                line.split_whitespace().next() == Some(self.options.module_name.as_str())
            }),
            Ok(_) => false,
            Err(e) => {
                debug!("lsmod failed: {}", e);
                false
            }
        };

        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(status.state, ModuleState::Loaded | ModuleState::Unloaded) {
            status.state = if loaded {
                ModuleState::Loaded
            } else {
                ModuleState::Unloaded
            };
        }
        loaded
    }

    /// Load the module with `params`.
    ///
    /// Without root or passwordless sudo this returns [`BoothError::NeedsRoot`]
    /// carrying operator instructions.
    pub async fn load(&self, params: &LoopbackParams) -> Result<(), BoothError> {
        let privilege = self.privileges.privilege().await;

        let modprobe_args = self.load_args(params);

        let Some((program, argv)) = privilege.elevate("modprobe", &modprobe_args) else {
            let message = self.needs_root_message("Loading", &modprobe_args);
            warn!("{}", message);
            self.fail(ModuleState::Unloaded, message.clone());
            return Err(BoothError::NeedsRoot(message));
        };

        info!("Loading {} ({})", self.options.module_name, params.to_args().join(" "));
        self.set_state(ModuleState::Loading);

        match self
            .runner
            .run(&program, &argv, self.options.load_timeout)
            .await
        {
            Ok(output) if output.success() => {
                self.set_state(ModuleState::Loaded);
                info!("{} loaded", self.options.module_name);
                Ok(())
            }
            Ok(output) => {
                let reason = format!("modprobe exited with {:?}: {}", output.status, output.stderr.trim());
                error!("Failed to load {}: {}", self.options.module_name, reason);
                self.fail(ModuleState::Unloaded, reason.clone());
                Err(BoothError::ModuleError(reason))
            }
            Err(e) => {
                error!("Failed to load {}: {}", self.options.module_name, e);
                self.fail(ModuleState::Unloaded, e.to_string());
                Err(BoothError::ModuleError(e.to_string()))
            }
        }
    }

    /// Unload the module. A stuck unload counts as failure.
    pub async fn unload(&self) -> Result<(), BoothError> {
        let privilege = self.privileges.privilege().await;
        let unload_args = args(["-r", self.options.module_name.as_str()]);

        let Some((program, argv)) = privilege.elevate("modprobe", &unload_args) else {
            let message = self.needs_root_message("Unloading", &unload_args);
            self.fail(ModuleState::Loaded, message.clone());
            return Err(BoothError::NeedsRoot(message));
        };

        info!("Unloading {}", self.options.module_name);
        self.set_state(ModuleState::Unloading);

        match self
            .runner
            .run(&program, &argv, self.options.unload_timeout)
            .await
        {
            Ok(output) if output.success() => {
                self.set_state(ModuleState::Unloaded);
                Ok(())
            }
            Ok(output) => {
                let reason = format!("modprobe -r exited with {:?}: {}", output.status, output.stderr.trim());
                error!("Failed to unload {}: {}", self.options.module_name, reason);
                self.fail(ModuleState::Loaded, reason.clone());
                Err(BoothError::ModuleError(reason))
            }
            Err(e) => {
                error!("Failed to unload {}: {}", self.options.module_name, e);
                self.fail(ModuleState::Loaded, e.to_string());
                Err(BoothError::ModuleError(e.to_string()))
            }
        }
    }

    /// Loopback node paths for `params`
    pub fn device_paths(&self, params: &LoopbackParams) -> Vec<String> {
        params
            .video_nr
            .iter()
            .map(|n| {
                self.options
                    .dev_root
                    .join(format!("video{}", n))
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    /// Unload-if-loaded, then load.
    ///
    /// Processes holding the loopback nodes are killed first; the kernel
    /// refuses to unload a module with open handles.
    pub async fn reload(&self, params: &LoopbackParams) -> Result<(), BoothError> {
        if !self.privileges.privilege().await.can_elevate() {
            let message = self.needs_root_message("Reloading", &self.load_args(params));
            self.fail(self.status().state, message.clone());
            return Err(BoothError::NeedsRoot(message));
        }

        info!("Reloading {}", self.options.module_name);

        let patterns: Vec<&str> = self.options.tool_patterns.iter().map(String::as_str).collect();
        self.janitor.kill_tools(&patterns);
        self.janitor.release_all(&self.device_paths(params)).await;

        if self.is_loaded().await {
            self.unload().await?;
            tokio::time::sleep(self.options.reload_delay).await;
        }

        self.load(params).await
    }
}

/// Quote an argument for a copy-pasteable shell command line
fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=,./:".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
