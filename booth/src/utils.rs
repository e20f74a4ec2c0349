//! Utility functions

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::app::options::AppOptions;
use crate::app::state::HostParts;
use crate::camera::setup::SetupChecker;
use crate::devices::model::Capability;
use crate::devices::profiles::ProfileTable;
use crate::devices::registry::DeviceRegistry;
use crate::kmod::manager::{KernelModuleManager, ModuleState};
use crate::system::janitor::DeviceJanitor;

/// Version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(attempt as i32);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Capture file name: `photo_<YYYYmmdd_HHMMSS>_<uuid8>.jpg`
pub fn capture_filename(now: DateTime<Utc>) -> String {
    let id = generate_uuid();
    format!("photo_{}_{}.jpg", now.format("%Y%m%d_%H%M%S"), &id[..8])
}

fn mark(ok: bool) -> colored::ColoredString {
    if ok {
        "ok".green().bold()
    } else {
        "!!".red().bold()
    }
}

/// Print setup status, video devices and module state. Changes nothing on the host.
pub async fn run_diagnostic(options: &AppOptions) {
    let host = HostParts::system();
    let janitor = Arc::new(DeviceJanitor::new(
        host.runner.clone(),
        host.processes.clone(),
        options.janitor_timeout,
    ));
    let registry = DeviceRegistry::new(options.registry.clone(), host.runner.clone(), host.fs.clone());
    let kmod = Arc::new(KernelModuleManager::new(
        options.module.clone(),
        host.runner.clone(),
        host.privileges.clone(),
        janitor,
    ));
    let profiles = ProfileTable::default().with_overrides(&options.profile_overrides);

    let version = version_info();
    println!("{} {} ({})", "boothd".bold(), version.version, version.git_hash);

    println!("\n{}", "Setup".bold().underline());
    let setup = SetupChecker::new(host.runner.clone(), kmod.clone(), options.camera.loopback.clone(), false)
        .check()
        .await;
    println!("  [{}] {}", mark(setup.success), setup.message);

    println!("\n{}", "Kernel module".bold().underline());
    let loaded = kmod.is_loaded().await;
    let state = if loaded { ModuleState::Loaded } else { ModuleState::Unloaded };
    println!("  [{}] {} {:?}", mark(loaded), options.module.module_name, state);
    println!("  privilege: {:?}", host.privileges.privilege().await);

    println!("\n{}", "Video devices".bold().underline());
    let devices = registry.enumerate().await;
    if devices.is_empty() {
        println!("  {}", "none".yellow());
    }
    for device in &devices {
        let capability = registry.classify(device).await;
        let label = match capability {
            Capability::Capture => "capture".green(),
            Capability::Output => "output".cyan(),
            Capability::Unknown => "unknown".yellow(),
        };
        println!("  {} {}", device.path, label);
    }

    println!("\n{}", "Camera".bold().underline());
    match registry.discover(&profiles).await {
        Some(discovery) => println!(
            "  [{}] {} ({}) at {}",
            mark(true),
            discovery.identity.model,
            discovery.identity.family,
            discovery.device.path
        ),
        None => println!("  [{}] no camera found", mark(false)),
    }
}
