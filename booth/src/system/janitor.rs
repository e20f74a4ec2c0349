//! Releasing device nodes held open by stray processes

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::system::command::{args, CommandRunner};
use crate::system::process::{kill_matching, ProcessControl};

/// Process-name patterns of the tools that open camera devices
pub const CAMERA_TOOL_PATTERNS: &[&str] = &["gphoto2", "ffmpeg", "gst-launch", "v4l2-ctl"];

/// Frees busy device nodes so they can be reopened or the module unloaded
pub struct DeviceJanitor {
    runner: Arc<dyn CommandRunner>,
    processes: Arc<dyn ProcessControl>,
    timeout: Duration,
}

impl DeviceJanitor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        processes: Arc<dyn ProcessControl>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            processes,
            timeout,
        }
    }

    /// PIDs holding `device_path` open, as reported by `fuser`
    pub async fn holders(&self, device_path: &str) -> Vec<u32> {
        if !self.runner.exists("fuser") {
            return Vec::new();
        }

        match self
            .runner
            .run("fuser", &args([device_path]), self.timeout)
            .await
        {
            // fuser exits 1 when nothing holds the file
            Ok(output) => parse_fuser_pids(&output.stdout),
            Err(e) => {
                debug!("fuser failed for {}: {}", device_path, e);
                Vec::new()
            }
        }
    }

    /// Kill every process holding `device_path`. Returns the PIDs killed.
    pub async fn release(&self, device_path: &str) -> Vec<u32> {
        let own_pid = std::process::id();
        let mut killed = Vec::new();

        for pid in self.holders(device_path).await {
            if pid == own_pid {
                continue;
            }
            if self.processes.terminate(pid, true) {
                killed.push(pid);
            }
        }

        if !killed.is_empty() {
            info!("Released {} from processes {:?}", device_path, killed);
        }
        killed
    }

    /// Release each of `device_paths`
    pub async fn release_all(&self, device_paths: &[String]) -> usize {
        let mut total = 0;
        for path in device_paths {
            total += self.release(path).await.len();
        }
        total
    }

    /// Kill leftover processes reading from `device_path`.
    ///
    /// Only readers (`-i <device>`) are targeted; a loopback producer
    /// writing to the node is left alone.
    pub fn release_readers(&self, device_path: &str) -> Vec<u32> {
        let own_pid = std::process::id();
        let mut killed = Vec::new();

        for process in self.processes.list() {
            if process.pid == own_pid || !reads_from(&process.cmdline, device_path) {
                continue;
            }
            if self.processes.terminate(process.pid, true) {
                killed.push(process.pid);
            }
        }

        if !killed.is_empty() {
            info!("Killed stray readers of {}: {:?}", device_path, killed);
        }
        killed
    }

    /// Kill known camera tools by name
    pub fn kill_tools(&self, patterns: &[&str]) -> Vec<u32> {
        let killed = kill_matching(self.processes.as_ref(), patterns, true);
        if !killed.is_empty() {
            warn!("Killed camera tool processes: {:?}", killed);
        }
        killed
    }
}

fn reads_from(cmdline: &str, device_path: &str) -> bool {
    let tokens: Vec<&str> = cmdline.split_whitespace().collect();
    tokens
        .windows(2)
        .any(|pair| pair[0] == "-i" && pair[1] == device_path)
}

/// `fuser` prints bare PIDs (optionally suffixed with access letters) on stdout
fn parse_fuser_pids(stdout: &str) -> Vec<u32> {
    stdout
        .split_whitespace()
        .filter_map(|token| {
            let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .collect()
}
