//! Process table access and subprocess spawning

use std::process::Stdio;
use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::errors::BoothError;

/// A row of the OS process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cmdline: String,
}

impl ProcessInfo {
    /// Substring match against the process name or its full command line
    pub fn matches(&self, pattern: &str) -> bool {
        self.name.contains(pattern) || self.cmdline.contains(pattern)
    }
}

/// Lists and signals OS processes
pub trait ProcessControl: Send + Sync {
    /// Snapshot of running processes
    fn list(&self) -> Vec<ProcessInfo>;

    /// Send SIGTERM (`force == false`) or SIGKILL. Returns whether a signal was delivered.
    fn terminate(&self, pid: u32, force: bool) -> bool;
}

/// [`ProcessControl`] backed by sysinfo
pub struct SysinfoProcessControl {
    system: Mutex<System>,
}

impl SysinfoProcessControl {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always)
    }
}

impl Default for SysinfoProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for SysinfoProcessControl {
    fn list(&self) -> Vec<ProcessInfo> {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, Self::refresh_kind());

        system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                cmdline: process
                    .cmd()
                    .iter()
                    .map(|part| part.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" "),
            })
            .collect()
    }

    fn terminate(&self, pid: u32, force: bool) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );

        let Some(process) = system.process(pid) else {
            return false;
        };

        let signal = if force { Signal::Kill } else { Signal::Term };
        match process.kill_with(signal) {
            Some(delivered) => delivered,
            // Signal unsupported on this platform
            None => force && process.kill(),
        }
    }
}

/// Signal every process whose name or command line contains one of `patterns`.
///
/// The current process is never signalled. Returns the PIDs that were signalled.
pub fn kill_matching(control: &dyn ProcessControl, patterns: &[&str], force: bool) -> Vec<u32> {
    let own_pid = std::process::id();
    let mut killed = Vec::new();

    for process in control.list() {
        if process.pid == own_pid {
            continue;
        }
        if !patterns.iter().any(|pattern| process.matches(pattern)) {
            continue;
        }

        debug!("Signalling {} ({}): {}", process.pid, process.name, process.cmdline);
        if control.terminate(process.pid, force) {
            killed.push(process.pid);
        } else {
            warn!("Failed to signal process {} ({})", process.pid, process.name);
        }
    }

    killed
}

/// Starts long-lived subprocesses with piped output
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, program: &str, args: &[String]) -> Result<Child, BoothError>;
}

/// [`ProcessSpawner`] backed by `tokio::process`.
///
/// Children are killed when their handle is dropped.
#[derive(Debug, Clone, Default)]
pub struct SystemSpawner;

impl ProcessSpawner for SystemSpawner {
    fn spawn(&self, program: &str, args: &[String]) -> Result<Child, BoothError> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BoothError::CommandError(format!("Failed to spawn {}: {}", program, e)))
    }
}
