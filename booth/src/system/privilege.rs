//! Privilege detection for operations that need root

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::system::command::{args, CommandRunner};

/// How the current process can perform privileged operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    /// Running as root
    Root,

    /// `sudo -n` works without a password prompt
    PasswordlessSudo,

    /// No way to elevate without interaction
    Unprivileged,
}

impl Privilege {
    pub fn can_elevate(&self) -> bool {
        !matches!(self, Privilege::Unprivileged)
    }

    /// Wrap a command so it runs with elevated privileges.
    ///
    /// Returns `None` when elevation is not possible.
    pub fn elevate(&self, program: &str, program_args: &[String]) -> Option<(String, Vec<String>)> {
        match self {
            Privilege::Root => Some((program.to_string(), program_args.to_vec())),
            Privilege::PasswordlessSudo => {
                let mut sudo_args = args(["-n", program]);
                sudo_args.extend(program_args.iter().cloned());
                Some(("sudo".to_string(), sudo_args))
            }
            Privilege::Unprivileged => None,
        }
    }
}

/// Reports whether elevation is available without prompting
#[async_trait]
pub trait PrivilegeCheck: Send + Sync {
    async fn privilege(&self) -> Privilege;
}

/// Checks the effective uid, then passwordless sudo
pub struct SystemPrivilegeCheck {
    runner: Arc<dyn CommandRunner>,
    sudo_timeout: Duration,
}

impl SystemPrivilegeCheck {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            sudo_timeout: Duration::from_secs(3),
        }
    }
}

#[async_trait]
impl PrivilegeCheck for SystemPrivilegeCheck {
    async fn privilege(&self) -> Privilege {
        if let Ok(status) = tokio::fs::read_to_string("/proc/self/status").await {
            if effective_uid(&status) == Some(0) {
                return Privilege::Root;
            }
        }

        if !self.runner.exists("sudo") {
            return Privilege::Unprivileged;
        }

        match self
            .runner
            .run("sudo", &args(["-n", "true"]), self.sudo_timeout)
            .await
        {
            Ok(output) if output.success() => Privilege::PasswordlessSudo,
            Ok(_) => Privilege::Unprivileged,
            Err(e) => {
                debug!("sudo check failed: {}", e);
                Privilege::Unprivileged
            }
        }
    }
}

/// Parse the effective uid from `/proc/self/status` contents
fn effective_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find(|line| line.starts_with("Uid:"))
        .and_then(|line| line.split_whitespace().nth(2))
        .and_then(|uid| uid.parse().ok())
}
