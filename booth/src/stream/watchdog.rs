//! Device failure patterns in encoder diagnostics.
//!
//! Matched case-sensitively against raw stderr lines. A match means the
//! device vanished or is unusable and the preview process must go.

use std::fmt;

/// Why the watchdog fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogReason {
    DeviceGone,
    DeviceBusy,
    IoFailure,
}

impl fmt::Display for WatchdogReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            WatchdogReason::DeviceGone => "device disappeared",
            WatchdogReason::DeviceBusy => "device busy",
            WatchdogReason::IoFailure => "device I/O failure",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogRule {
    pub pattern: &'static str,
    pub reason: WatchdogReason,
}

pub const WATCHDOG_RULES: &[WatchdogRule] = &[
    WatchdogRule {
        pattern: "No such device",
        reason: WatchdogReason::DeviceGone,
    },
    WatchdogRule {
        pattern: "No such file or directory",
        reason: WatchdogReason::DeviceGone,
    },
    WatchdogRule {
        pattern: "Inappropriate ioctl for device",
        reason: WatchdogReason::DeviceGone,
    },
    WatchdogRule {
        pattern: "Device or resource busy",
        reason: WatchdogReason::DeviceBusy,
    },
    WatchdogRule {
        pattern: "Input/output error",
        reason: WatchdogReason::IoFailure,
    },
    WatchdogRule {
        pattern: "VIDIOC_DQBUF",
        reason: WatchdogReason::IoFailure,
    },
];

/// First rule matching `line`
pub fn scan(line: &str) -> Option<&'static WatchdogRule> {
    WATCHDOG_RULES.iter().find(|rule| line.contains(rule.pattern))
}
