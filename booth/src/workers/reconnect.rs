//! Reconnection worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::camera::service::{CameraService, PollTransition};
use crate::devices::registry::DeviceEvent;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Reconnect worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Initial delay before the first poll
    pub initial_delay: Duration,

    /// Extra delay after consecutive preview repairs
    pub repair_backoff: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            repair_backoff: CooldownOptions {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(120),
                multiplier: 2.0,
            },
        }
    }
}

/// Poll the camera until shutdown.
///
/// The wait between polls follows the bound camera's profile. A device
/// event cuts the wait short. A preview that keeps dying is restarted with
/// growing delays.
pub async fn run<S, F>(
    options: &Options,
    service: &CameraService,
    mut events: Option<UnboundedReceiver<DeviceEvent>>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Reconnect worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Reconnect worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    let mut repairs: u32 = 0;

    loop {
        let mut wait = service.poll_interval();
        if repairs > 0 {
            wait = wait.max(calc_exp_backoff(&options.repair_backoff, repairs - 1));
        }

        let mut channel_closed = false;
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Reconnect worker shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
            event = next_event(&mut events) => {
                match event {
                    Some(event) => debug!("Poll woken early: {:?}", event),
                    None => channel_closed = true,
                }
            }
        }
        if channel_closed {
            debug!("Device event channel closed");
            events = None;
        }

        match service.poll_once().await {
            PollTransition::Repaired => {
                repairs = repairs.saturating_add(1);
                if repairs > 1 {
                    warn!("Preview repaired {} times in a row", repairs);
                }
            }
            transition => {
                if transition != PollTransition::Unchanged {
                    debug!("Camera transition: {:?}", transition);
                }
                repairs = 0;
            }
        }
    }
}

/// Next device event, or never when there is no channel
async fn next_event(events: &mut Option<UnboundedReceiver<DeviceEvent>>) -> Option<DeviceEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
