//! Single-flight and cooldown for photo capture

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::errors::BoothError;

#[derive(Default)]
struct GuardState {
    in_flight: bool,
    last_completed: Option<Instant>,
}

/// At most one capture at a time, and none within `cooldown` of the last one.
///
/// Rejections are immediate; nothing queues.
pub struct CaptureGuard {
    cooldown: Duration,
    state: Mutex<GuardState>,
}

impl CaptureGuard {
    pub fn new(cooldown: Duration) -> Arc<Self> {
        Arc::new(Self {
            cooldown,
            state: Mutex::new(GuardState::default()),
        })
    }

    /// Claim the capture slot
    pub fn try_begin(self: &Arc<Self>) -> Result<CaptureTicket, BoothError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.in_flight {
            return Err(BoothError::Busy("a capture is already in progress".to_string()));
        }

        if let Some(last) = state.last_completed {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                let wait = self.cooldown - elapsed;
                return Err(BoothError::RateLimited(format!(
                    "capture cooldown, retry in {} ms",
                    wait.as_millis()
                )));
            }
        }

        state.in_flight = true;
        Ok(CaptureTicket {
            guard: Arc::clone(self),
        })
    }

    pub fn in_flight(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).in_flight
    }

    fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.in_flight = false;
        state.last_completed = Some(Instant::now());
    }
}

/// Held for the duration of one capture; completion is recorded on drop
pub struct CaptureTicket {
    guard: Arc<CaptureGuard>,
}

impl Drop for CaptureTicket {
    fn drop(&mut self) {
        self.guard.finish();
    }
}
