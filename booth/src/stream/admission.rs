//! Preview viewer admission control

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::errors::BoothError;

/// Admission limits
#[derive(Debug, Clone)]
pub struct AdmissionOptions {
    /// Hard ceiling on simultaneous viewers
    pub max_viewers: usize,

    /// Window for counting connection attempts
    pub burst_window: Duration,

    /// Admitted connections allowed inside one window
    pub burst_limit: usize,
}

impl Default for AdmissionOptions {
    fn default() -> Self {
        Self {
            max_viewers: 10,
            burst_window: Duration::from_secs(2),
            burst_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub active: usize,
    pub recent: usize,
}

#[derive(Default)]
struct AdmissionState {
    active: usize,
    recent: VecDeque<Instant>,
}

/// Distinguishes "too many viewers" ([`BoothError::Busy`]) from
/// "too many connections too fast" ([`BoothError::RateLimited`])
pub struct ViewerAdmission {
    options: AdmissionOptions,
    state: Mutex<AdmissionState>,
}

impl ViewerAdmission {
    pub fn new(options: AdmissionOptions) -> Self {
        Self {
            options,
            state: Mutex::new(AdmissionState::default()),
        }
    }

    /// Admit one viewer. The slot is released when the permit drops.
    pub fn admit(self: &Arc<Self>) -> Result<ViewerPermit, BoothError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        while let Some(front) = state.recent.front() {
            if now.duration_since(*front) >= self.options.burst_window {
                state.recent.pop_front();
            } else {
                break;
            }
        }

        if state.active >= self.options.max_viewers {
            return Err(BoothError::Busy(format!(
                "preview viewer limit of {} reached",
                self.options.max_viewers
            )));
        }

        if state.recent.len() >= self.options.burst_limit {
            return Err(BoothError::RateLimited(format!(
                "more than {} preview connections within {:?}",
                self.options.burst_limit, self.options.burst_window
            )));
        }

        state.recent.push_back(now);
        state.active += 1;

        Ok(ViewerPermit {
            admission: Arc::clone(self),
        })
    }

    pub fn stats(&self) -> AdmissionStats {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        AdmissionStats {
            active: state.active,
            recent: state.recent.len(),
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.active = state.active.saturating_sub(1);
    }
}

/// An admitted viewer slot
pub struct ViewerPermit {
    admission: Arc<ViewerAdmission>,
}

impl Drop for ViewerPermit {
    fn drop(&mut self) {
        self.admission.release();
    }
}
