//! Restart rate limiting

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::errors::BoothError;

#[derive(Default)]
struct RestartState {
    in_progress: bool,
    history: VecDeque<Instant>,
}

/// One restart at a time, at most `limit` per `window`
pub struct RestartGuard {
    limit: usize,
    window: Duration,
    state: Mutex<RestartState>,
}

impl RestartGuard {
    pub fn new(limit: usize, window: Duration) -> Arc<Self> {
        Arc::new(Self {
            limit,
            window,
            state: Mutex::new(RestartState::default()),
        })
    }

    pub fn try_begin(self: &Arc<Self>) -> Result<RestartTicket, BoothError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.in_progress {
            return Err(BoothError::Busy("a camera restart is already in progress".to_string()));
        }

        let now = Instant::now();
        while let Some(front) = state.history.front() {
            if now.duration_since(*front) >= self.window {
                state.history.pop_front();
            } else {
                break;
            }
        }

        if state.history.len() >= self.limit {
            return Err(BoothError::RateLimited(format!(
                "at most {} camera restarts per {} s",
                self.limit,
                self.window.as_secs()
            )));
        }

        state.history.push_back(now);
        state.in_progress = true;
        Ok(RestartTicket {
            guard: Arc::clone(self),
        })
    }

    pub fn in_progress(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).in_progress
    }
}

pub struct RestartTicket {
    guard: Arc<RestartGuard>,
}

impl Drop for RestartTicket {
    fn drop(&mut self) {
        let mut state = self.guard.state.lock().unwrap_or_else(|e| e.into_inner());
        state.in_progress = false;
    }
}
