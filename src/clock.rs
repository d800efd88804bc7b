//! Show-wide pausable clock.
//!
//! Every timed wait in the show (text-only display, inter-line pause, the
//! audio-completion poll) measures *active* time: time spent paused does not
//! count, and a wait interrupted by a pause picks up where it left off.

use crate::error::{Result, ShowError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct ClockState {
    origin: Instant,
    total_paused: Duration,
    pause_start: Option<Instant>,
}

impl ClockState {
    fn paused_for(&self) -> Duration {
        match self.pause_start {
            Some(ps) => self.total_paused + ps.elapsed(),
            None => self.total_paused,
        }
    }
}

/// Cloneable handle; clones share the same pause flag and elapsed time.
#[derive(Clone)]
pub struct PauseClock {
    state: Arc<Mutex<ClockState>>,
    paused: Arc<watch::Sender<bool>>,
}

impl PauseClock {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        PauseClock {
            state: Arc::new(Mutex::new(ClockState {
                origin: Instant::now(),
                total_paused: Duration::ZERO,
                pause_start: None,
            })),
            paused: Arc::new(tx),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Time since the clock was created, minus time spent paused.
    pub fn active_elapsed(&self) -> Duration {
        let s = self.lock();
        s.origin.elapsed().saturating_sub(s.paused_for())
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Set the pause flag. Returns false if it already had that value.
    pub fn set_paused(&self, paused: bool) -> bool {
        let mut s = self.lock();
        match (paused, s.pause_start) {
            (true, None) => s.pause_start = Some(Instant::now()),
            (false, Some(ps)) => {
                s.total_paused += ps.elapsed();
                s.pause_start = None;
            }
            _ => return false,
        }
        drop(s);
        self.paused.send_replace(paused);
        true
    }

    /// Receiver that wakes on every pause flag change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    /// Suspend until the clock is running. A cancelled token wins even when
    /// the clock is not paused.
    pub async fn wait_unpaused(&self, cancel: &CancellationToken) -> Result<()> {
        let mut rx = self.subscribe();
        loop {
            if cancel.is_cancelled() {
                return Err(ShowError::Cancelled);
            }
            if !*rx.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ShowError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Wait for `duration` of active time.
    pub async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<()> {
        let target = self.active_elapsed() + duration;
        let mut rx = self.subscribe();
        loop {
            if cancel.is_cancelled() {
                return Err(ShowError::Cancelled);
            }
            let paused = *rx.borrow_and_update();
            if !paused {
                let now = self.active_elapsed();
                if now >= target {
                    return Ok(());
                }
                let remaining = target - now;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ShowError::Cancelled),
                    _ = rx.changed() => {}
                    _ = tokio::time::sleep(remaining) => {}
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ShowError::Cancelled),
                    _ = rx.changed() => {}
                }
            }
        }
    }
}

impl Default for PauseClock {
    fn default() -> Self {
        Self::new()
    }
}
