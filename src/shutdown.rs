//! Cooperative shutdown.
//!
//! A process-wide running flag, observed at loop boundaries and queue-wait
//! timeouts. There is no forced preemption: work already in flight runs to
//! completion or its own internal timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// Shared running flag, initially true.
#[derive(Clone, Debug)]
pub struct ShutdownFlag {
    running: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request shutdown. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Sleep `total` in short slices, returning early (false) when shutdown
    /// is requested. Keeps cooldowns cancellable.
    pub fn sleep_interruptible(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        while Instant::now() < deadline {
            if !self.is_running() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(remaining.min(Duration::from_millis(50)));
        }
        self.is_running()
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Install SIGINT/SIGTERM handling that clears the flag.
pub fn install_signal_handler(flag: &ShutdownFlag) -> Result<()> {
    let flag = flag.clone();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, shutting down safely");
        flag.stop();
    })
    .context("install signal handler")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_running_and_stops() {
        let flag = ShutdownFlag::new();
        assert!(flag.is_running());
        flag.stop();
        assert!(!flag.is_running());
        flag.stop();
        assert!(!flag.is_running());
    }

    #[test]
    fn clones_share_state() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        other.stop();
        assert!(!flag.is_running());
    }

    #[test]
    fn interruptible_sleep_returns_early_when_stopped() {
        let flag = ShutdownFlag::new();
        flag.stop();
        let started = Instant::now();
        assert!(!flag.sleep_interruptible(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
