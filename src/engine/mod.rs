// src/engine/mod.rs

//! The job runner.
//!
//! One [`Runner`] owns the channel tree and drives it from store
//! notifications:
//! - process buffered notifications (re-read the job, notify the channels),
//! - admit jobs and dispatch them,
//! - sleep until the next notification, wakeup time or stop request.
//!
//! Any error tears the connections down and starts over from the store
//! state after a short delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

pub mod runner;

pub use runner::Runner;

/// Default poll interval when no wakeup time is pending.
pub const SELECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default pause before re-initializing after an error.
pub const ERROR_RECOVERY_DELAY: Duration = Duration::from_secs(5);

/// Runner tuning.
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// Longest sleep between two iterations without notification.
    pub select_timeout: Duration,
    pub error_recovery_delay: Duration,
    /// Stop once no store holds runnable work (used for `--once`).
    pub exit_when_idle: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            select_timeout: SELECT_TIMEOUT,
            error_recovery_delay: ERROR_RECOVERY_DELAY,
            exit_when_idle: false,
        }
    }
}

/// Cloneable control handle of a running [`Runner`].
#[derive(Debug, Clone, Default)]
pub struct RunnerHandle {
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl RunnerHandle {
    /// Ask the runner to stop. Admitted jobs are not waited for.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Interrupt the current wait without stopping.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn notified(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }
}
