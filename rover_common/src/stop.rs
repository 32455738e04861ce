//! # Stop Signal
//!
//! The single cooperative cancellation primitive shared by a supervising
//! process and everything it spawns.
//!
//! One handle type, two backings:
//!
//! - [`StopSignal::new`]: in-memory flag, shared by threads of one process.
//! - [`StopSignal::with_os_signals`]: the same flag additionally raised by
//!   SIGINT/SIGTERM, used as the process-safe equivalent inside process-mode
//!   children and by the launcher.
//!
//! The flag is write-once: [`StopSignal::trigger`] sets it, nothing clears it.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while wiring the stop signal to the OS.
#[derive(Debug, Error)]
pub enum StopError {
    /// The process-wide signal handler could not be installed.
    #[error("failed to install OS signal handler: {0}")]
    Handler(#[from] ctrlc::Error),
}

#[derive(Debug, Default)]
struct Inner {
    set: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

/// Cooperative, write-once cancellation flag.
///
/// Cloning yields another handle onto the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    /// Create an in-memory stop signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stop signal that is also raised by SIGINT / SIGTERM.
    ///
    /// The OS handler is process-wide and can only be installed once per
    /// process.
    ///
    /// # Errors
    /// Returns [`StopError::Handler`] if a handler is already installed.
    pub fn with_os_signals() -> Result<Self, StopError> {
        let signal = Self::new();
        let handle = signal.clone();
        ctrlc::set_handler(move || {
            if handle.trigger() {
                info!("Received shutdown signal");
            }
        })?;
        Ok(signal)
    }

    /// Raise the flag.
    ///
    /// Returns `true` only for the call that actually set it; later calls
    /// have no effect.
    pub fn trigger(&self) -> bool {
        let _guard = self.inner.lock.lock();
        let first = !self.inner.set.swap(true, Ordering::SeqCst);
        if first {
            debug!("Stop signal raised");
            self.inner.cv.notify_all();
        }
        first
    }

    /// Whether the flag has been raised.
    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Block until the flag is raised or `timeout` elapses.
    ///
    /// Returns `true` if the flag is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_set() {
            if self.inner.cv.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_set()
    }

    /// Block until the flag is raised.
    pub fn wait(&self) {
        let mut guard = self.inner.lock.lock();
        while !self.is_set() {
            self.inner.cv.wait(&mut guard);
        }
    }
}
