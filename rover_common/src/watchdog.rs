//! # Watchdog Trait
//!
//! Defines the supervisor contract for process-mode lifecycle management.
//! The `rover` supervisor implements this trait to spawn the broker and
//! one process per component, check their health and tear them down.
//!
//! # Design
//!
//! The trait captures the three operations process mode needs, without
//! mandating a specific process management strategy.

use std::process::Command;
use std::time::Duration;

/// Health status returned by [`Watchdog::health_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Process is still alive.
    Running,
    /// Process has exited.
    Exited {
        /// Exit code if available (None when killed by a signal).
        exit_code: Option<i32>,
    },
    /// Module was never started or is not being tracked.
    Unknown,
}

impl HealthStatus {
    /// Whether the process is still alive.
    pub fn is_running(&self) -> bool {
        matches!(self, HealthStatus::Running)
    }
}

/// Error type for watchdog operations.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    /// Failed to spawn the requested module.
    #[error("failed to spawn {module}: {reason}")]
    SpawnFailed {
        /// Name of the module that could not be spawned.
        module: String,
        /// OS-level reason.
        reason: String,
    },

    /// A module with the same name is already tracked.
    #[error("{module} is already tracked")]
    AlreadyTracked {
        /// Name of the duplicate module.
        module: String,
    },

    /// Generic I/O or system error.
    #[error("watchdog error: {0}")]
    Other(String),
}

/// Supervisor contract for process lifecycle management.
///
/// # Example
///
/// ```rust,ignore
/// struct ProcessWatchdog { /* ... */ }
///
/// impl Watchdog for ProcessWatchdog {
///     fn spawn_module(&mut self, module: &str, command: Command)
///         -> Result<u32, WatchdogError> { /* ... */ }
///     fn health_check(&mut self, module: &str) -> HealthStatus { /* ... */ }
///     fn shutdown_all(&mut self, grace: Duration) -> Result<(), WatchdogError> { /* ... */ }
/// }
/// ```
pub trait Watchdog {
    /// Spawn a child module process.
    ///
    /// Returns the OS PID of the spawned process on success.
    fn spawn_module(&mut self, module: &str, command: Command) -> Result<u32, WatchdogError>;

    /// Query the health of a managed module.
    ///
    /// Takes `&mut self` because reaping an exited child mutates the
    /// tracked handle.
    fn health_check(&mut self, module: &str) -> HealthStatus;

    /// Shut down all managed modules in reverse-startup order.
    ///
    /// Expected sequence:
    /// 1. Send SIGTERM to each child still alive.
    /// 2. Wait up to `grace` for graceful exit.
    /// 3. Escalate to SIGKILL for unresponsive processes.
    fn shutdown_all(&mut self, grace: Duration) -> Result<(), WatchdogError>;
}
