//! Prelude module for common re-exports.
//!
//! ```rust
//! use rover_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── Lifecycle ──────────────────────────────────────────────────────
pub use crate::consts::DEFAULT_GRACE_PERIOD;
pub use crate::stop::{StopError, StopSignal};
pub use crate::watchdog::{HealthStatus, Watchdog, WatchdogError};
