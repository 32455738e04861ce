//! System-wide constants shared by every rover crate.

use std::time::Duration;

// ─── Identity ───────────────────────────────────────────────────────

/// Service name used when `[shared] service_name` is absent.
pub const DEFAULT_SERVICE_NAME: &str = "rover";

// ─── Network bus endpoints ──────────────────────────────────────────

/// Broker port that re-emits frames to subscribers (one-to-many).
pub const DEFAULT_BROADCASTER_PORT: u16 = 6000;

/// Broker port that collects pushed frames from publishers (many-to-one).
pub const DEFAULT_COLLECTOR_PORT: u16 = 6001;

/// Host clients connect to.
pub const DEFAULT_BROKER_HOST: &str = "127.0.0.1";

/// Interface the broker binds.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Frames queued per subscriber before the broker starts dropping.
pub const DEFAULT_SEND_QUEUE: usize = 1000;

/// Receive poll timeout; the stop signal is re-checked at this cadence.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// How long a client keeps retrying its initial broker connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Upper bound for a single encoded frame section (64 MiB).
pub const MAX_FRAME_SECTION_LEN: usize = 64 * 1024 * 1024;

// ─── Lifecycle ──────────────────────────────────────────────────────

/// Time the supervisor waits for run loops to observe the stop signal.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 1000;

/// Default grace period as Duration.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(DEFAULT_GRACE_PERIOD_MS);

/// How long the supervisor waits for a process-mode child to report
/// that its role started.
pub const DEFAULT_START_TIMEOUT_MS: u64 = 10_000;

/// Polling step used while waiting for threads or processes to exit.
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
