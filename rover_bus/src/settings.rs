//! Network transport settings.

use rover_common::consts::{
    DEFAULT_BIND_HOST, DEFAULT_BROADCASTER_PORT, DEFAULT_BROKER_HOST, DEFAULT_COLLECTOR_PORT,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SEND_QUEUE,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Endpoints and tuning of the broker/client topology.
///
/// # TOML Example
///
/// ```toml
/// broker_host = "127.0.0.1"
/// bind_host = "0.0.0.0"
/// broadcaster_port = 6000
/// collector_port = 6001
/// send_queue = 1000
/// poll_interval_ms = 10
/// connect_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Host clients connect to.
    pub broker_host: String,
    /// Interface the broker binds.
    pub bind_host: String,
    /// Broker port re-emitting frames to subscribers.
    pub broadcaster_port: u16,
    /// Broker port collecting frames from publishers.
    pub collector_port: u16,
    /// Frames queued per subscriber before the broker drops new ones.
    pub send_queue: usize,
    /// Receive poll timeout in milliseconds.
    pub poll_interval_ms: u64,
    /// Initial connection retry budget in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            broker_host: DEFAULT_BROKER_HOST.to_string(),
            bind_host: DEFAULT_BIND_HOST.to_string(),
            broadcaster_port: DEFAULT_BROADCASTER_PORT,
            collector_port: DEFAULT_COLLECTOR_PORT,
            send_queue: DEFAULT_SEND_QUEUE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl NetworkSettings {
    /// Settings for a broker on loopback with OS-assigned ports.
    pub fn loopback_ephemeral() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            bind_host: "127.0.0.1".to_string(),
            broadcaster_port: 0,
            collector_port: 0,
            ..Self::default()
        }
    }

    /// Receive poll timeout.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Initial connection retry budget.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Address clients push frames to.
    pub fn collector_endpoint(&self) -> String {
        format!("{}:{}", self.broker_host, self.collector_port)
    }

    /// Address clients subscribe on.
    pub fn broadcaster_endpoint(&self) -> String {
        format!("{}:{}", self.broker_host, self.broadcaster_port)
    }

    /// Address the broker binds its collector to.
    pub fn collector_bind(&self) -> String {
        format!("{}:{}", self.bind_host, self.collector_port)
    }

    /// Address the broker binds its broadcaster to.
    pub fn broadcaster_bind(&self) -> String {
        format!("{}:{}", self.bind_host, self.broadcaster_port)
    }

    /// Check semantic constraints.
    ///
    /// # Errors
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.broker_host.trim().is_empty() {
            return Err("broker_host cannot be empty".to_string());
        }
        if self.bind_host.trim().is_empty() {
            return Err("bind_host cannot be empty".to_string());
        }
        if self.send_queue == 0 {
            return Err("send_queue must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be at least 1".to_string());
        }
        if self.collector_port != 0 && self.collector_port == self.broadcaster_port {
            return Err(format!(
                "collector_port and broadcaster_port must differ (both {})",
                self.collector_port
            ));
        }
        Ok(())
    }
}
