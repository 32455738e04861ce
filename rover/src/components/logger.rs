//! Message logger.

use crate::component::{Component, ComponentError, Ports};
use crate::registry::ComponentArgs;
use rover_bus::Payload;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// `logger.MessageLogger` arguments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerArgs {
    /// Prefix of every log line; the instance name when unset.
    #[serde(default)]
    pub label: Option<String>,
}

impl ComponentArgs for LoggerArgs {}

/// Logs every message from its subscription channels at INFO level.
#[derive(Debug)]
pub struct MessageLogger {
    ports: Ports,
    label: String,
    received: AtomicU64,
}

impl MessageLogger {
    /// Build from arguments.
    pub fn new(args: LoggerArgs, ports: Ports) -> Result<Self, ComponentError> {
        let label = args.label.unwrap_or_else(|| ports.name().to_string());
        Ok(Self {
            ports,
            label,
            received: AtomicU64::new(0),
        })
    }

    /// Messages logged so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl Component for MessageLogger {
    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn start(&self) -> Result<bool, ComponentError> {
        Ok(false)
    }

    fn on_message(&self, channel: &str, payload: &Payload) -> Result<(), ComponentError> {
        self.received.fetch_add(1, Ordering::Relaxed);
        info!("{} [{}] {}", self.label, channel, payload);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), ComponentError> {
        info!("{} - logged {} message(s)", self.label, self.received());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_messages_and_defaults_label() {
        let logger = MessageLogger::new(LoggerArgs::default(), Ports::detached("Log")).unwrap();
        assert_eq!(logger.label, "Log");
        logger.on_message("x", &Payload::from(1)).unwrap();
        logger.on_message("y", &Payload::from("two")).unwrap();
        assert_eq!(logger.received(), 2);
    }
}
