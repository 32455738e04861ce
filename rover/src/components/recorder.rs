//! JSON-lines message recorder.
//!
//! Each recorded message becomes one line:
//!
//! ```json
//! {"channel":"tick","payload":3,"timestamp_us":1718000000000000}
//! ```
//!
//! The first subscription channel carries the data to record. A second
//! subscription channel, when declared, is the record switch: a boolean
//! payload turns recording on or off.

use crate::component::{Component, ComponentError, Ports};
use crate::registry::ComponentArgs;
use parking_lot::Mutex;
use rover_bus::Payload;
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

fn enabled() -> bool {
    true
}

/// `recorder.Recorder` arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecorderArgs {
    /// Output file.
    pub path: PathBuf,
    /// Append to an existing file instead of truncating it.
    #[serde(default)]
    pub append: bool,
    /// Record from the start, before any switch message.
    #[serde(default = "enabled")]
    pub auto_start: bool,
}

impl ComponentArgs for RecorderArgs {
    fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("path cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Appends received messages to a file.
#[derive(Debug)]
pub struct Recorder {
    ports: Ports,
    path: PathBuf,
    append: bool,
    recording: AtomicBool,
    writer: Mutex<Option<BufWriter<File>>>,
    recorded: AtomicU64,
}

impl Recorder {
    /// Build from validated arguments. The file is opened by `start`.
    pub fn new(args: RecorderArgs, ports: Ports) -> Result<Self, ComponentError> {
        args.validate().map_err(ComponentError::InvalidArgs)?;
        Ok(Self {
            ports,
            path: args.path,
            append: args.append,
            recording: AtomicBool::new(args.auto_start),
            writer: Mutex::new(None),
            recorded: AtomicU64::new(0),
        })
    }

    /// Lines written so far.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    fn is_switch(&self, channel: &str) -> bool {
        self.ports.subscription().get(1).is_some_and(|c| c == channel)
    }

    fn write_line(&self, channel: &str, payload: &Payload) -> Result<(), ComponentError> {
        let mut guard = self.writer.lock();
        // Not started yet, or already shut down.
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };
        let timestamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or_default();
        let line = serde_json::json!({
            "channel": channel,
            "payload": payload.to_json(),
            "timestamp_us": timestamp_us as u64,
        });
        serde_json::to_writer(&mut *writer, &line).map_err(std::io::Error::from)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        self.recorded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Component for Recorder {
    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn start(&self) -> Result<bool, ComponentError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append)
            .truncate(!self.append)
            .open(&self.path)
            .map_err(|e| {
                ComponentError::Device(format!("cannot open {}: {e}", self.path.display()))
            })?;
        *self.writer.lock() = Some(BufWriter::new(file));
        info!("{} - recording to {}", self.name(), self.path.display());
        Ok(false)
    }

    fn on_message(&self, channel: &str, payload: &Payload) -> Result<(), ComponentError> {
        if self.is_switch(channel) {
            let on = payload
                .as_bool()
                .ok_or_else(|| ComponentError::UnexpectedPayload {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                })?;
            if self.recording.swap(on, Ordering::Relaxed) != on {
                info!("{} - recording {}", self.name(), if on { "on" } else { "off" });
            }
            return Ok(());
        }
        if !self.recording.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.write_line(channel, payload)
    }

    fn shutdown(&self) -> Result<(), ComponentError> {
        let Some(mut writer) = self.writer.lock().take() else {
            return Ok(());
        };
        if let Err(e) = writer.flush() {
            warn!("{} - final flush failed: {}", self.name(), e);
            return Err(e.into());
        }
        info!(
            "{} - {} message(s) saved to {}",
            self.name(),
            self.recorded(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn recorder(path: PathBuf, subscription: &[&str]) -> Recorder {
        let ports = Ports::new(
            "Recorder",
            subscription.iter().map(|s| s.to_string()).collect(),
            Vec::new(),
        );
        Recorder::new(
            RecorderArgs {
                path,
                append: false,
                auto_start: true,
            },
            ports,
        )
        .unwrap()
    }

    fn lines(path: &std::path::Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn records_one_line_per_message() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let rec = recorder(path.clone(), &["tick"]);

        assert!(!rec.start().unwrap());
        rec.on_message("tick", &Payload::from(1)).unwrap();
        rec.on_message("tick", &Payload::from("two")).unwrap();
        rec.shutdown().unwrap();

        let lines = lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["channel"], "tick");
        assert_eq!(lines[0]["payload"], 1);
        assert_eq!(lines[1]["payload"], "two");
        assert!(lines[1]["timestamp_us"].as_u64().unwrap() > 0);
    }

    #[test]
    fn switch_channel_toggles_recording() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let rec = recorder(path.clone(), &["data", "record"]);
        rec.start().unwrap();

        rec.on_message("record", &Payload::from(false)).unwrap();
        rec.on_message("data", &Payload::from(1)).unwrap();
        rec.on_message("record", &Payload::from(true)).unwrap();
        rec.on_message("data", &Payload::from(2)).unwrap();
        assert!(rec.on_message("record", &Payload::from(3)).is_err());
        rec.shutdown().unwrap();

        let lines = lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["payload"], 2);
    }

    #[test]
    fn shutdown_is_idempotent_and_stops_recording() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let rec = recorder(path.clone(), &["tick"]);
        rec.start().unwrap();
        rec.shutdown().unwrap();
        rec.shutdown().unwrap();
        rec.on_message("tick", &Payload::from(1)).unwrap();
        assert_eq!(rec.recorded(), 0);
    }

    #[test]
    fn unwritable_path_fails_start() {
        let dir = tempdir().unwrap();
        let rec = recorder(dir.path().join("missing/out.jsonl"), &["tick"]);
        assert!(matches!(rec.start(), Err(ComponentError::Device(_))));
    }
}
