//! Numeric signal conditioning.
//!
//! Two classes share this module, so configuration must name the class:
//!
//! ```toml
//! [components.signal.MapRange]
//! in_min = -1.0
//! in_max = 1.0
//! out_min = 290.0
//! out_max = 490.0
//! subscription = "steering"
//! publication = "steering_pwm"
//! ```

use crate::component::{Component, ComponentError, Ports};
use crate::registry::ComponentArgs;
use rover_bus::Payload;
use serde::Deserialize;
use std::sync::atomic::{AtomicU8, Ordering};

fn numeric(channel: &str, payload: &Payload) -> Result<f64, ComponentError> {
    payload
        .as_f64()
        .ok_or_else(|| ComponentError::UnexpectedPayload {
            channel: channel.to_string(),
            payload: payload.to_string(),
        })
}

// ─── MapRange ───────────────────────────────────────────────────────

/// `signal.MapRange` arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapRangeArgs {
    /// Lower bound of the input range.
    pub in_min: f64,
    /// Upper bound of the input range.
    pub in_max: f64,
    /// Output value for `in_min`.
    pub out_min: f64,
    /// Output value for `in_max`.
    pub out_max: f64,
    /// Clamp outputs to the output range.
    #[serde(default)]
    pub clamp: bool,
}

impl ComponentArgs for MapRangeArgs {
    fn validate(&self) -> Result<(), String> {
        let bounds = [self.in_min, self.in_max, self.out_min, self.out_max];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err("range bounds must be finite".to_string());
        }
        if self.in_min == self.in_max {
            return Err(format!("input range is empty ({} .. {})", self.in_min, self.in_max));
        }
        if self.out_min == self.out_max {
            return Err(format!("output range is empty ({} .. {})", self.out_min, self.out_max));
        }
        Ok(())
    }
}

/// Maps each numeric input linearly from `[in_min, in_max]` to
/// `[out_min, out_max]` and publishes the result.
#[derive(Debug)]
pub struct MapRange {
    ports: Ports,
    args: MapRangeArgs,
}

impl MapRange {
    /// Build from validated arguments.
    pub fn new(args: MapRangeArgs, ports: Ports) -> Result<Self, ComponentError> {
        args.validate().map_err(ComponentError::InvalidArgs)?;
        Ok(Self { ports, args })
    }

    /// Map one value.
    pub fn map(&self, x: f64) -> f64 {
        let a = &self.args;
        let y = a.out_min + (x - a.in_min) * (a.out_max - a.out_min) / (a.in_max - a.in_min);
        if a.clamp {
            y.clamp(a.out_min.min(a.out_max), a.out_min.max(a.out_max))
        } else {
            y
        }
    }
}

impl Component for MapRange {
    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn start(&self) -> Result<bool, ComponentError> {
        Ok(false)
    }

    fn on_message(&self, channel: &str, payload: &Payload) -> Result<(), ComponentError> {
        let y = self.map(numeric(channel, payload)?);
        self.publish_message(vec![Payload::Float(y)])?;
        Ok(())
    }

    fn shutdown(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}

// ─── Threshold ──────────────────────────────────────────────────────

/// `signal.Threshold` arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdArgs {
    /// Inputs at or above this level are "on".
    pub level: f64,
    /// Swap on and off.
    #[serde(default)]
    pub invert: bool,
    /// Publish only when the state changes.
    #[serde(default)]
    pub on_change: bool,
}

impl ComponentArgs for ThresholdArgs {
    fn validate(&self) -> Result<(), String> {
        if !self.level.is_finite() {
            return Err("level must be finite".to_string());
        }
        Ok(())
    }
}

const STATE_UNKNOWN: u8 = 2;

/// Publishes `true`/`false` depending on whether inputs reach `level`.
#[derive(Debug)]
pub struct Threshold {
    ports: Ports,
    args: ThresholdArgs,
    last: AtomicU8,
}

impl Threshold {
    /// Build from validated arguments.
    pub fn new(args: ThresholdArgs, ports: Ports) -> Result<Self, ComponentError> {
        args.validate().map_err(ComponentError::InvalidArgs)?;
        Ok(Self {
            ports,
            args,
            last: AtomicU8::new(STATE_UNKNOWN),
        })
    }

    /// Classify one value.
    pub fn is_on(&self, x: f64) -> bool {
        (x >= self.args.level) != self.args.invert
    }
}

impl Component for Threshold {
    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn start(&self) -> Result<bool, ComponentError> {
        Ok(false)
    }

    fn on_message(&self, channel: &str, payload: &Payload) -> Result<(), ComponentError> {
        let on = self.is_on(numeric(channel, payload)?);
        let previous = self.last.swap(u8::from(on), Ordering::Relaxed);
        if self.args.on_change && previous == u8::from(on) {
            return Ok(());
        }
        self.publish_message(vec![Payload::Bool(on)])?;
        Ok(())
    }

    fn shutdown(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}
