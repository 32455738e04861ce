//! Counter publisher.

use crate::component::{Component, ComponentError, Ports};
use crate::registry::ComponentArgs;
use rover_bus::Payload;
use rover_common::stop::StopSignal;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

fn default_interval_ms() -> u64 {
    100
}

/// `ticker.Ticker` arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TickerArgs {
    /// Delay between two ticks.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// First published value.
    #[serde(default)]
    pub start: i64,
    /// Stop after this many ticks.
    #[serde(default)]
    pub limit: Option<u64>,
}

impl ComponentArgs for TickerArgs {
    fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval_ms must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Publishes `start`, `start + 1`, ... on its first publication channel
/// every `interval_ms` until stopped or `limit` ticks were sent.
///
/// Without a publication channel it only counts.
#[derive(Debug)]
pub struct Ticker {
    ports: Ports,
    interval: Duration,
    start: i64,
    limit: Option<u64>,
    ticks: AtomicU64,
}

impl Ticker {
    /// Build from validated arguments.
    pub fn new(args: TickerArgs, ports: Ports) -> Result<Self, ComponentError> {
        args.validate().map_err(ComponentError::InvalidArgs)?;
        Ok(Self {
            ports,
            interval: Duration::from_millis(args.interval_ms),
            start: args.start,
            limit: args.limit,
            ticks: AtomicU64::new(0),
        })
    }

    /// Ticks published so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Component for Ticker {
    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn start(&self) -> Result<bool, ComponentError> {
        info!("{} - ticking every {:?}", self.name(), self.interval);
        Ok(true)
    }

    fn run(&self, stop: &StopSignal) -> Result<(), ComponentError> {
        let publishes = !self.ports.publication().is_empty();
        let mut n: u64 = 0;
        while !stop.is_set() {
            if self.limit.is_some_and(|limit| n >= limit) {
                debug!("{} - tick limit reached", self.name());
                break;
            }
            let value = self.start.saturating_add_unsigned(n);
            if publishes {
                self.publish_message(vec![Payload::Int(value)])?;
            }
            n += 1;
            self.ticks.store(n, Ordering::Relaxed);
            if stop.wait_timeout(self.interval) {
                break;
            }
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<(), ComponentError> {
        info!("{} - stopped after {} tick(s)", self.name(), self.ticks());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_bus::{Bus, DirectBus, ListenerResult};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn ticker(args: TickerArgs) -> (Ticker, Arc<Mutex<Vec<i64>>>) {
        let bus = Arc::new(DirectBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            &["tick".to_string()],
            Arc::new(move |_: &str, p: &Payload| -> ListenerResult {
                sink.lock().extend(p.as_i64());
                Ok(())
            }),
        )
        .unwrap();
        let ports = Ports::new("Ticker", Vec::new(), vec!["tick".to_string()]);
        ports.attach(bus);
        (Ticker::new(args, ports).unwrap(), seen)
    }

    #[test]
    fn publishes_until_limit() {
        let (ticker, seen) = ticker(TickerArgs {
            interval_ms: 1,
            start: 10,
            limit: Some(3),
        });
        assert!(ticker.start().unwrap());
        ticker.run(&StopSignal::new()).unwrap();
        assert_eq!(*seen.lock(), [10, 11, 12]);
        assert_eq!(ticker.ticks(), 3);
    }

    #[test]
    fn raised_stop_ends_run_immediately() {
        let (ticker, seen) = ticker(TickerArgs {
            interval_ms: 1000,
            start: 0,
            limit: None,
        });
        let stop = StopSignal::new();
        stop.trigger();
        ticker.run(&stop).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn counts_without_publication_channel() {
        let ticker = Ticker::new(
            TickerArgs {
                interval_ms: 1,
                start: 0,
                limit: Some(3),
            },
            Ports::detached("Ticker"),
        )
        .unwrap();
        ticker.run(&StopSignal::new()).unwrap();
        assert_eq!(ticker.ticks(), 3);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let args = TickerArgs {
            interval_ms: 0,
            start: 0,
            limit: None,
        };
        assert!(matches!(
            Ticker::new(args, Ports::detached("Ticker")),
            Err(ComponentError::InvalidArgs(_))
        ));
    }
}
