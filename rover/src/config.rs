//! # Car Configuration
//!
//! Typed schema of the car TOML file.
//!
//! ```toml
//! parallel = "thread"
//!
//! [bus]
//! transport = "direct"
//!
//! [components.ticker]
//! interval_ms = 100
//! publication = "tick"
//!
//! [components.logger]
//! subscription = ["tick"]
//!
//! [components.signal.MapRange]
//! in_min = 0.0
//! in_max = 100.0
//! out_min = -1.0
//! out_max = 1.0
//! subscription = "tick"
//! publication = "steering"
//! ```
//!
//! `components` keeps declaration order, which is also the start order.
//! An empty table is the "no arguments" form.

use crate::error::{CarError, CarResult};
use rover_bus::NetworkSettings;
use rover_common::config::{ConfigError, ConfigLoader, SharedConfig};
use rover_common::consts::{DEFAULT_GRACE_PERIOD_MS, DEFAULT_START_TIMEOUT_MS};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Reserved key holding the channels a component listens to.
pub const SUBSCRIPTION_KEY: &str = "subscription";
/// Reserved key holding the channels a component publishes to.
pub const PUBLICATION_KEY: &str = "publication";

// ─── Parallelism ────────────────────────────────────────────────────

/// Execution mode of the car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parallelism {
    /// Every component in this process, run loops on threads.
    #[default]
    Thread,
    /// One OS process per component plus one for the broker.
    Process,
}

impl<'de> Deserialize<'de> for Parallelism {
    /// `"process"` selects process mode; any other value means threads.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = toml::Value::deserialize(deserializer)?;
        Ok(match value.as_str() {
            Some("process") => Parallelism::Process,
            _ => Parallelism::Thread,
        })
    }
}

// ─── Bus ────────────────────────────────────────────────────────────

/// Which bus transport the car uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// In-process synchronous dispatch (thread mode only).
    #[default]
    Direct,
    /// Broker plus one client per component.
    Network,
}

/// `[bus]` section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Selected transport.
    #[serde(default)]
    pub transport: Transport,
    /// Endpoints and tuning of the network transport.
    #[serde(flatten)]
    pub network: NetworkSettings,
}

// ─── Process mode ───────────────────────────────────────────────────

/// `[process]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
    /// Lifetime of each child process in seconds; children self-terminate
    /// afterwards. Unset means children run until told to stop.
    pub ttl_secs: Option<f64>,
    /// How long stopping threads or processes may take before they are
    /// abandoned (threads) or killed (processes).
    pub grace_period_ms: u64,
    /// How long each child may take to report that it started.
    pub start_timeout_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            ttl_secs: None,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
        }
    }
}

impl ProcessConfig {
    /// Child lifetime, if configured.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Shutdown grace period.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Child start report deadline.
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}

// ─── Root ───────────────────────────────────────────────────────────

/// Root of the car configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CarConfig {
    /// Thread or process mode.
    #[serde(default)]
    pub parallel: Parallelism,
    /// Logging and service identity.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Message bus; absent means components cannot communicate.
    #[serde(default)]
    pub bus: Option<BusConfig>,
    /// Process-mode tuning.
    #[serde(default)]
    pub process: ProcessConfig,
    /// Component module name → arguments (or class name → arguments).
    pub components: toml::Table,
}

impl CarConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    /// [`ConfigError`] when the file is missing, malformed or invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints that do not involve the registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.components.is_empty() {
            return Err(ConfigError::ValidationError(
                "no components declared".to_string(),
            ));
        }
        if let Some(bus) = &self.bus {
            bus.network
                .validate()
                .map_err(|e| ConfigError::ValidationError(format!("[bus] {e}")))?;
        }
        if let Some(ttl) = self.process.ttl_secs {
            if !ttl.is_finite() || ttl <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "process.ttl_secs must be a positive number of seconds, got {ttl}"
                )));
            }
        }
        if self.process.start_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "process.start_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Component specification ────────────────────────────────────────

/// One resolved component declaration.
///
/// Serializable so it can be handed to a process-mode child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Module the class belongs to.
    pub module: String,
    /// Component class; also the instance name.
    pub class: String,
    /// Arguments left after removing the channel keys.
    pub args: toml::Table,
    /// Channels delivered to `on_message`.
    pub subscription: Vec<String>,
    /// Channels written by `publish_message`, in positional order.
    pub publication: Vec<String>,
}

impl ComponentSpec {
    /// Split the reserved channel keys out of a component's table.
    ///
    /// Repeated subscription names are kept once, in first-seen order;
    /// publication lists are positional and kept as written.
    ///
    /// # Errors
    /// [`CarError::MalformedChannels`] when a channel entry is neither a
    /// string nor a list of strings, or names a blank channel.
    pub fn from_table(module: &str, class: &str, mut args: toml::Table) -> CarResult<Self> {
        let mut subscription = take_channels(class, SUBSCRIPTION_KEY, &mut args)?;
        let mut seen = HashSet::new();
        subscription.retain(|channel| seen.insert(channel.clone()));
        let publication = take_channels(class, PUBLICATION_KEY, &mut args)?;
        Ok(Self {
            module: module.to_string(),
            class: class.to_string(),
            args,
            subscription,
            publication,
        })
    }

    /// Instance name.
    pub fn name(&self) -> &str {
        &self.class
    }

    /// Whether the component takes part in messaging at all.
    pub fn has_channels(&self) -> bool {
        !self.subscription.is_empty() || !self.publication.is_empty()
    }
}

fn take_channels(
    component: &str,
    field: &'static str,
    args: &mut toml::Table,
) -> CarResult<Vec<String>> {
    let malformed = |reason: String| CarError::MalformedChannels {
        component: component.to_string(),
        field,
        reason,
    };

    let channels = match args.remove(field) {
        None => return Ok(Vec::new()),
        Some(toml::Value::String(name)) => vec![name],
        Some(toml::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(name) => Ok(name),
                other => Err(malformed(format!(
                    "expected a channel name, found {}",
                    other.type_str()
                ))),
            })
            .collect::<CarResult<Vec<_>>>()?,
        Some(other) => {
            return Err(malformed(format!(
                "expected a channel name or a list of names, found {}",
                other.type_str()
            )));
        }
    };

    if channels.iter().any(|c| c.trim().is_empty()) {
        return Err(malformed("channel names cannot be blank".to_string()));
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = CarConfig::from_toml("[components.logger]\n").unwrap();
        assert_eq!(config.parallel, Parallelism::Thread);
        assert!(config.bus.is_none());
        assert_eq!(config.process.grace_period(), Duration::from_millis(1000));
        assert!(config.process.ttl().is_none());
        assert_eq!(config.components.len(), 1);
    }

    #[test]
    fn only_process_selects_process_mode() {
        let cases = [
            ("\"process\"", Parallelism::Process),
            ("\"thread\"", Parallelism::Thread),
            ("\"fork\"", Parallelism::Thread),
            ("true", Parallelism::Thread),
        ];
        for (value, expected) in cases {
            let text = format!("parallel = {value}\n[components.logger]\n");
            assert_eq!(CarConfig::from_toml(&text).unwrap().parallel, expected);
        }
    }

    #[test]
    fn bus_section_flattens_network_settings() {
        let text = r#"
            [bus]
            transport = "network"
            broadcaster_port = 7100
            collector_port = 7101

            [components.logger]
        "#;
        let bus = CarConfig::from_toml(text).unwrap().bus.unwrap();
        assert_eq!(bus.transport, Transport::Network);
        assert_eq!(bus.network.broadcaster_port, 7100);
        assert_eq!(bus.network.collector_port, 7101);
        assert_eq!(bus.network.send_queue, NetworkSettings::default().send_queue);
    }

    #[test]
    fn components_keep_declaration_order() {
        let text = r#"
            [components.zeta]
            [components.alpha]
            [components.mid]
        "#;
        let config = CarConfig::from_toml(text).unwrap();
        let order: Vec<&str> = config.components.keys().map(String::as_str).collect();
        assert_eq!(order, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn validation_errors() {
        assert!(matches!(
            CarConfig::from_toml("[components]\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            CarConfig::from_toml("[process]\nttl_secs = -1.0\n[components.logger]\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            CarConfig::from_toml("[bus]\nsend_queue = 0\n[components.logger]\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            CarConfig::from_toml("unknown = 1\n[components.logger]\n"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[components.ticker]\ninterval_ms = 5").unwrap();
        let config = CarConfig::from_file(file.path()).unwrap();
        assert!(config.components.contains_key("ticker"));

        let missing = CarConfig::from_file(Path::new("/nonexistent/car.toml"));
        assert!(matches!(missing, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn channel_keys_are_split_from_args() {
        let table: toml::Table = toml::from_str(
            r#"
            interval_ms = 10
            subscription = "a"
            publication = ["b", "c"]
            "#,
        )
        .unwrap();
        let spec = ComponentSpec::from_table("ticker", "Ticker", table).unwrap();
        assert_eq!(spec.subscription, ["a"]);
        assert_eq!(spec.publication, ["b", "c"]);
        assert_eq!(spec.args.len(), 1);
        assert!(spec.args.contains_key("interval_ms"));
        assert!(spec.has_channels());
        assert_eq!(spec.name(), "Ticker");
    }

    #[test]
    fn repeated_subscriptions_are_kept_once() {
        let table: toml::Table =
            toml::from_str(r#"subscription = ["b", "a", "b", "a"]"#).unwrap();
        let spec = ComponentSpec::from_table("m", "C", table).unwrap();
        assert_eq!(spec.subscription, ["b", "a"]);
    }

    #[test]
    fn malformed_channels_are_rejected() {
        for text in [
            "subscription = 3",
            "publication = [\"ok\", 1]",
            "publication = \"  \"",
        ] {
            let table: toml::Table = toml::from_str(text).unwrap();
            let err = ComponentSpec::from_table("m", "C", table).unwrap_err();
            assert!(matches!(err, CarError::MalformedChannels { .. }), "{text}");
        }
    }
}
