//! Supervisor error type.

use crate::component::ComponentError;
use rover_bus::BusError;
use rover_common::config::ConfigError;
use rover_common::stop::StopError;
use rover_common::watchdog::WatchdogError;
use thiserror::Error;

/// Errors raised while building, starting or stopping a car.
#[derive(Debug, Error)]
pub enum CarError {
    /// Configuration file missing, unparsable or semantically invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A configured module name has no registered component.
    #[error("component module '{module}' is not registered")]
    UnknownModule {
        /// Configured module name.
        module: String,
    },

    /// A configured class is not defined by its module.
    #[error("module '{module}' has no component class '{class}' (available: {available})")]
    UnknownClass {
        /// Module name.
        module: String,
        /// Requested class.
        class: String,
        /// Comma-separated classes the module defines.
        available: String,
    },

    /// A multi-class module was configured without naming its classes.
    #[error("module '{module}' defines several component classes ({classes}); select them by class name")]
    AmbiguousModule {
        /// Module name.
        module: String,
        /// Comma-separated classes the module defines.
        classes: String,
    },

    /// Two configured components resolve to the same instance name.
    #[error("component '{component}' is declared more than once")]
    DuplicateComponent {
        /// Instance name.
        component: String,
    },

    /// Component arguments did not match the component's argument type.
    #[error("invalid arguments for component '{component}': {reason}")]
    InvalidArgs {
        /// Instance name.
        component: String,
        /// Deserialization or validation message.
        reason: String,
    },

    /// A `subscription`/`publication` entry is neither a name nor a list of names.
    #[error("component '{component}': malformed {field}: {reason}")]
    MalformedChannels {
        /// Instance name.
        component: String,
        /// `subscription` or `publication`.
        field: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// Components declare channels but no bus is configured.
    #[error("component '{component}' declares channels but no [bus] is configured")]
    MissingBus {
        /// First component found with channels.
        component: String,
    },

    /// Process mode cannot share an in-process bus.
    #[error("process mode requires the network bus transport")]
    BusRequired,

    /// A component's `start` (or construction) failed.
    #[error("component '{component}' failed to start: {source}")]
    StartFailed {
        /// Instance name.
        component: String,
        /// Underlying component error.
        #[source]
        source: ComponentError,
    },

    /// Bus transport failure (broker bind, client connect, subscribe).
    #[error("bus transport error: {0}")]
    Transport(#[from] BusError),

    /// A thread or process could not be spawned.
    #[error("failed to spawn {what}: {source}")]
    Spawn {
        /// What was being spawned.
        what: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Child process supervision failure.
    #[error(transparent)]
    Watchdog(#[from] WatchdogError),

    /// Stop signal handler installation failure.
    #[error(transparent)]
    Stop(#[from] StopError),

    /// Malformed process-mode child specification.
    #[error("invalid child specification: {0}")]
    ChildSpec(String),
}

impl CarError {
    /// Whether this error comes from the configuration rather than from
    /// running components.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            CarError::Config(_)
                | CarError::UnknownModule { .. }
                | CarError::UnknownClass { .. }
                | CarError::AmbiguousModule { .. }
                | CarError::DuplicateComponent { .. }
                | CarError::InvalidArgs { .. }
                | CarError::MalformedChannels { .. }
                | CarError::MissingBus { .. }
                | CarError::BusRequired
        )
    }
}

/// Result type for supervisor operations.
pub type CarResult<T> = Result<T, CarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_classified() {
        assert!(CarError::BusRequired.is_config());
        assert!(
            CarError::UnknownModule {
                module: "lidar".to_string()
            }
            .is_config()
        );
        assert!(CarError::Config(ConfigError::ParseError("bad".to_string())).is_config());

        let start = CarError::StartFailed {
            component: "Camera".to_string(),
            source: ComponentError::Device("no /dev/video0".to_string()),
        };
        assert!(!start.is_config());
        assert!(start.to_string().contains("Camera"));
        assert!(start.to_string().contains("/dev/video0"));
    }
}
