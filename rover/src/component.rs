//! # Component Contract
//!
//! A component is a unit of robot functionality (a camera, a motor
//! controller, a filter). The supervisor drives it through four phases:
//!
//! ```text
//! start() ──► run(stop) ──► shutdown()
//!    │            ▲
//!    └─ on_message(channel, payload) may fire at any point after start
//! ```
//!
//! Methods take `&self`: message callbacks, the run loop and shutdown can
//! execute on different threads, so implementations keep mutable state
//! behind locks or atomics.
//!
//! Each component owns a [`Ports`] value holding its declared subscription
//! and publication channels and the bus handle attached by the supervisor.

use rover_bus::{BusError, BusHandle, Listener, ListenerResult, Payload};
use rover_common::stop::StopSignal;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use thiserror::Error;
use tracing::warn;

// ─── Errors ─────────────────────────────────────────────────────────

/// Errors raised by component implementations.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// The component was asked for a capability it does not provide.
    #[error("{component} - '{capability}' method not implemented")]
    NotImplemented {
        /// Component (and context) that lacks the capability.
        component: String,
        /// Missing capability, e.g. `on_message`.
        capability: &'static str,
    },

    /// Publishing was attempted before a bus was attached.
    #[error("{component} - cannot publish without a bus")]
    NoBus {
        /// Component name.
        component: String,
    },

    /// Construction arguments were rejected.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// A payload had an unexpected shape.
    #[error("unexpected payload on '{channel}': {payload}")]
    UnexpectedPayload {
        /// Channel the payload arrived on.
        channel: String,
        /// Rendering of the rejected payload.
        payload: String,
    },

    /// Hardware or device access failed.
    #[error("device error: {0}")]
    Device(String),

    /// A process-mode child reported that its component failed to start.
    #[error("child process: {0}")]
    Child(String),

    /// I/O failure (files, sockets owned by the component).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bus transport failure.
    #[error(transparent)]
    Bus(#[from] BusError),
}

// ─── Ports ──────────────────────────────────────────────────────────

/// Bus-facing side of a component: declared channels plus the bus handle.
///
/// Channel lists are fixed at construction. The bus handle is attached at
/// most once, by the supervisor, before [`Component::start`] is called.
pub struct Ports {
    name: String,
    subscription: Vec<String>,
    publication: Vec<String>,
    bus: OnceLock<BusHandle>,
    arity_warned: AtomicBool,
}

impl Ports {
    /// Ports for component `name` with its declared channels.
    pub fn new(
        name: impl Into<String>,
        subscription: Vec<String>,
        publication: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            subscription,
            publication,
            bus: OnceLock::new(),
            arity_warned: AtomicBool::new(false),
        }
    }

    /// Ports without any channel.
    pub fn detached(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new(), Vec::new())
    }

    /// Component instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channels whose messages are delivered to `on_message`.
    pub fn subscription(&self) -> &[String] {
        &self.subscription
    }

    /// Channels `publish` writes to, in positional order.
    pub fn publication(&self) -> &[String] {
        &self.publication
    }

    /// Attach the bus; returns `false` if one was already attached.
    pub fn attach(&self, bus: BusHandle) -> bool {
        let attached = self.bus.set(bus).is_ok();
        if !attached {
            warn!("{} - bus already attached, keeping the first one", self.name);
        }
        attached
    }

    /// The attached bus, if any.
    pub fn bus(&self) -> Option<&BusHandle> {
        self.bus.get()
    }

    /// Whether the publish arity warning has been emitted.
    pub fn arity_warned(&self) -> bool {
        self.arity_warned.load(Ordering::Relaxed)
    }

    /// Publish `values` positionally onto the publication channels.
    ///
    /// Value *i* goes to channel *i*. When the lengths differ a warning is
    /// logged the first time only, and the first `min(N, M)` pairs are
    /// published. Transport failures are logged per channel and do not
    /// abort the remaining channels.
    ///
    /// Returns the number of channels published to.
    ///
    /// # Errors
    /// [`ComponentError::NoBus`] if no bus is attached.
    pub fn publish(&self, values: Vec<Payload>) -> Result<usize, ComponentError> {
        let bus = self.bus.get().ok_or_else(|| ComponentError::NoBus {
            component: self.name.clone(),
        })?;

        if values.len() != self.publication.len() && !self.arity_warned.swap(true, Ordering::Relaxed)
        {
            warn!(
                "{} - {} message(s) to publish, but there are {} publication channel(s)",
                self.name,
                values.len(),
                self.publication.len()
            );
        }

        let mut published = 0;
        for (channel, value) in self.publication.iter().zip(values) {
            match bus.publish(channel, value) {
                Ok(()) => published += 1,
                Err(e) => warn!(component = %self.name, channel, "Failed to publish: {}", e),
            }
        }
        Ok(published)
    }
}

impl fmt::Debug for Ports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ports")
            .field("name", &self.name)
            .field("subscription", &self.subscription)
            .field("publication", &self.publication)
            .field("attached", &self.bus.get().is_some())
            .finish()
    }
}

// ─── Component trait ────────────────────────────────────────────────

/// Lifecycle contract every car component implements.
pub trait Component: Send + Sync {
    /// Declared channels and bus handle.
    fn ports(&self) -> &Ports;

    /// Instance name (the class name in configuration).
    fn name(&self) -> &str {
        self.ports().name()
    }

    /// Acquire resources.
    ///
    /// Returns `true` if the component has a long-running [`run`] loop.
    /// An error aborts the whole car start.
    ///
    /// [`run`]: Component::run
    fn start(&self) -> Result<bool, ComponentError>;

    /// Long-running loop; must return promptly once `stop` is raised.
    fn run(&self, stop: &StopSignal) -> Result<(), ComponentError> {
        let _ = stop;
        Ok(())
    }

    /// Handle one message from a subscribed channel.
    ///
    /// Runs on the bus dispatch path. The default reports
    /// [`ComponentError::NotImplemented`], which the bus logs.
    fn on_message(&self, channel: &str, payload: &Payload) -> Result<(), ComponentError> {
        let _ = payload;
        Err(ComponentError::NotImplemented {
            component: format!("{} (channel '{channel}')", self.name()),
            capability: "on_message",
        })
    }

    /// Release resources. Called once by the supervisor after the stop
    /// signal and the grace period.
    fn shutdown(&self) -> Result<(), ComponentError>;

    /// Publish positionally onto the publication channels.
    ///
    /// See [`Ports::publish`].
    fn publish_message(&self, values: Vec<Payload>) -> Result<usize, ComponentError> {
        self.ports().publish(values)
    }
}

/// Bus listener forwarding messages to `component.on_message`.
///
/// Holds a weak reference so the bus does not keep the component alive.
pub fn listener_for(component: &Arc<dyn Component>) -> Listener {
    let component: Weak<dyn Component> = Arc::downgrade(component);
    Arc::new(move |channel: &str, payload: &Payload| -> ListenerResult {
        match component.upgrade() {
            Some(component) => component.on_message(channel, payload).map_err(Into::into),
            None => Ok(()),
        }
    })
}
