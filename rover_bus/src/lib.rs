//! # Rover Bus
//!
//! Publish/subscribe message bus connecting rover components.
//!
//! The [`Bus`] trait defines delivery semantics only. Two transports
//! implement it:
//!
//! - [`DirectBus`]: in-process, synchronous dispatch on the publisher's
//!   thread. Used when every component lives in one process.
//! - [`NetworkBus`] + [`Broker`]: broker/client topology over TCP for
//!   process-per-component deployments.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  publish   ┌───────────┐  dispatch   ┌──────────────┐
//! │  component   │ ─────────► │    Bus    │ ──────────► │   listener   │
//! │  (publisher) │            │  (trait)  │             │ (on_message) │
//! └──────────────┘            └─────┬─────┘             └──────────────┘
//!                                   │
//!                 ┌─────────────────┴──────────────────┐
//!                 ▼                                    ▼
//!          ┌─────────────┐                 ┌───────────────────────┐
//!          │  DirectBus  │                 │ NetworkBus ⇄ Broker   │
//!          │ (same call) │                 │ (push/pull + pub/sub) │
//!          └─────────────┘                 └───────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! | Property | Direct | Network |
//! |----------|--------|---------|
//! | Per-publisher order | yes | yes |
//! | Cross-publisher order | publisher call order | none |
//! | Delivery | exactly the listeners registered at publish time | at-most-once, best-effort |
//! | Slow consumer | blocks the publisher | frames dropped at the broker |
//! | Listener failure | logged, others still called | logged, others still called |

#![deny(missing_docs)]

pub mod broker;
pub mod client;
pub mod direct;
pub mod error;
pub mod frame;
pub mod payload;
pub mod registry;
pub mod settings;

use std::sync::Arc;

pub use crate::broker::{Broker, BrokerStats};
pub use crate::client::NetworkBus;
pub use crate::direct::DirectBus;
pub use crate::error::{BusError, BusResult};
pub use crate::payload::Payload;
pub use crate::registry::ListenerRegistry;
pub use crate::settings::NetworkSettings;

/// Error a listener may return; it is logged at the dispatch point.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one listener invocation.
pub type ListenerResult = Result<(), ListenerError>;

/// Callback invoked with `(channel, payload)` for every delivered message.
///
/// Runs on the bus's dispatch path and must return quickly: blocking it
/// blocks delivery to every other listener on the same bus instance.
pub type Listener = Arc<dyn Fn(&str, &Payload) -> ListenerResult + Send + Sync>;

/// Shared handle onto a bus implementation.
pub type BusHandle = Arc<dyn Bus>;

/// Publish/subscribe contract.
pub trait Bus: Send + Sync {
    /// Deliver `message` to every listener currently subscribed to `channel`.
    fn publish(&self, channel: &str, message: Payload) -> BusResult<()>;

    /// Register `listener` against each channel in `channels`.
    ///
    /// May be called any number of times, by different components for the
    /// same channel (fan-out) or by one component for several channels.
    fn subscribe(&self, channels: &[String], listener: Listener) -> BusResult<()>;
}
