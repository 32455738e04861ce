//! # Rover
//!
//! Component runtime and supervisor ("car") for small robots.
//!
//! A car is a set of components declared in a TOML file. Each component
//! exchanges messages with the others over a [`rover_bus::Bus`] and may own
//! a long-running loop. The [`supervisor::Car`] builds the components from
//! the [`registry::ComponentRegistry`], wires them onto the bus and runs
//! them either as threads of one process or as one process each.
//!
//! # Module Structure
//!
//! - [`component`] - Component contract and its bus ports
//! - [`config`] - Typed car configuration
//! - [`registry`] - Startup-time registry of component factories
//! - [`supervisor`] - Lifecycle of the whole car
//! - [`process`] - Process-mode child entry points and watchdog
//! - [`components`] - Built-in components
//! - [`error`] - Supervisor error type

#![deny(missing_docs)]

pub mod component;
pub mod components;
pub mod config;
pub mod error;
pub mod process;
pub mod registry;
pub mod supervisor;

pub use crate::component::{Component, ComponentError, Ports};
pub use crate::config::{CarConfig, ComponentSpec, Parallelism, Transport};
pub use crate::error::{CarError, CarResult};
pub use crate::registry::ComponentRegistry;
pub use crate::supervisor::{Car, LifecycleState};
