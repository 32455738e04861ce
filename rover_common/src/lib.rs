//! Rover Common Library
//!
//! This crate provides shared configuration loading, the cooperative stop
//! signal and the process watchdog contract for all rover workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Ports, timeouts and other shared defaults
//! - [`stop`] - Write-once cancellation flag (threads and processes)
//! - [`watchdog`] - Process supervision contract
//! - [`prelude`] - Common re-exports for convenience

#![deny(missing_docs)]

pub mod config;
pub mod consts;
pub mod prelude;
pub mod stop;
pub mod watchdog;
