//! Error types for bus operations

use thiserror::Error;

/// Errors that can occur while publishing, subscribing or relaying.
///
/// Every variant is a transport-level failure: callers log it and carry on,
/// none of them is fatal to the process.
#[derive(Error, Debug)]
pub enum BusError {
    /// Socket I/O failed
    #[error("transport I/O error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Payload could not be serialized
    #[error("failed to encode payload for channel '{channel}': {source}")]
    Encode {
        /// Target channel
        channel: String,
        /// Source codec error
        #[source]
        source: bincode::Error,
    },

    /// Payload bytes could not be deserialized
    #[error("failed to decode payload on channel '{channel}': {source}")]
    Decode {
        /// Channel the frame arrived on
        channel: String,
        /// Source codec error
        #[source]
        source: bincode::Error,
    },

    /// Wire frame violated the framing contract
    #[error("malformed frame: {0}")]
    Frame(String),

    /// Network settings failed validation
    #[error("invalid network settings: {0}")]
    InvalidSettings(String),

    /// Broker endpoint could not be reached
    #[error("not connected to broker at {addr}: {reason}")]
    NotConnected {
        /// Endpoint that was tried
        addr: String,
        /// Last connect failure
        reason: String,
    },
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;
