//! Error types for the relay transport

use thiserror::Error;

/// Result type for relay transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the relay transport
#[derive(Debug, Error)]
pub enum Error {
    /// No relay session is currently established
    #[error("Not connected to relay")]
    NotConnected,

    /// The connection loop has shut down and can no longer accept frames
    #[error("Relay connection closed")]
    ConnectionClosed,

    /// A frame could not be serialized for the wire
    #[error("Failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// A received text message was not a valid frame
    #[error("Failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
}
