//! Error types and handling for the client-core library
//!
//! Errors are categorized to help with recovery strategies:
//!
//! - **Signaling** - relay not connected or dropped mid-operation; usually
//!   recoverable once the transport reconnects
//! - **Media** - capture device denied or missing; needs user action
//! - **Call** - invalid state for the requested operation or a failed
//!   negotiation; check [`CallState`](crate::call::CallState) first
//! - **Chat** - history service failures; the clients degrade gracefully
//!   and these mostly surface in logs
//! - **Configuration** - missing or malformed settings; fix before retry

use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the call and chat session clients
#[derive(Debug, Error)]
pub enum ClientError {
    /// Signaling errors
    #[error("Not connected to the signaling relay")]
    NotConnected,

    #[error("Signaling transport disconnected")]
    TransportDisconnected,

    /// Media errors
    #[error("Media access denied: {reason}")]
    MediaAccessDenied { reason: String },

    /// Call errors
    #[error("Negotiation failed: {reason}")]
    Negotiation { reason: String },

    #[error("Invalid call state: expected {expected}, got {actual}")]
    InvalidCallState { expected: String, actual: String },

    #[error("Call attempt cancelled before setup completed")]
    CallCancelled,

    /// Chat errors
    #[error("Chat history request failed: {reason}")]
    History { reason: String },

    /// Configuration errors
    #[error("Missing configuration: {field}")]
    MissingConfiguration { field: String },

    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ClientError {
    /// Create a media access denied error
    pub fn media_access_denied(reason: impl Into<String>) -> Self {
        Self::MediaAccessDenied { reason: reason.into() }
    }

    /// Create a negotiation error
    pub fn negotiation(reason: impl Into<String>) -> Self {
        Self::Negotiation { reason: reason.into() }
    }

    /// Create an invalid call state error
    pub fn invalid_call_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidCallState { expected: expected.into(), actual: actual.into() }
    }

    /// Create a chat history error
    pub fn history(reason: impl Into<String>) -> Self {
        Self::History { reason: reason.into() }
    }

    /// Create a missing configuration error
    pub fn missing_configuration(field: impl Into<String>) -> Self {
        Self::MissingConfiguration { field: field.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration { field: field.into(), reason: reason.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Retry once the transport or the history service is back
            ClientError::NotConnected
            | ClientError::TransportDisconnected
            | ClientError::History { .. } => true,

            // Needs user action or a different call state
            ClientError::MediaAccessDenied { .. }
            | ClientError::Negotiation { .. }
            | ClientError::InvalidCallState { .. }
            | ClientError::CallCancelled
            | ClientError::MissingConfiguration { .. }
            | ClientError::InvalidConfiguration { .. }
            | ClientError::Internal { .. } => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::NotConnected | ClientError::TransportDisconnected => "signaling",

            ClientError::MediaAccessDenied { .. } => "media",

            ClientError::Negotiation { .. }
            | ClientError::InvalidCallState { .. }
            | ClientError::CallCancelled => "call",

            ClientError::History { .. } => "chat",

            ClientError::MissingConfiguration { .. }
            | ClientError::InvalidConfiguration { .. } => "configuration",

            ClientError::Internal { .. } => "system",
        }
    }
}

impl From<deskline_relay_transport::Error> for ClientError {
    fn from(e: deskline_relay_transport::Error) -> Self {
        use deskline_relay_transport::Error as RelayError;
        match e {
            RelayError::NotConnected => ClientError::NotConnected,
            RelayError::ConnectionClosed => ClientError::TransportDisconnected,
            other => ClientError::internal(other.to_string()),
        }
    }
}
