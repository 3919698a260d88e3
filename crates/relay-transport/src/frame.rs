//! Wire framing for the relay protocol
//!
//! Every frame is a single WebSocket text message carrying a JSON envelope
//! with a named event and an arbitrary payload:
//!
//! ```json
//! {"event": "chat:message", "data": {"roomId": "7", "text": "hi"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A single relay frame: a named event plus its JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name, e.g. `call:offer` or `chat:typing`
    pub event: String,
    /// Event payload; `null` when the event carries no data
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Creates a frame for the given event and payload
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self { event: event.into(), data }
    }

    /// Serializes the frame to the JSON text put on the wire
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Encode)
    }

    /// Parses a text message received from the relay
    pub fn decode(text: &str) -> Result<Frame> {
        serde_json::from_str(text).map_err(Error::Decode)
    }
}
