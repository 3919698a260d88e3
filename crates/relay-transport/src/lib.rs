//! Message-relay transport for the deskline console
//!
//! This crate provides the persistent WebSocket connection the session
//! clients ride on: identity registration, named-event dispatch, and
//! automatic reconnection with frame replay.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use deskline_relay_transport::{RelayConfig, RelayConnection, RelayLink};
//!
//! # tokio_test::block_on(async {
//! let config = RelayConfig::new("ws://127.0.0.1:4500/socket".parse().unwrap());
//! let relay = RelayConnection::new(config);
//!
//! // Handlers and replay entries live on the connection, not the session:
//! // both can be registered up front, and replays go out again after every
//! // reconnect.
//! relay.on("chat:message", Arc::new(|data| println!("message: {data}")));
//! relay.add_replay("chat:join", serde_json::json!("7"));
//!
//! relay.connect("operator-1");
//! // ... emit and receive events while the session is up ...
//! relay.disconnect().await;
//! # })
//! ```

mod connection;
mod error;
mod frame;
mod relay;

pub use connection::{RelayConfig, RelayConnection};
pub use error::{Error, Result};
pub use frame::Frame;
pub use relay::{EventHandler, RelayLink, ReplayId, SubscriptionId, events};

/// Re-export of common types for easier use
pub mod prelude {
    pub use super::{
        EventHandler, Frame, RelayConfig, RelayConnection, RelayLink, ReplayId, Result,
        SubscriptionId, events,
    };
}
