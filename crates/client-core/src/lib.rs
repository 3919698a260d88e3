//! # deskline-client-core - Call and Chat Session Clients
//!
//! This crate is the operator side of the deskline support console: a call
//! client that dials customers over a WebRTC-style offer/answer exchange,
//! and a chat client that tracks rooms, messages, typing indicators and
//! unread counts. Both ride the relay connection provided by
//! `deskline-relay-transport`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deskline_client_core::{CallEvent, ClientBuilder, MediaEngine};
//!
//! async fn run(engine: Arc<dyn MediaEngine>) -> Result<(), Box<dyn std::error::Error>> {
//!     let console = ClientBuilder::new()
//!         .operator("operator-1", "Maria")
//!         .call_relay_url("wss://relay.example.com/call".parse()?)
//!         .chat_relay_url("wss://relay.example.com/chat".parse()?)
//!         .history_base_url("https://api.example.com/chat".parse()?)
//!         .media_engine(engine)
//!         .build()?;
//!     console.connect();
//!
//!     // Dial a customer and wait for them to pick up
//!     let mut events = console.call.subscribe_events();
//!     console.call.start_call("customer-42").await?;
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             CallEvent::Connected { .. } => break,
//!             CallEvent::Rejected { .. } | CallEvent::UserOffline { .. } => return Ok(()),
//!             _ => {}
//!         }
//!     }
//!
//!     // Meanwhile, chat works independently
//!     console.chat.join_room("7").await;
//!     let room = console.chat.open_room("7").await;
//!     println!("room {} has {} messages", room.room_id, room.messages.len());
//!     console.chat.send_message("7", "How can I help?").await?;
//!
//!     console.call.end_call().await?;
//!     console.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   ClientBuilder ──► Console { call: CallClient, chat: ChatClient }
//!                        │              │
//!                        │              ├── HistoryApi (REST, read-only)
//!                        ▼              ▼
//!                  RelayConnection  RelayConnection     (deskline-relay-transport)
//!                    call:* events    chat:* events
//!                        │
//!                        ▼
//!                   MediaEngine (capture + peer sessions, supplied by the app)
//! ```
//!
//! Each client owns a driver task that serializes inbound relay events, so
//! state transitions never race. Consumers observe them through broadcast
//! event streams ([`CallEvent`], [`ChatEvent`]).

pub mod builder;
pub mod call;
pub mod chat;
pub mod config;
pub mod error;
pub mod media;
pub mod signal;

pub use builder::{ClientBuilder, Console};
pub use call::{CallClient, CallEvent, CallId, CallInfo, CallState, EndReason};
pub use chat::{
    ChatClient, ChatEvent, ChatMessage, ChatRoom, HistoryApi, HttpHistory, PartyRole, TypingStatus,
};
pub use config::{CallConfig, ClientConfig, OperatorProfile};
pub use error::{ClientError, ClientResult};
pub use media::{
    CaptureHandle, IceCandidate, IceServer, MediaEngine, PeerEvent, PeerSession,
    SessionDescription,
};

// The transport types a console embedder needs without importing the
// transport crate directly
pub use deskline_relay_transport::{RelayConnection, RelayLink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
