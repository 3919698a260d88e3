//! The seam between the relay connection and the session clients built on it

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Reserved event names dispatched by the transport itself.
///
/// They are delivered to subscribers like any wire event but never travel
/// on the wire; their payload is always `null`.
pub mod events {
    /// Fired after a session is established and the identity registered
    pub const CONNECT: &str = "connect";
    /// Fired when an established session is lost or explicitly closed
    pub const DISCONNECT: &str = "disconnect";
}

/// Registration frame sent first on every (re)connect.
pub(crate) const REGISTER_EVENT: &str = "register";

/// Callback invoked with the payload of a subscribed event.
///
/// Handlers run synchronously on the read loop, in frame-arrival order,
/// and must not block.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Identifies one handler registration; returned by [`RelayLink::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Mints a fresh id; [`RelayLink`] implementors return one per
    /// registration.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Identifies one replay entry; returned by [`RelayLink::add_replay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplayId(Uuid);

impl ReplayId {
    /// Mints a fresh id; [`RelayLink`] implementors return one per entry.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// A registered, event-dispatching relay connection.
///
/// Session clients depend on this trait rather than the concrete
/// [`RelayConnection`](crate::RelayConnection) so they can run against an
/// in-memory relay in tests.
#[async_trait]
pub trait RelayLink: Send + Sync {
    /// Identity most recently registered via `connect`, if any
    fn identity(&self) -> Option<String>;

    /// True while a session is established and registered
    fn is_connected(&self) -> bool;

    /// Sends a named event to the relay.
    ///
    /// Fails with [`Error::NotConnected`](crate::Error::NotConnected) when
    /// no session is established; delivery on a live session is
    /// fire-and-forget.
    async fn emit(&self, event: &str, data: Value) -> Result<()>;

    /// Subscribes `handler` to `event`
    fn on(&self, event: &str, handler: EventHandler) -> SubscriptionId;

    /// Removes a handler; returns `false` when the id was already gone
    fn off(&self, id: SubscriptionId) -> bool;

    /// Registers a frame that is re-sent after every successful
    /// (re)connect, right after registration, in insertion order.
    fn add_replay(&self, event: &str, data: Value) -> ReplayId;

    /// Drops a replay entry; returns `false` when the id was already gone
    fn remove_replay(&self, id: ReplayId) -> bool;
}
