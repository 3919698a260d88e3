//! Chat client construction, operations and the inbound driver
//!
//! The manager owns the rooms map, the relay subscriptions and the driver
//! task that serializes inbound events. Room state and the active-view
//! marker live behind a single lock so unread accounting can never
//! disagree with which room the operator is looking at.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use deskline_relay_transport::{RelayLink, ReplayId, SubscriptionId};

use crate::chat::history::HistoryApi;
use crate::chat::{ChatEvent, ChatMessage, ChatRoom, PartyRole, TypingStatus};
use crate::config::OperatorProfile;
use crate::error::ClientResult;
use crate::signal::event::{CHAT_JOIN, CHAT_LEAVE, CHAT_MESSAGE, CHAT_READ, CHAT_TYPING};
use crate::signal::{
    OutgoingChatMessage, READER_ROLE_ADMIN, ReadPayload, TypingPayload, emit_json, on_payload,
};

const EVENT_CAPACITY: usize = 256;

/// How long after the last keystroke the outbound typing indicator clears
pub const TYPING_IDLE: Duration = Duration::from_millis(1500);

/// Inbound relay events serialized through the driver task
enum ChatSignal {
    Message(ChatMessage),
    Typing(TypingPayload),
    Read(ReadPayload),
}

/// Per-room bookkeeping behind the rooms lock
struct RoomEntry {
    room: ChatRoom,
    /// Relay replay entry while the room is joined, so reconnects re-join
    replay: Option<ReplayId>,
    /// True between the first keystroke and the idle expiry
    typing_out: bool,
    /// Bumped per keystroke; a stale idle timer compares and backs off
    typing_generation: u64,
}

impl RoomEntry {
    fn new(room_id: &str) -> Self {
        Self {
            room: ChatRoom::new(room_id),
            replay: None,
            typing_out: false,
            typing_generation: 0,
        }
    }
}

/// All room state plus the active-view marker
struct RoomsState {
    rooms: HashMap<String, RoomEntry>,
    active: Option<String>,
}

impl RoomsState {
    /// Room state appears lazily: the first inbound event for an untracked
    /// room creates it, so unread accounting starts before any join.
    fn entry(&mut self, room_id: &str) -> &mut RoomEntry {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomEntry::new(room_id))
    }
}

/// Client for customer conversations over the chat relay.
///
/// Cheap to clone; clones share the same room state. One client per relay
/// connection.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ChatInner>,
}

struct ChatInner {
    relay: Arc<dyn RelayLink>,
    history: Arc<dyn HistoryApi>,
    operator: OperatorProfile,
    rooms: Mutex<RoomsState>,
    events_tx: broadcast::Sender<ChatEvent>,
    subscriptions: SyncMutex<Vec<SubscriptionId>>,
    driver: SyncMutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Creates a client on `relay`, subscribing to the `chat:*` events.
    pub fn new(
        relay: Arc<dyn RelayLink>,
        history: Arc<dyn HistoryApi>,
        operator: OperatorProfile,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (signals_tx, mut signals_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ChatInner {
            relay,
            history,
            operator,
            rooms: Mutex::new(RoomsState { rooms: HashMap::new(), active: None }),
            events_tx,
            subscriptions: SyncMutex::new(Vec::new()),
            driver: SyncMutex::new(None),
        });

        let subs = vec![
            on_payload::<ChatMessage, _>(&inner.relay, CHAT_MESSAGE, &signals_tx, ChatSignal::Message),
            on_payload::<TypingPayload, _>(&inner.relay, CHAT_TYPING, &signals_tx, ChatSignal::Typing),
            on_payload::<ReadPayload, _>(&inner.relay, CHAT_READ, &signals_tx, ChatSignal::Read),
        ];
        *inner.subscriptions.lock() = subs;

        let driver_inner = inner.clone();
        let driver = tokio::spawn(async move {
            while let Some(signal) = signals_rx.recv().await {
                driver_inner.handle(signal).await;
            }
        });
        *inner.driver.lock() = Some(driver);

        Self { inner }
    }

    /// Stream of chat events; every subscriber sees every event
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Joins `room_id`, tracking the membership locally so reconnects
    /// replay the join. Safe while the relay is down (the join goes out
    /// once a session is established) and when already joined.
    pub async fn join_room(&self, room_id: &str) {
        {
            let mut rooms = self.inner.rooms.lock().await;
            let entry = rooms.entry(room_id);
            if entry.replay.is_some() {
                debug!("Already joined room {}", room_id);
                return;
            }
            entry.replay = Some(
                self.inner
                    .relay
                    .add_replay(CHAT_JOIN, Value::String(room_id.to_string())),
            );
        }
        info!("Joining chat room {}", room_id);
        if let Err(e) = self
            .inner
            .relay
            .emit(CHAT_JOIN, Value::String(room_id.to_string()))
            .await
        {
            // The replay entry delivers the join on the next connect
            debug!("Join for room {} deferred: {}", room_id, e);
        }
    }

    /// Leaves `room_id`, discarding local room state and the reconnect
    /// replay entry. Server-side history is unaffected.
    pub async fn leave_room(&self, room_id: &str) {
        let replay = {
            let mut rooms = self.inner.rooms.lock().await;
            if rooms.active.as_deref() == Some(room_id) {
                rooms.active = None;
            }
            match rooms.rooms.remove(room_id) {
                Some(entry) => entry.replay,
                None => return,
            }
        };
        let Some(replay) = replay else { return };
        self.inner.relay.remove_replay(replay);
        info!("Leaving chat room {}", room_id);
        if let Err(e) = self
            .inner
            .relay
            .emit(CHAT_LEAVE, Value::String(room_id.to_string()))
            .await
        {
            debug!("Leave for room {} not sent: {}", room_id, e);
        }
    }

    /// Makes `room_id` the active view and returns its reconciled state.
    ///
    /// Fetches history and merges it with anything received live while the
    /// room was closed (history is the base, live extras keep arrival
    /// order), zeroes the unread badge, marks customer messages read and
    /// announces the read to the relay. A failed history fetch degrades to
    /// the live state instead of blocking the room.
    pub async fn open_room(&self, room_id: &str) -> ChatRoom {
        // Become the active view first so messages landing mid-fetch are
        // already counted as read.
        {
            let mut rooms = self.inner.rooms.lock().await;
            rooms.active = Some(room_id.to_string());
            rooms.entry(room_id);
        }
        info!("Opening chat room {}", room_id);

        let history = match self.inner.history.fetch_messages(room_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("History for room {} unavailable: {}", room_id, e);
                Vec::new()
            }
        };

        let snapshot = {
            let mut rooms = self.inner.rooms.lock().await;
            let entry = rooms.entry(room_id);
            let live = std::mem::take(&mut entry.room.messages);
            let mut merged = history;
            for message in live {
                if !merged.iter().any(|m| m.id == message.id) {
                    merged.push(message);
                }
            }
            for message in &mut merged {
                if message.sender_role == PartyRole::Customer {
                    message.read = true;
                }
            }
            entry.room.messages = merged;
            entry.room.unread_count = 0;
            entry.room.clone()
        };

        self.inner
            .publish(ChatEvent::UnreadChanged { room_id: room_id.to_string(), count: 0 });
        self.inner.send_read_receipt(room_id).await;
        snapshot
    }

    /// Clears the active view. Room state is retained so unread counting
    /// continues; [`leave_room`](Self::leave_room) is the discard.
    pub async fn close_room(&self, room_id: &str) {
        let mut rooms = self.inner.rooms.lock().await;
        if rooms.active.as_deref() == Some(room_id) {
            rooms.active = None;
        }
    }

    /// Sends a message to `room_id` as the operator.
    ///
    /// The message does not enter local room state here: the relay assigns
    /// its id and echoes it back, and that echo is the only path into the
    /// room's sequence, so there is a single source of truth for message
    /// identity. Also clears the outbound typing indicator.
    pub async fn send_message(&self, room_id: &str, text: impl Into<String>) -> ClientResult<()> {
        let payload = OutgoingChatMessage {
            room_id: room_id.to_string(),
            sender_id: self.inner.operator.id.clone(),
            sender_name: self.inner.operator.display_name.clone(),
            sender_role: PartyRole::Operator,
            text: text.into(),
        };
        emit_json(&self.inner.relay, CHAT_MESSAGE, &payload).await?;
        debug!("Message sent to room {}", room_id);
        self.stop_typing(room_id).await;
        Ok(())
    }

    /// Keystroke hook: announces typing on the idle-to-typing edge and
    /// re-arms the timer that clears the indicator after [`TYPING_IDLE`]
    /// without further keystrokes.
    pub async fn notify_typing(&self, room_id: &str) {
        let (generation, rising_edge) = {
            let mut rooms = self.inner.rooms.lock().await;
            let entry = rooms.entry(room_id);
            entry.typing_generation += 1;
            let rising_edge = !entry.typing_out;
            entry.typing_out = true;
            (entry.typing_generation, rising_edge)
        };
        if rising_edge {
            self.inner.send_typing(room_id, true).await;
        }
        let inner = self.inner.clone();
        let room = room_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_IDLE).await;
            inner.expire_typing(&room, generation).await;
        });
    }

    /// Immediately clears the outbound typing indicator
    pub async fn stop_typing(&self, room_id: &str) {
        let clear = {
            let mut rooms = self.inner.rooms.lock().await;
            let entry = rooms.entry(room_id);
            // Invalidates any pending idle timer either way
            entry.typing_generation += 1;
            std::mem::replace(&mut entry.typing_out, false)
        };
        if clear {
            self.inner.send_typing(room_id, false).await;
        }
    }

    /// Refreshes the unread badge for a room from the history service.
    ///
    /// Failures leave local accounting untouched and report the current
    /// local count, so a flaky history service never blocks room usage.
    pub async fn fetch_unread_count(&self, room_id: &str) -> usize {
        match self.inner.history.unread_count(room_id).await {
            Ok(count) => {
                {
                    let mut rooms = self.inner.rooms.lock().await;
                    rooms.entry(room_id).room.unread_count = count;
                }
                self.inner
                    .publish(ChatEvent::UnreadChanged { room_id: room_id.to_string(), count });
                count
            }
            Err(e) => {
                warn!("Unread count for room {} unavailable: {}", room_id, e);
                let rooms = self.inner.rooms.lock().await;
                rooms
                    .rooms
                    .get(room_id)
                    .map(|entry| entry.room.unread_count)
                    .unwrap_or(0)
            }
        }
    }

    /// Snapshot of one room's state
    pub async fn room(&self, room_id: &str) -> Option<ChatRoom> {
        let rooms = self.inner.rooms.lock().await;
        rooms.rooms.get(room_id).map(|entry| entry.room.clone())
    }

    /// Snapshots of all tracked rooms
    pub async fn rooms(&self) -> Vec<ChatRoom> {
        let rooms = self.inner.rooms.lock().await;
        rooms.rooms.values().map(|entry| entry.room.clone()).collect()
    }

    /// The room currently open in the console, if any
    pub async fn active_room(&self) -> Option<String> {
        self.inner.rooms.lock().await.active.clone()
    }

    /// True while the room's membership is tracked for reconnect replay
    pub async fn is_joined(&self, room_id: &str) -> bool {
        let rooms = self.inner.rooms.lock().await;
        rooms
            .rooms
            .get(room_id)
            .is_some_and(|entry| entry.replay.is_some())
    }

    /// Detaches from the relay (handlers and replay entries) and stops the
    /// driver. The client must not be used afterwards.
    pub async fn shutdown(&self) {
        let subs: Vec<SubscriptionId> = self.inner.subscriptions.lock().drain(..).collect();
        for id in subs {
            self.inner.relay.off(id);
        }
        let replays: Vec<ReplayId> = {
            let mut rooms = self.inner.rooms.lock().await;
            rooms
                .rooms
                .values_mut()
                .filter_map(|entry| entry.replay.take())
                .collect()
        };
        for id in replays {
            self.inner.relay.remove_replay(id);
        }
        if let Some(driver) = self.inner.driver.lock().take() {
            driver.abort();
        }
        info!("Chat client shut down");
    }
}

impl ChatInner {
    fn publish(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    async fn send_typing(&self, room_id: &str, is_typing: bool) {
        let payload = TypingPayload {
            room_id: room_id.to_string(),
            sender_name: self.operator.display_name.clone(),
            is_typing,
        };
        if let Err(e) = emit_json(&self.relay, CHAT_TYPING, &payload).await {
            debug!("Typing update for room {} not sent: {}", room_id, e);
        }
    }

    async fn send_read_receipt(&self, room_id: &str) {
        let payload = ReadPayload {
            room_id: room_id.to_string(),
            reader_role: READER_ROLE_ADMIN.to_string(),
        };
        if let Err(e) = emit_json(&self.relay, CHAT_READ, &payload).await {
            debug!("Read receipt for room {} not sent: {}", room_id, e);
        }
    }

    /// Idle-timer expiry; a stale generation means another keystroke or an
    /// explicit stop got there first.
    async fn expire_typing(&self, room_id: &str, generation: u64) {
        let expired = {
            let mut rooms = self.rooms.lock().await;
            let Some(entry) = rooms.rooms.get_mut(room_id) else {
                return;
            };
            if entry.typing_generation == generation && entry.typing_out {
                entry.typing_out = false;
                true
            } else {
                false
            }
        };
        if expired {
            self.send_typing(room_id, false).await;
        }
    }

    /// Driver entry point; inbound events arrive here one at a time.
    async fn handle(&self, signal: ChatSignal) {
        match signal {
            ChatSignal::Message(message) => self.on_message(message).await,
            ChatSignal::Typing(payload) => self.on_typing(payload).await,
            ChatSignal::Read(payload) => self.on_read(payload).await,
        }
    }

    /// `chat:message`: appends to the room unless the id is already
    /// present. A customer message lands read (with a receipt) while the
    /// room is the active view, and raises the unread badge otherwise.
    async fn on_message(&self, mut message: ChatMessage) {
        let room_id = message.room_id.clone();
        let from_customer = message.sender_role == PartyRole::Customer;

        let (is_active, typing_cleared, unread) = {
            let mut rooms = self.rooms.lock().await;
            let is_active = rooms.active.as_deref() == Some(room_id.as_str());
            let entry = rooms.entry(&room_id);
            if entry.room.contains_message(&message.id) {
                debug!("Dropping duplicate message {} in room {}", message.id, room_id);
                return;
            }
            // A new message supersedes any typing indicator
            let typing_cleared = entry.room.typing.take().is_some();
            if is_active && from_customer {
                message.read = true;
            }
            entry.room.messages.push(message.clone());
            let unread = if !is_active && from_customer {
                entry.room.unread_count += 1;
                Some(entry.room.unread_count)
            } else {
                None
            };
            (is_active, typing_cleared, unread)
        };

        debug!("Message {} stored in room {}", message.id, room_id);
        if typing_cleared {
            self.publish(ChatEvent::TypingChanged { room_id: room_id.clone(), typing: None });
        }
        self.publish(ChatEvent::MessageReceived { room_id: room_id.clone(), message });
        if let Some(count) = unread {
            self.publish(ChatEvent::UnreadChanged { room_id, count });
        } else if is_active && from_customer {
            self.send_read_receipt(&room_id).await;
        }
    }

    /// `chat:typing`: updates the room's last-known typing state; a stop
    /// event clears it.
    async fn on_typing(&self, payload: TypingPayload) {
        let typing = payload.is_typing.then(|| TypingStatus {
            sender_name: payload.sender_name.clone(),
            is_typing: true,
        });
        {
            let mut rooms = self.rooms.lock().await;
            rooms.entry(&payload.room_id).room.typing = typing.clone();
        }
        debug!("Typing in room {}: {}", payload.room_id, payload.is_typing);
        self.publish(ChatEvent::TypingChanged { room_id: payload.room_id, typing });
    }

    /// `chat:read`: the remote party read the conversation, so
    /// operator-sent messages flip to read. Our own receipts echoed back
    /// are ignored.
    async fn on_read(&self, payload: ReadPayload) {
        if payload.reader_role == READER_ROLE_ADMIN {
            return;
        }
        {
            let mut rooms = self.rooms.lock().await;
            let Some(entry) = rooms.rooms.get_mut(&payload.room_id) else {
                return;
            };
            for message in &mut entry.room.messages {
                if message.sender_role == PartyRole::Operator {
                    message.read = true;
                }
            }
        }
        debug!("Room {} read by {}", payload.room_id, payload.reader_role);
        self.publish(ChatEvent::ReadReceipt {
            room_id: payload.room_id,
            reader_role: payload.reader_role,
        });
    }
}
