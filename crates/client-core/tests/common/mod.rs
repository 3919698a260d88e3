//! Shared test doubles: an in-memory relay, a scriptable media engine and
//! a canned history service.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, broadcast, mpsc};

use deskline_client_core::{
    CallClient, CallConfig, CaptureHandle, ChatClient, ChatMessage, ClientError, ClientResult,
    HistoryApi, IceCandidate, IceServer, MediaEngine, OperatorProfile, PartyRole, PeerEvent,
    PeerSession, SessionDescription,
};
use deskline_relay_transport::{
    Error as RelayError, EventHandler, RelayLink, ReplayId, Result as RelayResult, SubscriptionId,
    events,
};

/// Installs the test subscriber; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory [`RelayLink`] with scriptable connectivity and full visibility
/// into emitted frames, handlers and replay entries.
pub struct FakeRelay {
    connected: AtomicBool,
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    replays: Mutex<Vec<(ReplayId, String, Value)>>,
    sent: Mutex<Vec<(String, Value)>>,
}

impl FakeRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            handlers: Mutex::new(HashMap::new()),
            replays: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn new_disconnected() -> Arc<Self> {
        let relay = Self::new();
        relay.set_connected(false);
        relay
    }

    /// Scripts connectivity for subsequent `emit` calls
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Delivers an inbound event to every subscribed handler, the way the
    /// real read loop does.
    pub fn inject(&self, event: &str, data: Value) {
        let handlers: Vec<EventHandler> = {
            let map = self.handlers.lock();
            map.get(event)
                .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(data.clone());
        }
    }

    /// Simulates losing the relay session: connectivity goes false, then
    /// the synthetic disconnect fires.
    pub fn drop_link(&self) {
        self.set_connected(false);
        self.inject(events::DISCONNECT, Value::Null);
    }

    /// Simulates a (re)established session.
    pub fn restore_link(&self) {
        self.set_connected(true);
        self.inject(events::CONNECT, Value::Null);
    }

    /// Everything emitted so far, oldest first
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().clone()
    }

    /// Emitted payloads for one event name, oldest first
    pub fn sent_for(&self, event: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Replay entries currently registered, in insertion order
    pub fn replays(&self) -> Vec<(String, Value)> {
        self.replays
            .lock()
            .iter()
            .map(|(_, event, data)| (event.clone(), data.clone()))
            .collect()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl RelayLink for FakeRelay {
    fn identity(&self) -> Option<String> {
        Some("operator-1".to_string())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: &str, data: Value) -> RelayResult<()> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        self.sent.lock().push((event.to_string(), data));
        Ok(())
    }

    fn on(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn off(&self, id: SubscriptionId) -> bool {
        let mut map = self.handlers.lock();
        for entries in map.values_mut() {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.len() != before {
                return true;
            }
        }
        false
    }

    fn add_replay(&self, event: &str, data: Value) -> ReplayId {
        let id = ReplayId::new();
        self.replays.lock().push((id, event.to_string(), data));
        id
    }

    fn remove_replay(&self, id: ReplayId) -> bool {
        let mut replays = self.replays.lock();
        let before = replays.len();
        replays.retain(|(entry_id, _, _)| *entry_id != id);
        replays.len() != before
    }
}

/// Capture device double; tests keep the [`Arc`] and assert on it after the
/// client received its handle.
pub struct MockCapture {
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl MockCapture {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct CaptureHandleProxy(Arc<MockCapture>);

#[async_trait]
impl CaptureHandle for CaptureHandleProxy {
    fn set_enabled(&self, enabled: bool) {
        self.0.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.0.is_enabled()
    }

    async fn stop(&self) {
        self.0.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.0.is_stopped()
    }
}

/// Peer session double; its event sender lets tests deliver candidates and
/// remote tracks the way an engine would.
pub struct MockPeer {
    fail_answer: bool,
    fail_candidates: bool,
    answered: AtomicBool,
    closed: AtomicBool,
    candidates: Mutex<Vec<IceCandidate>>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl MockPeer {
    /// Pushes a session event into the owning call's driver
    pub fn push_event(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    pub fn answer_applied(&self) -> bool {
        self.answered.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remote candidates applied so far
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }
}

struct PeerSessionProxy(Arc<MockPeer>);

#[async_trait]
impl PeerSession for PeerSessionProxy {
    async fn create_offer(&self) -> ClientResult<SessionDescription> {
        Ok(SessionDescription::offer("v=0 mock-offer"))
    }

    async fn apply_answer(&self, _answer: SessionDescription) -> ClientResult<()> {
        if self.0.fail_answer {
            return Err(ClientError::negotiation("answer rejected by the engine"));
        }
        self.0.answered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> ClientResult<()> {
        if self.0.fail_candidates {
            return Err(ClientError::negotiation("candidate rejected by the engine"));
        }
        self.0.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Scriptable [`MediaEngine`]: denials and failures are armed up front,
/// created captures and peers stay inspectable afterwards.
pub struct MockMediaEngine {
    deny_capture: AtomicBool,
    fail_offer: AtomicBool,
    fail_answer: AtomicBool,
    fail_candidates: AtomicBool,
    capture_gate: Mutex<Option<Arc<Notify>>>,
    captures: Mutex<Vec<Arc<MockCapture>>>,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockMediaEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            deny_capture: AtomicBool::new(false),
            fail_offer: AtomicBool::new(false),
            fail_answer: AtomicBool::new(false),
            fail_candidates: AtomicBool::new(false),
            capture_gate: Mutex::new(None),
            captures: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Deny capture acquisition like a user rejecting the permission prompt
    pub fn deny_capture(&self) {
        self.deny_capture.store(true, Ordering::SeqCst);
    }

    /// Grant capture again after a denial
    pub fn allow_capture(&self) {
        self.deny_capture.store(false, Ordering::SeqCst);
    }

    pub fn fail_offer(&self) {
        self.fail_offer.store(true, Ordering::SeqCst);
    }

    pub fn fail_answer(&self) {
        self.fail_answer.store(true, Ordering::SeqCst);
    }

    pub fn fail_candidates(&self) {
        self.fail_candidates.store(true, Ordering::SeqCst);
    }

    /// Holds the next capture acquisition until the returned [`Notify`]
    /// fires, so a test can act while the client is mid-acquisition.
    pub fn gate_capture(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.capture_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn last_capture(&self) -> Option<Arc<MockCapture>> {
        self.captures.lock().last().cloned()
    }

    pub fn last_peer(&self) -> Option<Arc<MockPeer>> {
        self.peers.lock().last().cloned()
    }

    pub fn capture_count(&self) -> usize {
        self.captures.lock().len()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn open_capture(&self) -> ClientResult<Box<dyn CaptureHandle>> {
        let gate = self.capture_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.deny_capture.load(Ordering::SeqCst) {
            return Err(ClientError::media_access_denied("Permission denied"));
        }
        let capture = MockCapture::new();
        self.captures.lock().push(capture.clone());
        Ok(Box::new(CaptureHandleProxy(capture)))
    }

    async fn create_peer(
        &self,
        _ice_servers: &[IceServer],
        _capture: &dyn CaptureHandle,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> ClientResult<Box<dyn PeerSession>> {
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(ClientError::negotiation("peer construction failed"));
        }
        let peer = Arc::new(MockPeer {
            fail_answer: self.fail_answer.load(Ordering::SeqCst),
            fail_candidates: self.fail_candidates.load(Ordering::SeqCst),
            answered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            candidates: Mutex::new(Vec::new()),
            events,
        });
        self.peers.lock().push(peer.clone());
        Ok(Box::new(PeerSessionProxy(peer)))
    }
}

/// Canned [`HistoryApi`] with a failure switch
pub struct StubHistory {
    messages: Mutex<HashMap<String, Vec<ChatMessage>>>,
    unread: Mutex<HashMap<String, usize>>,
    fail: AtomicBool,
}

impl StubHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(HashMap::new()),
            unread: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn put_messages(&self, room_id: &str, messages: Vec<ChatMessage>) {
        self.messages.lock().insert(room_id.to_string(), messages);
    }

    pub fn put_unread(&self, room_id: &str, count: usize) {
        self.unread.lock().insert(room_id.to_string(), count);
    }

    /// Makes every request fail like an unreachable service
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl HistoryApi for StubHistory {
    async fn fetch_messages(&self, room_id: &str) -> ClientResult<Vec<ChatMessage>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::history("history service unavailable"));
        }
        Ok(self.messages.lock().get(room_id).cloned().unwrap_or_default())
    }

    async fn unread_count(&self, room_id: &str) -> ClientResult<usize> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::history("history service unavailable"));
        }
        Ok(self.unread.lock().get(room_id).copied().unwrap_or(0))
    }
}

/// Call client wired to the fakes with the default operator profile
pub fn call_client(relay: Arc<FakeRelay>, engine: Arc<MockMediaEngine>) -> CallClient {
    CallClient::new(
        relay,
        engine,
        CallConfig::new(OperatorProfile::new("operator-1", "Maria")),
    )
}

/// Chat client wired to the fakes with the default operator profile
pub fn chat_client(relay: Arc<FakeRelay>, history: Arc<StubHistory>) -> ChatClient {
    ChatClient::new(relay, history, OperatorProfile::new("operator-1", "Maria"))
}

/// A customer-sent message in room `room_id`
pub fn customer_message(id: &str, room_id: &str, text: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        room_id: room_id.to_string(),
        sender_id: format!("customer-{room_id}"),
        sender_name: "Alex".to_string(),
        sender_role: PartyRole::Customer,
        text: text.to_string(),
        created_at: Utc::now(),
        read: false,
    }
}

/// An operator-sent message in room `room_id`
pub fn operator_message(id: &str, room_id: &str, text: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        room_id: room_id.to_string(),
        sender_id: "operator-1".to_string(),
        sender_name: "Maria".to_string(),
        sender_role: PartyRole::Operator,
        text: text.to_string(),
        created_at: Utc::now(),
        read: false,
    }
}

/// Receives the next event or panics after a second. Under a paused clock
/// time only advances once every task is idle, so pending driver work is
/// always drained first.
pub async fn next_event<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Asserts nothing is pending on the event channel right now
pub fn assert_no_event<T: Clone + std::fmt::Debug>(rx: &mut broadcast::Receiver<T>) {
    match rx.try_recv() {
        Err(broadcast::error::TryRecvError::Empty) => {}
        other => panic!("expected no pending event, got {other:?}"),
    }
}

/// Lets spawned tasks (drivers, forwarders) run to their next await point
pub async fn drain_tasks() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
