//! WebSocket relay connection with automatic reconnect
//!
//! The connection is passive until [`RelayConnection::connect`] is called,
//! then keeps a session open to the relay until
//! [`RelayConnection::disconnect`]: it dials, registers the caller's
//! identity, replays any registered frames, and pumps events in both
//! directions. When the session drops it redials with exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::relay::{EventHandler, REGISTER_EVENT, RelayLink, ReplayId, SubscriptionId, events};

// Default reconnect delays, doubled per attempt between these bounds
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for [`RelayConnection`]
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay endpoint, e.g. `wss://relay.example.com/socket`
    pub url: Url,
    /// First reconnect delay
    pub initial_backoff: Duration,
    /// Reconnect delay ceiling
    pub max_backoff: Duration,
}

impl RelayConfig {
    /// Creates a config with default backoff bounds
    pub fn new(url: Url) -> Self {
        Self {
            url,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Set the reconnect backoff bounds
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

/// A reconnecting, identity-registered relay connection.
///
/// Cheap to clone; all clones share the same underlying session. A started
/// connection loop runs until [`disconnect`](Self::disconnect); dropping
/// the handles does not stop it.
#[derive(Clone)]
pub struct RelayConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: RelayConfig,
    connected: AtomicBool,
    identity: RwLock<Option<String>>,
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    replays: RwLock<Vec<(ReplayId, Frame)>>,
    /// Sender into the live session's write pump, when one exists
    outbound: RwLock<Option<mpsc::UnboundedSender<Frame>>>,
    /// Cancels the connection loop; present while a loop is running
    cancel: RwLock<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped each time a new connection loop is spawned
    generation: AtomicU64,
}

impl RelayConnection {
    /// Creates a connection in the disconnected state; no I/O happens
    /// until [`connect`](Self::connect).
    pub fn new(config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connected: AtomicBool::new(false),
                identity: RwLock::new(None),
                handlers: RwLock::new(HashMap::new()),
                replays: RwLock::new(Vec::new()),
                outbound: RwLock::new(None),
                cancel: RwLock::new(None),
                task: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Registers `identity` and starts the connection loop.
    ///
    /// Never fails synchronously and is idempotent: calling again with the
    /// same identity is a no-op, calling with a new identity re-registers
    /// on the live session. Establishment failures surface as the absence
    /// of a `connect` event while the loop retries in the background.
    pub fn connect(&self, identity: &str) {
        let changed = {
            let mut current = self.inner.identity.write();
            let changed = current.as_deref() != Some(identity);
            if changed {
                *current = Some(identity.to_string());
            }
            changed
        };

        let spawn = {
            let mut cancel = self.inner.cancel.write();
            if cancel.is_some() {
                None
            } else {
                let token = CancellationToken::new();
                *cancel = Some(token.clone());
                Some(token)
            }
        };

        match spawn {
            Some(token) => {
                info!(
                    "Starting relay connection to {} as {}",
                    self.inner.config.url, identity
                );
                let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let inner = self.inner.clone();
                let handle = tokio::spawn(async move { inner.run(generation, token).await });
                *self.inner.task.lock() = Some(handle);
            }
            None if changed && self.inner.connected.load(Ordering::SeqCst) => {
                debug!("Re-registering on relay as {}", identity);
                let _ = self
                    .inner
                    .queue(Frame::new(REGISTER_EVENT, Value::String(identity.to_string())));
            }
            None => {}
        }
    }

    /// Stops the connection loop, clearing the registered identity and all
    /// replay entries. Event handlers stay registered. Safe to call more
    /// than once.
    pub async fn disconnect(&self) {
        let token = self.inner.cancel.write().take();
        let Some(token) = token else {
            return;
        };
        info!("Disconnecting from relay {}", self.inner.config.url);
        *self.inner.identity.write() = None;
        self.inner.replays.write().clear();
        token.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let mut backoff = self.config.initial_backoff;
        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => break,
                result = connect_async(self.config.url.as_str()) => result,
            };

            match attempt {
                Ok((stream, _response)) => {
                    info!("Relay connection established to {}", self.config.url);
                    backoff = self.config.initial_backoff;
                    self.session(stream, &cancel).await;
                    // A newer loop may already own the connection state.
                    if self.generation.load(Ordering::SeqCst) == generation {
                        self.connected.store(false, Ordering::SeqCst);
                        *self.outbound.write() = None;
                        self.dispatch(events::DISCONNECT, Value::Null);
                    }
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!("Relay connection to {} lost", self.config.url);
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!("Relay connection to {} failed: {}", self.config.url, e);
                }
            }

            let delay = jitter(backoff);
            debug!("Retrying relay connection in {:?}", delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
        debug!("Relay connection loop stopped");
    }

    /// Runs one established session until it ends or the loop is cancelled.
    async fn session(&self, stream: WsStream, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

        // Registration and replay entries go out before anything else.
        let identity = self.identity.read().clone();
        let Some(identity) = identity else {
            // disconnect() raced the dial
            return;
        };
        let _ = tx.send(Frame::new(REGISTER_EVENT, Value::String(identity)));
        for (_, frame) in self.replays.read().iter() {
            let _ = tx.send(frame.clone());
        }

        *self.outbound.write() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        self.dispatch(events::CONNECT, Value::Null);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                queued = rx.recv() => {
                    let Some(frame) = queued else { break };
                    let text = match frame.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Dropping unencodable frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::text(text)).await {
                        warn!("Relay send failed: {}", e);
                        break;
                    }
                }
                incoming = source.next() => {
                    match incoming {
                        Some(Ok(message)) => self.handle_message(message),
                        Some(Err(e)) => {
                            warn!("Relay read failed: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    fn handle_message(&self, message: Message) {
        match message {
            Message::Text(text) => match Frame::decode(text.as_str()) {
                Ok(frame) => {
                    debug!("Relay event '{}' received", frame.event);
                    self.dispatch(&frame.event, frame.data);
                }
                Err(e) => warn!("Ignoring malformed relay frame: {}", e),
            },
            Message::Close(_) => debug!("Relay sent close"),
            // Ping/pong are answered by the protocol layer
            _ => {}
        }
    }

    fn dispatch(&self, event: &str, data: Value) {
        let matched: Vec<EventHandler> = {
            let handlers = self.handlers.read();
            match handlers.get(event) {
                Some(list) => list.iter().map(|(_, handler)| handler.clone()).collect(),
                None => Vec::new(),
            }
        };
        for handler in matched {
            handler(data.clone());
        }
    }

    fn queue(&self, frame: Frame) -> Result<()> {
        let outbound = self.outbound.read();
        match outbound.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| Error::ConnectionClosed),
            None => Err(Error::NotConnected),
        }
    }
}

#[async_trait]
impl RelayLink for RelayConnection {
    fn identity(&self) -> Option<String> {
        self.inner.identity.read().clone()
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: &str, data: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        debug!("Relay event '{}' queued", event);
        self.inner.queue(Frame::new(event, data))
    }

    fn on(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.inner
            .handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    fn add_replay(&self, event: &str, data: Value) -> ReplayId {
        let id = ReplayId::new();
        self.inner.replays.write().push((id, Frame::new(event, data)));
        id
    }

    fn remove_replay(&self, id: ReplayId) -> bool {
        let mut replays = self.inner.replays.write();
        let before = replays.len();
        replays.retain(|(rid, _)| *rid != id);
        replays.len() != before
    }
}

fn jitter(base: Duration) -> Duration {
    // +-50% so a fleet of consoles does not redial in lockstep
    let mut rng = rand::thread_rng();
    base.mul_f64(rng.gen_range(0.5..1.5))
}
