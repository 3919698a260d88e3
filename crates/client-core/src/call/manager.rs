//! Call client construction and lifecycle
//!
//! The manager owns the call slot, the relay subscriptions and the driver
//! task that serializes every state transition. The operations themselves
//! (placing, ending, muting) live in the negotiator module.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use deskline_relay_transport::{RelayLink, SubscriptionId, events};

use crate::call::{CallEvent, CallId, CallInfo, CallState, EndReason};
use crate::config::CallConfig;
use crate::media::{
    CaptureHandle, IceCandidate, MediaEngine, PeerEvent, PeerSession, SessionDescription,
};
use crate::signal::event::{
    CALL_ANSWERED, CALL_ENDED, CALL_ICE_CANDIDATE, CALL_REJECTED, CALL_USER_OFFLINE,
};
use crate::signal::{AnswerPayload, RemoteCandidatePayload, on_payload, on_signal};

const EVENT_CAPACITY: usize = 64;

/// Inbound signals serialized through the driver task
pub(crate) enum CallSignal {
    Answered(SessionDescription),
    Rejected,
    UserOffline,
    RemoteEnded,
    RemoteCandidate(IceCandidate),
    TransportDown,
    Peer { attempt: CallId, event: PeerEvent },
    RingTimeout { attempt: CallId },
}

/// A call being dialed: media acquisition is still in flight
pub(crate) struct DialingCall {
    pub(crate) attempt: CallId,
    pub(crate) remote: String,
    pub(crate) started_at: DateTime<Utc>,
}

/// A call with live media resources
pub(crate) struct ActiveCall {
    pub(crate) attempt: CallId,
    pub(crate) remote: String,
    /// `Calling` until the answer is applied, then `Connected`
    pub(crate) phase: CallState,
    pub(crate) capture: Box<dyn CaptureHandle>,
    pub(crate) peer: Box<dyn PeerSession>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) connected_at: Option<DateTime<Utc>>,
    /// Pumps peer events into the driver, tagged with the attempt id
    pub(crate) forwarder: JoinHandle<()>,
}

/// The single call slot; at most one attempt owns it at a time
pub(crate) enum CallSlot {
    Idle,
    Dialing(DialingCall),
    Active(ActiveCall),
}

impl CallSlot {
    pub(crate) fn state(&self) -> CallState {
        match self {
            CallSlot::Idle => CallState::Idle,
            CallSlot::Dialing(_) => CallState::Calling,
            CallSlot::Active(call) => call.phase,
        }
    }
}

/// Client for operator-initiated calls.
///
/// Cheap to clone; clones share the same call slot. One client per relay
/// connection: the single-call-at-a-time guarantee is per connection.
#[derive(Clone)]
pub struct CallClient {
    pub(crate) inner: Arc<CallInner>,
}

pub(crate) struct CallInner {
    pub(crate) relay: Arc<dyn RelayLink>,
    pub(crate) engine: Arc<dyn MediaEngine>,
    pub(crate) config: CallConfig,
    pub(crate) slot: Mutex<CallSlot>,
    pub(crate) last_call: SyncMutex<Option<CallInfo>>,
    pub(crate) events_tx: broadcast::Sender<CallEvent>,
    pub(crate) signals_tx: mpsc::UnboundedSender<CallSignal>,
    subscriptions: SyncMutex<Vec<SubscriptionId>>,
    driver: SyncMutex<Option<JoinHandle<()>>>,
}

impl CallClient {
    /// Creates a client on `relay`, subscribing to the `call:*` events
    /// and the transport's disconnect notification.
    pub fn new(
        relay: Arc<dyn RelayLink>,
        engine: Arc<dyn MediaEngine>,
        config: CallConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (signals_tx, mut signals_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(CallInner {
            relay,
            engine,
            config,
            slot: Mutex::new(CallSlot::Idle),
            last_call: SyncMutex::new(None),
            events_tx,
            signals_tx,
            subscriptions: SyncMutex::new(Vec::new()),
            driver: SyncMutex::new(None),
        });

        let subs = vec![
            on_payload::<AnswerPayload, _>(&inner.relay, CALL_ANSWERED, &inner.signals_tx, |p| {
                CallSignal::Answered(p.answer)
            }),
            on_payload::<RemoteCandidatePayload, _>(
                &inner.relay,
                CALL_ICE_CANDIDATE,
                &inner.signals_tx,
                |p| CallSignal::RemoteCandidate(p.candidate),
            ),
            on_signal(&inner.relay, CALL_REJECTED, &inner.signals_tx, || {
                CallSignal::Rejected
            }),
            on_signal(&inner.relay, CALL_USER_OFFLINE, &inner.signals_tx, || {
                CallSignal::UserOffline
            }),
            on_signal(&inner.relay, CALL_ENDED, &inner.signals_tx, || {
                CallSignal::RemoteEnded
            }),
            on_signal(&inner.relay, events::DISCONNECT, &inner.signals_tx, || {
                CallSignal::TransportDown
            }),
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

    /// Stream of call events; every subscriber sees every event
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Current state of the call slot
    pub async fn state(&self) -> CallState {
        self.inner.slot.lock().await.state()
    }

    /// Snapshot of the in-progress call, if any
    pub async fn current_call(&self) -> Option<CallInfo> {
        let slot = self.inner.slot.lock().await;
        match &*slot {
            CallSlot::Idle => None,
            CallSlot::Dialing(dialing) => Some(CallInfo {
                call_id: dialing.attempt,
                state: CallState::Calling,
                local_identity: self.inner.config.operator.id.clone(),
                remote_identity: dialing.remote.clone(),
                started_at: dialing.started_at,
                connected_at: None,
                ended_at: None,
                end_reason: None,
            }),
            CallSlot::Active(call) => Some(CallInfo {
                call_id: call.attempt,
                state: call.phase,
                local_identity: self.inner.config.operator.id.clone(),
                remote_identity: call.remote.clone(),
                started_at: call.started_at,
                connected_at: call.connected_at,
                ended_at: None,
                end_reason: None,
            }),
        }
    }

    /// Record of the most recently ended call
    pub fn last_call(&self) -> Option<CallInfo> {
        self.inner.last_call.lock().clone()
    }

    /// Ends any in-progress call, detaches from the relay and stops the
    /// driver. The client must not be used afterwards.
    pub async fn shutdown(&self) {
        let _ = self.end_call().await;
        let subs: Vec<SubscriptionId> = self.inner.subscriptions.lock().drain(..).collect();
        for id in subs {
            self.inner.relay.off(id);
        }
        if let Some(driver) = self.inner.driver.lock().take() {
            driver.abort();
        }
        info!("Call client shut down");
    }
}

impl CallInner {
    pub(crate) fn publish(&self, event: CallEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    pub(crate) async fn still_dialing(&self, attempt: CallId) -> bool {
        matches!(&*self.slot.lock().await, CallSlot::Dialing(d) if d.attempt == attempt)
    }

    /// Returns the slot to idle if `attempt` is still dialing.
    pub(crate) async fn abandon_dialing(&self, attempt: CallId) {
        let mut slot = self.slot.lock().await;
        if matches!(&*slot, CallSlot::Dialing(d) if d.attempt == attempt) {
            *slot = CallSlot::Idle;
        }
    }

    /// Takes the active call out of the slot when `attempt` still owns
    /// it. The caller that receives the call is responsible for closing
    /// it; everyone else sees an idle slot from this point on.
    pub(crate) async fn take_active(&self, attempt: CallId) -> Option<ActiveCall> {
        let mut slot = self.slot.lock().await;
        if !matches!(&*slot, CallSlot::Active(call) if call.attempt == attempt) {
            return None;
        }
        match std::mem::replace(&mut *slot, CallSlot::Idle) {
            CallSlot::Active(call) => Some(call),
            _ => None,
        }
    }

    /// Stores the terminal record for an attempt.
    pub(crate) fn record_ended(
        &self,
        call_id: CallId,
        remote_identity: String,
        started_at: DateTime<Utc>,
        connected_at: Option<DateTime<Utc>>,
        reason: EndReason,
    ) -> CallInfo {
        let info = CallInfo {
            call_id,
            state: CallState::Ended,
            local_identity: self.config.operator.id.clone(),
            remote_identity,
            started_at,
            connected_at,
            ended_at: Some(Utc::now()),
            end_reason: Some(reason),
        };
        *self.last_call.lock() = Some(info.clone());
        info
    }

    /// Releases an active call's resources and records its final state.
    /// Runs on every exit edge, whatever the reason.
    pub(crate) async fn close_active(&self, call: ActiveCall, reason: EndReason) -> CallInfo {
        call.forwarder.abort();
        call.peer.close().await;
        call.capture.stop().await;
        self.record_ended(
            call.attempt,
            call.remote,
            call.started_at,
            call.connected_at,
            reason,
        )
    }
}
