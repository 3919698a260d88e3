//! Call placement, teardown and the driver's transition handling
//!
//! `start_call` runs on the caller's task and owns resource acquisition;
//! everything the relay or the peer session signals back is handled by the
//! driver task owned by [`manager`](super::manager), one signal at a time.
//! The call slot is the synchronization point between the two sides: a task
//! may only act on a call while the slot still carries its attempt id, so
//! whichever task takes the slot first wins the teardown and everyone else
//! backs off.

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::manager::{ActiveCall, CallClient, CallInner, CallSignal, CallSlot, DialingCall};
use crate::call::{CallEvent, CallId, CallState, EndReason};
use crate::error::{ClientError, ClientResult};
use crate::media::{IceCandidate, PeerEvent, SessionDescription};
use crate::signal::event::{CALL_END, CALL_ICE_CANDIDATE, CALL_OFFER};
use crate::signal::{EndPayload, IceCandidatePayload, OfferPayload, emit_json};

impl CallClient {
    /// Places a call to `remote_identity`.
    ///
    /// Acquires the microphone, creates a peer session, and sends the offer
    /// over the relay, leaving the call in [`CallState::Calling`] until the
    /// remote side responds. Requires a connected relay and an idle slot.
    ///
    /// Fails with [`ClientError::MediaAccessDenied`] when the capture
    /// device is unavailable (the slot returns to idle), and with
    /// [`ClientError::CallCancelled`] when [`end_call`](Self::end_call) or
    /// a transport drop vacates the slot while setup is still in flight;
    /// any resources acquired by then are released before returning.
    pub async fn start_call(&self, remote_identity: impl Into<String>) -> ClientResult<CallId> {
        let inner = &self.inner;
        let remote = remote_identity.into();

        if !inner.relay.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let attempt = CallId::new_v4();
        let started_at = Utc::now();
        {
            let mut slot = inner.slot.lock().await;
            match &*slot {
                CallSlot::Idle => {
                    *slot = CallSlot::Dialing(DialingCall {
                        attempt,
                        remote: remote.clone(),
                        started_at,
                    });
                }
                busy => {
                    return Err(ClientError::invalid_call_state("Idle", busy.state().to_string()));
                }
            }
        }
        info!("Placing call {} to {}", attempt, remote);

        // First suspension point: the microphone. The slot can change hands
        // while we wait, so every await below re-checks ownership before
        // binding anything to the attempt.
        let capture = match inner.engine.open_capture().await {
            Ok(capture) => capture,
            Err(e) => {
                warn!("Capture acquisition for call {} failed: {}", attempt, e);
                inner.abandon_dialing(attempt).await;
                return Err(e);
            }
        };
        if !inner.still_dialing(attempt).await {
            capture.stop().await;
            return Err(ClientError::CallCancelled);
        }

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let peer = match inner
            .engine
            .create_peer(&inner.config.ice_servers, capture.as_ref(), peer_tx)
            .await
        {
            Ok(peer) => peer,
            Err(e) => {
                warn!("Peer session for call {} failed: {}", attempt, e);
                capture.stop().await;
                inner.abandon_dialing(attempt).await;
                return Err(e);
            }
        };
        if !inner.still_dialing(attempt).await {
            peer.close().await;
            capture.stop().await;
            return Err(ClientError::CallCancelled);
        }

        let offer = match peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Offer creation for call {} failed: {}", attempt, e);
                peer.close().await;
                capture.stop().await;
                inner.abandon_dialing(attempt).await;
                return Err(e);
            }
        };

        // Bind the resources to the slot, unless the attempt was cancelled
        // while we negotiated.
        let forwarder = spawn_peer_forwarder(attempt, peer_rx, inner.signals_tx.clone());
        {
            let mut slot = inner.slot.lock().await;
            if !matches!(&*slot, CallSlot::Dialing(d) if d.attempt == attempt) {
                drop(slot);
                forwarder.abort();
                peer.close().await;
                capture.stop().await;
                return Err(ClientError::CallCancelled);
            }
            *slot = CallSlot::Active(ActiveCall {
                attempt,
                remote: remote.clone(),
                phase: CallState::Calling,
                capture,
                peer,
                started_at,
                connected_at: None,
                forwarder,
            });
        }

        if let Some(timeout) = inner.config.ring_timeout {
            let signals = inner.signals_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                // Ignored by the driver unless the attempt is still ringing
                let _ = signals.send(CallSignal::RingTimeout { attempt });
            });
        }

        let payload = OfferPayload {
            to: remote.clone(),
            offer,
            from: inner.config.operator.id.clone(),
            caller_name: inner.config.operator.display_name.clone(),
        };
        if let Err(e) = emit_json(&inner.relay, CALL_OFFER, &payload).await {
            warn!("Offer for call {} could not be sent: {}", attempt, e);
            if let Some(call) = inner.take_active(attempt).await {
                inner.close_active(call, EndReason::TransportLost).await;
            }
            return Err(e);
        }
        info!("Offer for call {} sent to {}", attempt, remote);

        Ok(attempt)
    }

    /// Ends the in-progress call, if any.
    ///
    /// Emits a best-effort `call:end` to the remote party, releases the
    /// capture device and peer session, records the attempt with
    /// [`EndReason::Hangup`] and publishes [`CallEvent::Ended`]. Calling
    /// this with an idle slot is a no-op, so it is always safe to invoke.
    pub async fn end_call(&self) -> ClientResult<()> {
        let inner = &self.inner;
        let mut slot = inner.slot.lock().await;
        match std::mem::replace(&mut *slot, CallSlot::Idle) {
            CallSlot::Idle => Ok(()),
            CallSlot::Dialing(dialing) => {
                drop(slot);
                // The in-flight start_call still owns whatever it acquired;
                // its ownership re-check releases it and returns CallCancelled.
                info!("Ending call {} while still dialing", dialing.attempt);
                inner.send_end(&dialing.remote).await;
                let info = inner.record_ended(
                    dialing.attempt,
                    dialing.remote,
                    dialing.started_at,
                    None,
                    EndReason::Hangup,
                );
                inner.publish(CallEvent::Ended { call_id: info.call_id, reason: EndReason::Hangup });
                Ok(())
            }
            CallSlot::Active(call) => {
                drop(slot);
                info!("Ending call {} to {}", call.attempt, call.remote);
                inner.send_end(&call.remote).await;
                let info = inner.close_active(call, EndReason::Hangup).await;
                inner.publish(CallEvent::Ended { call_id: info.call_id, reason: EndReason::Hangup });
                Ok(())
            }
        }
    }

    /// Mutes or unmutes the local microphone.
    ///
    /// Purely local: toggles the capture handle without renegotiation or
    /// signaling. Fails with [`ClientError::InvalidCallState`] when no call
    /// holds the capture device.
    pub async fn set_muted(&self, muted: bool) -> ClientResult<()> {
        let slot = self.inner.slot.lock().await;
        match &*slot {
            CallSlot::Active(call) => {
                call.capture.set_enabled(!muted);
                debug!(
                    "Call {} microphone {}",
                    call.attempt,
                    if muted { "muted" } else { "live" }
                );
                Ok(())
            }
            other => Err(ClientError::invalid_call_state(
                "Calling or Connected",
                other.state().to_string(),
            )),
        }
    }

    /// True when the local microphone is muted
    pub async fn is_muted(&self) -> ClientResult<bool> {
        let slot = self.inner.slot.lock().await;
        match &*slot {
            CallSlot::Active(call) => Ok(!call.capture.is_enabled()),
            other => Err(ClientError::invalid_call_state(
                "Calling or Connected",
                other.state().to_string(),
            )),
        }
    }
}

impl CallInner {
    /// Driver entry point; signals arrive here one at a time.
    pub(crate) async fn handle(&self, signal: CallSignal) {
        match signal {
            CallSignal::Answered(answer) => self.on_answered(answer).await,
            CallSignal::Rejected => self.on_remote_terminal(EndReason::Rejected).await,
            CallSignal::UserOffline => self.on_remote_terminal(EndReason::Offline).await,
            CallSignal::RemoteEnded => self.on_remote_terminal(EndReason::Remote).await,
            CallSignal::RemoteCandidate(candidate) => self.on_remote_candidate(candidate).await,
            CallSignal::TransportDown => self.on_transport_down().await,
            CallSignal::Peer { attempt, event } => self.on_peer_event(attempt, event).await,
            CallSignal::RingTimeout { attempt } => self.on_ring_timeout(attempt).await,
        }
    }

    /// `call:answered` while ringing: apply the remote description and
    /// connect, or tear down when the answer cannot be applied.
    async fn on_answered(&self, answer: SessionDescription) {
        let mut slot = self.slot.lock().await;
        match &mut *slot {
            CallSlot::Active(call) if call.phase == CallState::Calling => {
                match call.peer.apply_answer(answer).await {
                    Ok(()) => {
                        call.phase = CallState::Connected;
                        call.connected_at = Some(Utc::now());
                        info!("Call {} to {} connected", call.attempt, call.remote);
                        let event = CallEvent::Connected { call_id: call.attempt };
                        drop(slot);
                        self.publish(event);
                    }
                    Err(e) => {
                        warn!("Answer for call {} could not be applied: {}", call.attempt, e);
                        let CallSlot::Active(call) = std::mem::replace(&mut *slot, CallSlot::Idle)
                        else {
                            return;
                        };
                        drop(slot);
                        let info = self.close_active(call, EndReason::Negotiation).await;
                        self.publish(CallEvent::Ended {
                            call_id: info.call_id,
                            reason: EndReason::Negotiation,
                        });
                    }
                }
            }
            CallSlot::Active(call) => {
                debug!("Ignoring duplicate 'answered' for call {}", call.attempt);
            }
            _ => debug!("Ignoring 'answered' with no pending offer"),
        }
    }

    /// `call:rejected`, `call:user-offline` and `call:ended`: a terminal
    /// notice from the remote side. Rejection and offline notices only
    /// answer a pending offer; a remote end is valid in either phase.
    async fn on_remote_terminal(&self, reason: EndReason) {
        let mut slot = self.slot.lock().await;
        let eligible = match (&*slot, reason) {
            (CallSlot::Active(call), EndReason::Rejected | EndReason::Offline) => {
                call.phase == CallState::Calling
            }
            (CallSlot::Active(_), _) => true,
            _ => false,
        };
        if !eligible {
            debug!("Ignoring stale remote '{:?}' signal", reason);
            return;
        }
        let CallSlot::Active(call) = std::mem::replace(&mut *slot, CallSlot::Idle) else {
            return;
        };
        drop(slot);

        let attempt = call.attempt;
        info!("Call {} to {} over: {}", attempt, call.remote, reason);
        self.close_active(call, reason).await;
        let event = match reason {
            EndReason::Rejected => CallEvent::Rejected { call_id: attempt },
            EndReason::Offline => CallEvent::UserOffline { call_id: attempt },
            _ => CallEvent::Ended { call_id: attempt, reason },
        };
        self.publish(event);
    }

    /// Remote trickle candidate: applied to the live peer session, dropped
    /// once the call is gone. An individual bad candidate does not end the
    /// call; the session can connect over the remaining paths.
    async fn on_remote_candidate(&self, candidate: IceCandidate) {
        let mut slot = self.slot.lock().await;
        match &mut *slot {
            CallSlot::Active(call) => {
                if let Err(e) = call.peer.add_remote_candidate(candidate).await {
                    warn!("Candidate for call {} not applied: {}", call.attempt, e);
                }
            }
            _ => debug!("Dropping remote candidate with no call in progress"),
        }
    }

    /// Relay connection lost: equivalent to a remote end, minus the wire
    /// notification nobody could deliver anyway.
    async fn on_transport_down(&self) {
        let mut slot = self.slot.lock().await;
        match std::mem::replace(&mut *slot, CallSlot::Idle) {
            CallSlot::Idle => {}
            CallSlot::Dialing(dialing) => {
                drop(slot);
                // start_call's ownership re-check reports CallCancelled to
                // the caller and releases anything acquired so far.
                warn!("Relay dropped while call {} was dialing", dialing.attempt);
            }
            CallSlot::Active(call) => {
                drop(slot);
                warn!("Relay dropped during call {} to {}", call.attempt, call.remote);
                let info = self.close_active(call, EndReason::TransportLost).await;
                self.publish(CallEvent::Ended {
                    call_id: info.call_id,
                    reason: EndReason::TransportLost,
                });
            }
        }
    }

    /// Events from the call's own peer session, tagged with the attempt id
    /// so a finished attempt's forwarder cannot touch its successor.
    async fn on_peer_event(&self, attempt: CallId, event: PeerEvent) {
        let remote = {
            let slot = self.slot.lock().await;
            match &*slot {
                CallSlot::Active(call) if call.attempt == attempt => call.remote.clone(),
                _ => {
                    debug!("Dropping peer event from finished attempt {}", attempt);
                    return;
                }
            }
        };
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let payload = IceCandidatePayload { to: remote, candidate };
                if let Err(e) = emit_json(&self.relay, CALL_ICE_CANDIDATE, &payload).await {
                    warn!("Local candidate for call {} not relayed: {}", attempt, e);
                }
            }
            PeerEvent::RemoteTrack { stream_id } => {
                info!("Remote stream {} available for call {}", stream_id, attempt);
                self.publish(CallEvent::RemoteStream { call_id: attempt, stream_id });
            }
        }
    }

    /// The ring timer fired; ends the attempt only if it is still ringing.
    async fn on_ring_timeout(&self, attempt: CallId) {
        let call = {
            let mut slot = self.slot.lock().await;
            let ringing = matches!(
                &*slot,
                CallSlot::Active(call) if call.attempt == attempt && call.phase == CallState::Calling
            );
            if !ringing {
                return;
            }
            let CallSlot::Active(call) = std::mem::replace(&mut *slot, CallSlot::Idle) else {
                return;
            };
            call
        };

        info!("Call {} to {} not answered in time", attempt, call.remote);
        self.send_end(&call.remote).await;
        let info = self.close_active(call, EndReason::RingTimeout).await;
        self.publish(CallEvent::Ended { call_id: info.call_id, reason: EndReason::RingTimeout });
    }

    /// Best-effort `call:end`; the relay may already be gone.
    async fn send_end(&self, remote: &str) {
        let payload = EndPayload { to: remote.to_string() };
        if let Err(e) = emit_json(&self.relay, CALL_END, &payload).await {
            debug!("Call end for {} not sent: {}", remote, e);
        }
    }
}

/// Pumps peer-session events into the driver, tagged with the attempt id.
/// Aborted at teardown; stale events that slip through are filtered by the
/// driver's ownership check.
fn spawn_peer_forwarder(
    attempt: CallId,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    signals: mpsc::UnboundedSender<CallSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if signals.send(CallSignal::Peer { attempt, event }).is_err() {
                break;
            }
        }
    })
}
