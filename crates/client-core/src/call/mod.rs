//! Outbound call sessions
//!
//! One [`CallClient`] drives at most one call at a time: it places the
//! offer over the relay, negotiates the media session through the
//! configured [`MediaEngine`](crate::media::MediaEngine), and publishes
//! progress as [`CallEvent`]s. See [`manager`] for construction and
//! lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod manager;
mod negotiator;

pub use manager::CallClient;

/// Unique identifier for a call attempt
pub type CallId = Uuid;

/// Externally observable state of the call slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// No call in progress
    Idle,
    /// Offer placed (or being placed), waiting for the customer
    Calling,
    /// Answer applied, media session established
    Connected,
    /// Terminal record state; the slot itself rests at [`Idle`](Self::Idle)
    Ended,
}

impl CallState {
    /// True while a call occupies the slot
    pub fn is_in_progress(&self) -> bool {
        matches!(self, CallState::Calling | CallState::Connected)
    }

    /// True for the terminal record state
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "Idle"),
            CallState::Calling => write!(f, "Calling"),
            CallState::Connected => write!(f, "Connected"),
            CallState::Ended => write!(f, "Ended"),
        }
    }
}

/// Why a call attempt reached its end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Ended locally by the operator
    Hangup,
    /// Ended by the remote party after the offer was delivered
    Remote,
    /// The customer declined the offer
    Rejected,
    /// The relay reported the customer unreachable
    Offline,
    /// Nobody answered within the configured ring timeout
    RingTimeout,
    /// The signaling transport dropped while the call was up
    TransportLost,
    /// Offer/answer processing failed
    Negotiation,
}

impl fmt::Display for EndReason {
    /// Status line shown in the console
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EndReason::Hangup | EndReason::Remote => "Call ended",
            EndReason::Rejected => "Call rejected",
            EndReason::Offline => "Customer is offline",
            EndReason::RingTimeout => "Call not answered",
            EndReason::TransportLost => "Connection lost",
            EndReason::Negotiation => "Call setup failed",
        };
        write!(f, "{text}")
    }
}

/// Snapshot of one call attempt
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call_id: CallId,
    pub state: CallState,
    pub local_identity: String,
    pub remote_identity: String,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl CallInfo {
    /// Talk time for display; `None` until the call has connected
    pub fn duration(&self) -> Option<chrono::Duration> {
        let connected = self.connected_at?;
        Some(self.ended_at.unwrap_or_else(Utc::now) - connected)
    }
}

/// Notifications published by [`CallClient`].
///
/// Every attempt produces exactly one terminal event, one of `Rejected`,
/// `UserOffline` or `Ended`; a successful attempt emits `Connected` before
/// its eventual `Ended`.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The customer answered and the media session is up
    Connected { call_id: CallId },
    /// The customer declined the offer
    Rejected { call_id: CallId },
    /// The relay reported the customer unreachable
    UserOffline { call_id: CallId },
    /// The attempt is over; the slot is idle again
    Ended { call_id: CallId, reason: EndReason },
    /// A remote media stream is ready to be rendered
    RemoteStream { call_id: CallId, stream_id: String },
}

impl CallEvent {
    pub fn call_id(&self) -> CallId {
        match self {
            CallEvent::Connected { call_id }
            | CallEvent::Rejected { call_id }
            | CallEvent::UserOffline { call_id }
            | CallEvent::Ended { call_id, .. }
            | CallEvent::RemoteStream { call_id, .. } => *call_id,
        }
    }
}
