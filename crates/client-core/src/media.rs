//! Media seams: capture devices and peer transports
//!
//! The session clients never touch capture hardware or a WebRTC stack
//! directly; they drive the traits below. A production binding implements
//! them over the platform media engine, tests use inspectable mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ClientResult;

/// SDP type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description as carried in signaling payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Answer, sdp: sdp.into() }
    }
}

/// A trickle ICE candidate in standard `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

/// STUN/TURN server entry handed to every peer session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Public STUN defaults used when no servers are configured
    pub fn default_stun() -> Vec<IceServer> {
        vec![IceServer {
            urls: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            username: None,
            credential: None,
        }]
    }
}

/// Events a live peer session pushes back to the call driver
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local ICE candidate ready to be relayed to the remote party
    LocalCandidate(IceCandidate),
    /// A remote media stream became available for rendering
    RemoteTrack { stream_id: String },
}

/// Handle to an acquired local capture device (microphone).
///
/// The owning call holds exactly one of these for its lifetime and must
/// call [`stop`](Self::stop) on every exit path.
#[async_trait]
pub trait CaptureHandle: Send + Sync {
    /// Toggle whether captured audio is fed to the peer session
    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Stop all tracks and release the device. Idempotent.
    async fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// Handle to a peer media transport under negotiation or connected
#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn create_offer(&self) -> ClientResult<SessionDescription>;

    async fn apply_answer(&self, answer: SessionDescription) -> ClientResult<()>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> ClientResult<()>;

    /// Tear the transport down. Idempotent.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Factory for capture devices and peer sessions
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Acquire the local microphone.
    ///
    /// Denied or missing devices surface as
    /// [`ClientError::MediaAccessDenied`](crate::error::ClientError::MediaAccessDenied).
    async fn open_capture(&self) -> ClientResult<Box<dyn CaptureHandle>>;

    /// Create a peer transport with `capture`'s tracks attached, pushing
    /// session events into `events`.
    async fn create_peer(
        &self,
        ice_servers: &[IceServer],
        capture: &dyn CaptureHandle,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> ClientResult<Box<dyn PeerSession>>;
}
