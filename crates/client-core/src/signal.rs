//! Wire events exchanged with the storefront relay
//!
//! Payload field names follow the relay's JSON contract (camelCase), so
//! every struct here is both the wire shape and the parsed form.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use deskline_relay_transport::{RelayLink, SubscriptionId};

use crate::chat::PartyRole;
use crate::error::{ClientError, ClientResult};
use crate::media::{IceCandidate, SessionDescription};

/// Event names carried in relay frames
pub mod event {
    pub const CALL_OFFER: &str = "call:offer";
    pub const CALL_ANSWERED: &str = "call:answered";
    pub const CALL_REJECTED: &str = "call:rejected";
    pub const CALL_ENDED: &str = "call:ended";
    pub const CALL_USER_OFFLINE: &str = "call:user-offline";
    pub const CALL_ICE_CANDIDATE: &str = "call:ice-candidate";
    pub const CALL_END: &str = "call:end";

    pub const CHAT_JOIN: &str = "chat:join";
    pub const CHAT_LEAVE: &str = "chat:leave";
    pub const CHAT_MESSAGE: &str = "chat:message";
    pub const CHAT_TYPING: &str = "chat:typing";
    pub const CHAT_READ: &str = "chat:read";
}

/// Role literal the relay and history service use for the console side in
/// read receipts and unread queries
pub const READER_ROLE_ADMIN: &str = "admin";

/// Outbound `call:offer`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub to: String,
    pub offer: SessionDescription,
    pub from: String,
    pub caller_name: String,
}

/// Inbound `call:answered`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub answer: SessionDescription,
}

/// Outbound `call:ice-candidate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub to: String,
    pub candidate: IceCandidate,
}

/// Inbound `call:ice-candidate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCandidatePayload {
    pub candidate: IceCandidate,
}

/// Outbound `call:end`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndPayload {
    pub to: String,
}

/// Outbound `chat:message`; the relay assigns `id` and `createdAt` and
/// echoes the full message back to the room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingChatMessage {
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: PartyRole,
    pub text: String,
}

/// `chat:typing`, both directions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub room_id: String,
    pub sender_name: String,
    pub is_typing: bool,
}

/// `chat:read`, both directions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPayload {
    pub room_id: String,
    pub reader_role: String,
}

/// Serializes `payload` and emits it on `relay`.
pub(crate) async fn emit_json<T: Serialize>(
    relay: &Arc<dyn RelayLink>,
    event: &str,
    payload: &T,
) -> ClientResult<()> {
    let data = serde_json::to_value(payload)
        .map_err(|e| ClientError::internal(format!("failed to encode '{event}' payload: {e}")))?;
    relay.emit(event, data).await?;
    Ok(())
}

/// Subscribes a parsing handler that forwards `event` payloads into a
/// driver channel. Malformed payloads are logged and dropped.
pub(crate) fn on_payload<T, I>(
    relay: &Arc<dyn RelayLink>,
    event: &str,
    tx: &mpsc::UnboundedSender<I>,
    map: fn(T) -> I,
) -> SubscriptionId
where
    T: DeserializeOwned + 'static,
    I: Send + 'static,
{
    let tx = tx.clone();
    let name = event.to_string();
    relay.on(
        event,
        Arc::new(move |data| match serde_json::from_value::<T>(data) {
            Ok(payload) => {
                let _ = tx.send(map(payload));
            }
            Err(e) => tracing::warn!("Ignoring malformed '{}' payload: {}", name, e),
        }),
    )
}

/// Subscribes a payload-free handler that forwards a marker into a driver
/// channel.
pub(crate) fn on_signal<I>(
    relay: &Arc<dyn RelayLink>,
    event: &str,
    tx: &mpsc::UnboundedSender<I>,
    make: fn() -> I,
) -> SubscriptionId
where
    I: Send + 'static,
{
    let tx = tx.clone();
    relay.on(
        event,
        Arc::new(move |_| {
            let _ = tx.send(make());
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deskline_relay_transport::{EventHandler, ReplayId, Result as RelayResult};
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    /// Link stub that hands registered handlers back to the test
    #[derive(Default)]
    struct HandlerTap {
        handlers: Mutex<Vec<(String, EventHandler)>>,
    }

    impl HandlerTap {
        fn fire(&self, event: &str, data: Value) {
            let handlers: Vec<EventHandler> = self
                .handlers
                .lock()
                .iter()
                .filter(|(name, _)| name == event)
                .map(|(_, handler)| handler.clone())
                .collect();
            for handler in handlers {
                handler(data.clone());
            }
        }
    }

    #[async_trait]
    impl RelayLink for HandlerTap {
        fn identity(&self) -> Option<String> {
            None
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn emit(&self, _event: &str, _data: Value) -> RelayResult<()> {
            Ok(())
        }

        fn on(&self, event: &str, handler: EventHandler) -> SubscriptionId {
            self.handlers.lock().push((event.to_string(), handler));
            SubscriptionId::new()
        }

        fn off(&self, _id: SubscriptionId) -> bool {
            false
        }

        fn add_replay(&self, _event: &str, _data: Value) -> ReplayId {
            ReplayId::new()
        }

        fn remove_replay(&self, _id: ReplayId) -> bool {
            false
        }
    }

    #[test]
    fn on_payload_parses_and_forwards() {
        let tap = Arc::new(HandlerTap::default());
        let relay: Arc<dyn RelayLink> = tap.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        on_payload::<TypingPayload, _>(&relay, event::CHAT_TYPING, &tx, |typing| {
            (typing.room_id, typing.is_typing)
        });

        tap.fire(
            event::CHAT_TYPING,
            json!({ "roomId": "7", "senderName": "Alex", "isTyping": true }),
        );
        assert_eq!(rx.try_recv().expect("forwarded"), ("7".to_string(), true));

        // Malformed payloads are dropped, not forwarded
        tap.fire(event::CHAT_TYPING, json!({ "bogus": 1 }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn offer_payload_matches_wire_contract() {
        let payload = OfferPayload {
            to: "customer-42".into(),
            offer: SessionDescription::offer("v=0"),
            from: "operator-1".into(),
            caller_name: "Maria".into(),
        };
        let value = serde_json::to_value(&payload).expect("serializable");
        assert_eq!(
            value,
            json!({
                "to": "customer-42",
                "offer": { "type": "offer", "sdp": "v=0" },
                "from": "operator-1",
                "callerName": "Maria"
            })
        );
    }

    #[test]
    fn candidate_uses_standard_init_keys() {
        let payload = IceCandidatePayload {
            to: "customer-42".into(),
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            },
        };
        let value = serde_json::to_value(&payload).expect("serializable");
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn candidate_tolerates_missing_optionals() {
        let payload: RemoteCandidatePayload =
            serde_json::from_value(json!({ "candidate": { "candidate": "candidate:1" } }))
                .expect("parses");
        assert_eq!(payload.candidate.sdp_mid, None);
        assert_eq!(payload.candidate.sdp_mline_index, None);
    }

    #[test]
    fn chat_payloads_use_camel_case() {
        let typing = TypingPayload {
            room_id: "7".into(),
            sender_name: "Maria".into(),
            is_typing: true,
        };
        let value = serde_json::to_value(&typing).expect("serializable");
        assert_eq!(
            value,
            json!({ "roomId": "7", "senderName": "Maria", "isTyping": true })
        );

        let read = ReadPayload { room_id: "7".into(), reader_role: READER_ROLE_ADMIN.into() };
        let value = serde_json::to_value(&read).expect("serializable");
        assert_eq!(value, json!({ "roomId": "7", "readerRole": "admin" }));
    }

    #[test]
    fn outgoing_message_carries_operator_role() {
        let message = OutgoingChatMessage {
            room_id: "7".into(),
            sender_id: "operator-1".into(),
            sender_name: "Maria".into(),
            sender_role: PartyRole::Operator,
            text: "hello".into(),
        };
        let value = serde_json::to_value(&message).expect("serializable");
        assert_eq!(value["senderRole"], "operator");
        assert_eq!(value["senderId"], "operator-1");
    }
}
