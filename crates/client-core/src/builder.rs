//! Console assembly
//!
//! [`ClientBuilder`] wires two relay connections, the history client and a
//! media engine into a [`Console`]: one call client and one chat client
//! sharing the operator identity.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use url::Url;

use deskline_relay_transport::{RelayConfig, RelayConnection, RelayLink};

use crate::call::CallClient;
use crate::chat::ChatClient;
use crate::chat::history::{HistoryApi, HttpHistory};
use crate::config::{CallConfig, ClientConfig, OperatorProfile};
use crate::error::{ClientError, ClientResult};
use crate::media::{IceServer, MediaEngine};

/// Builder for an operator [`Console`].
///
/// The operator identity, both relay URLs, the history base URL and a media
/// engine are required; ICE servers default to the public STUN pair and
/// calls ring without a timeout unless one is set.
pub struct ClientBuilder {
    operator: Option<OperatorProfile>,
    call_relay_url: Option<Url>,
    chat_relay_url: Option<Url>,
    history_base_url: Option<Url>,
    ice_servers: Vec<IceServer>,
    ring_timeout: Option<Duration>,
    engine: Option<Arc<dyn MediaEngine>>,
}

impl ClientBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            operator: None,
            call_relay_url: None,
            chat_relay_url: None,
            history_base_url: None,
            ice_servers: IceServer::default_stun(),
            ring_timeout: None,
            engine: None,
        }
    }

    /// Start from a complete configuration, e.g. [`ClientConfig::from_env`]
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            operator: Some(config.operator),
            call_relay_url: Some(config.call_relay_url),
            chat_relay_url: Some(config.chat_relay_url),
            history_base_url: Some(config.history_base_url),
            ice_servers: config.ice_servers,
            ring_timeout: config.ring_timeout,
            engine: None,
        }
    }

    /// Set the operator identity and display name (required)
    pub fn operator(mut self, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        self.operator = Some(OperatorProfile::new(id, display_name));
        self
    }

    /// Set the relay carrying the `call:*` events (required)
    pub fn call_relay_url(mut self, url: Url) -> Self {
        self.call_relay_url = Some(url);
        self
    }

    /// Set the relay carrying the `chat:*` events (required)
    pub fn chat_relay_url(mut self, url: Url) -> Self {
        self.chat_relay_url = Some(url);
        self
    }

    /// Set the base URL of the chat history service (required)
    pub fn history_base_url(mut self, url: Url) -> Self {
        self.history_base_url = Some(url);
        self
    }

    /// Set the ICE servers handed to every peer session
    pub fn ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// End unanswered calls after `timeout`
    pub fn ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = Some(timeout);
        self
    }

    /// Set the media engine backing call capture and peer sessions
    /// (required)
    pub fn media_engine(mut self, engine: Arc<dyn MediaEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Build the console.
    ///
    /// Constructs both relay connections and clients without touching the
    /// network; [`Console::connect`] starts the sessions.
    pub fn build(self) -> ClientResult<Console> {
        let operator = self
            .operator
            .ok_or_else(|| ClientError::missing_configuration("operator"))?;
        let call_relay_url = self
            .call_relay_url
            .ok_or_else(|| ClientError::missing_configuration("call_relay_url"))?;
        let chat_relay_url = self
            .chat_relay_url
            .ok_or_else(|| ClientError::missing_configuration("chat_relay_url"))?;
        let history_base_url = self
            .history_base_url
            .ok_or_else(|| ClientError::missing_configuration("history_base_url"))?;
        let engine = self
            .engine
            .ok_or_else(|| ClientError::missing_configuration("media_engine"))?;

        let call_relay = Arc::new(RelayConnection::new(RelayConfig::new(call_relay_url)));
        let chat_relay = Arc::new(RelayConnection::new(RelayConfig::new(chat_relay_url)));
        let history: Arc<dyn HistoryApi> = Arc::new(HttpHistory::new(history_base_url));

        let call_link: Arc<dyn RelayLink> = call_relay.clone();
        let chat_link: Arc<dyn RelayLink> = chat_relay.clone();

        let call_config = CallConfig {
            operator: operator.clone(),
            ice_servers: self.ice_servers,
            ring_timeout: self.ring_timeout,
        };

        let call = CallClient::new(call_link, engine, call_config);
        let chat = ChatClient::new(chat_link, history, operator.clone());

        info!("Console assembled for {}", operator.id);
        Ok(Console { operator, call_relay, chat_relay, call, chat })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled operator console
pub struct Console {
    operator: OperatorProfile,
    call_relay: Arc<RelayConnection>,
    chat_relay: Arc<RelayConnection>,
    /// Call session client on the call relay
    pub call: CallClient,
    /// Chat session client on the chat relay
    pub chat: ChatClient,
}

impl Console {
    /// Registers the operator identity on both relays and starts their
    /// session loops. Reconnection is automatic from here on.
    pub fn connect(&self) {
        info!("Connecting console for {}", self.operator.id);
        self.call_relay.connect(&self.operator.id);
        self.chat_relay.connect(&self.operator.id);
    }

    /// The operator identity this console was built for
    pub fn operator(&self) -> &OperatorProfile {
        &self.operator
    }

    /// Ends any call, detaches both clients and closes both relays.
    pub async fn shutdown(&self) {
        self.call.shutdown().await;
        self.chat.shutdown().await;
        self.call_relay.disconnect().await;
        self.chat_relay.disconnect().await;
        info!("Console shut down");
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("operator", &self.operator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::media::{CaptureHandle, PeerEvent, PeerSession};

    /// Engine stub for assembly tests; no call ever runs against it
    struct NullEngine;

    #[async_trait]
    impl MediaEngine for NullEngine {
        async fn open_capture(&self) -> ClientResult<Box<dyn CaptureHandle>> {
            Err(ClientError::media_access_denied("no capture device"))
        }

        async fn create_peer(
            &self,
            _ice_servers: &[IceServer],
            _capture: &dyn CaptureHandle,
            _events: mpsc::UnboundedSender<PeerEvent>,
        ) -> ClientResult<Box<dyn PeerSession>> {
            Err(ClientError::negotiation("no peer sessions"))
        }
    }

    #[tokio::test]
    async fn build_assembles_a_console() {
        let console = ClientBuilder::new()
            .operator("operator-1", "Maria")
            .call_relay_url("wss://relay.example.com/call".parse().expect("url"))
            .chat_relay_url("wss://relay.example.com/chat".parse().expect("url"))
            .history_base_url("https://api.example.com/chat".parse().expect("url"))
            .media_engine(Arc::new(NullEngine))
            .build()
            .expect("complete builder");

        assert_eq!(console.operator().id, "operator-1");
        let rendered = format!("{console:?}");
        assert!(rendered.starts_with("Console"));
        assert!(rendered.contains("operator-1"));
        console.shutdown().await;
    }

    #[test]
    fn build_requires_an_operator() {
        let err = ClientBuilder::new().build().expect_err("empty builder");
        assert!(matches!(err, ClientError::MissingConfiguration { field } if field == "operator"));
    }

    #[test]
    fn from_config_carries_every_field() {
        let config = ClientConfig::new(
            OperatorProfile::new("operator-1", "Maria"),
            "wss://relay.example.com/call".parse().expect("url"),
            "wss://relay.example.com/chat".parse().expect("url"),
            "https://api.example.com/chat".parse().expect("url"),
        );

        // Everything except the engine came from the config, so the engine
        // is the only thing build can still miss.
        let err = ClientBuilder::from_config(config).build().expect_err("no engine");
        assert!(
            matches!(err, ClientError::MissingConfiguration { field } if field == "media_engine")
        );
    }
}
