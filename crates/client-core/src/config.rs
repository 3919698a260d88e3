//! Client configuration
//!
//! Configuration can be assembled in code with the `with_*` methods or
//! loaded from `DESKLINE_*` environment variables via
//! [`ClientConfig::from_env`].

use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{ClientError, ClientResult};
use crate::media::IceServer;

/// Identity the console announces to the relay and in call offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorProfile {
    /// Stable identity registered with the relay, e.g. `operator-1`
    pub id: String,
    /// Human name shown to the customer, e.g. in the incoming call screen
    pub display_name: String,
}

impl OperatorProfile {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { id: id.into(), display_name: display_name.into() }
    }
}

/// Settings for [`CallClient`](crate::call::CallClient)
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Identity and display name announced in offers
    pub operator: OperatorProfile,
    /// STUN/TURN servers handed to every peer session
    pub ice_servers: Vec<IceServer>,
    /// End unanswered calls after this long; `None` lets them ring until
    /// someone acts
    pub ring_timeout: Option<Duration>,
}

impl CallConfig {
    pub fn new(operator: OperatorProfile) -> Self {
        Self {
            operator,
            ice_servers: IceServer::default_stun(),
            ring_timeout: None,
        }
    }

    /// Set the ICE servers used for peer sessions
    pub fn with_ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Set a ring timeout for unanswered calls
    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = Some(timeout);
        self
    }
}

/// Full console configuration covering both session clients
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub operator: OperatorProfile,
    /// Relay carrying the `call:*` events
    pub call_relay_url: Url,
    /// Relay carrying the `chat:*` events
    pub chat_relay_url: Url,
    /// Base URL of the chat history service
    pub history_base_url: Url,
    pub ice_servers: Vec<IceServer>,
    pub ring_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(
        operator: OperatorProfile,
        call_relay_url: Url,
        chat_relay_url: Url,
        history_base_url: Url,
    ) -> Self {
        Self {
            operator,
            call_relay_url,
            chat_relay_url,
            history_base_url,
            ice_servers: IceServer::default_stun(),
            ring_timeout: None,
        }
    }

    /// Set the ICE servers used for peer sessions
    pub fn with_ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Set a ring timeout for unanswered calls
    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = Some(timeout);
        self
    }

    /// The call-side slice of this configuration
    pub fn call_config(&self) -> CallConfig {
        CallConfig {
            operator: self.operator.clone(),
            ice_servers: self.ice_servers.clone(),
            ring_timeout: self.ring_timeout,
        }
    }

    /// Builds a config from environment variables.
    ///
    /// Required: `DESKLINE_OPERATOR_ID`, `DESKLINE_OPERATOR_NAME`,
    /// `DESKLINE_CALL_RELAY_URL`, `DESKLINE_CHAT_RELAY_URL`,
    /// `DESKLINE_HISTORY_URL`. Optional: `DESKLINE_ICE_URLS`
    /// (comma-separated) and `DESKLINE_RING_TIMEOUT_SECS`.
    pub fn from_env() -> ClientResult<Self> {
        let operator = OperatorProfile::new(
            require_env("DESKLINE_OPERATOR_ID")?,
            require_env("DESKLINE_OPERATOR_NAME")?,
        );
        let mut config = Self::new(
            operator,
            parse_url("DESKLINE_CALL_RELAY_URL")?,
            parse_url("DESKLINE_CHAT_RELAY_URL")?,
            parse_url("DESKLINE_HISTORY_URL")?,
        );

        if let Ok(raw) = env::var("DESKLINE_ICE_URLS") {
            let urls: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !urls.is_empty() {
                config.ice_servers = vec![IceServer { urls, username: None, credential: None }];
            }
        }

        if let Ok(raw) = env::var("DESKLINE_RING_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                ClientError::invalid_configuration(
                    "DESKLINE_RING_TIMEOUT_SECS",
                    "expected a number of seconds",
                )
            })?;
            config.ring_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn require_env(name: &str) -> ClientResult<String> {
    env::var(name).map_err(|_| ClientError::missing_configuration(name))
}

fn parse_url(name: &str) -> ClientResult<Url> {
    let raw = require_env(name)?;
    raw.parse()
        .map_err(|e| ClientError::invalid_configuration(name, format!("invalid URL: {e}")))
}
