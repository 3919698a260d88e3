//! Chat history service seam
//!
//! Room history and unread counts live server-side; the client fetches
//! them over HTTP when a room is opened. The [`HistoryApi`] trait keeps
//! the chat client testable without a server; [`HttpHistory`] is the
//! production binding.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::chat::ChatMessage;
use crate::error::{ClientError, ClientResult};
use crate::signal::READER_ROLE_ADMIN;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Read access to server-side conversation history
#[async_trait]
pub trait HistoryApi: Send + Sync {
    /// All stored messages for a room, oldest first
    async fn fetch_messages(&self, room_id: &str) -> ClientResult<Vec<ChatMessage>>;

    /// Number of customer messages the console has not read yet
    async fn unread_count(&self, room_id: &str) -> ClientResult<usize>;
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct UnreadResponse {
    count: usize,
}

/// [`HistoryApi`] over the chat service's REST endpoints
pub struct HttpHistory {
    client: reqwest::Client,
    base: String,
}

impl HttpHistory {
    /// Creates a client against `base`, e.g. `https://api.example.com/chat`
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.as_str().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl HistoryApi for HttpHistory {
    async fn fetch_messages(&self, room_id: &str) -> ClientResult<Vec<ChatMessage>> {
        let url = format!("{}/messages/{}", self.base, room_id);
        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::history(e.to_string()))?;
        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ClientError::history(format!("malformed history response: {e}")))?;
        Ok(body.messages)
    }

    async fn unread_count(&self, room_id: &str) -> ClientResult<usize> {
        let url = format!("{}/messages/{}/unread/count", self.base, room_id);
        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .query(&[("role", READER_ROLE_ADMIN)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::history(e.to_string()))?;
        let body: UnreadResponse = response
            .json()
            .await
            .map_err(|e| ClientError::history(format!("malformed unread response: {e}")))?;
        Ok(body.count)
    }
}
