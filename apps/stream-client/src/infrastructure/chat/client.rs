//! Chat HTTP Client
//!
//! Issues chat requests and returns their streamed responses as
//! [`ChatStream`]s. No retries: an HTTP failure becomes a terminal error
//! event and retrying is left to the caller.

use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderValue};

use super::parser::ChatProtocol;
use super::request::{ChatStream, DEFAULT_EVENT_CAPACITY};
use crate::domain::conversation::ChatRequest;
use crate::infrastructure::config::ClientConfig;

/// Chat client errors.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Chat client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatClientConfig {
    /// Chunked chat stream endpoint.
    pub stream_url: String,
    /// Legacy endpoint.
    pub legacy_url: String,
    /// Events buffered per request between reader and consumer.
    pub event_capacity: usize,
}

impl ChatClientConfig {
    /// Endpoints derived from the client configuration.
    #[must_use]
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            stream_url: config.chat_url(),
            legacy_url: config.legacy_chat_url(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// HTTP client for the chat endpoints.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    config: ChatClientConfig,
}

impl ChatClient {
    /// Create a client. No read timeout is set; a response streams for as
    /// long as the server keeps it open.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ChatClientConfig) -> Result<Self, ChatError> {
        let http = Client::builder().build()?;
        Ok(Self { http, config })
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &ChatClientConfig {
        &self.config
    }

    /// Send `request` to the chunked chat endpoint.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn stream(&self, request: &ChatRequest) -> ChatStream {
        self.send(&self.config.stream_url, request, ChatProtocol::Chat)
    }

    /// Send `request` to the legacy endpoint. Only `text`, `status` and
    /// `done` events are recognised.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn stream_legacy(&self, request: &ChatRequest) -> ChatStream {
        self.send(&self.config.legacy_url, request, ChatProtocol::Legacy)
    }

    fn send(&self, url: &str, request: &ChatRequest, protocol: ChatProtocol) -> ChatStream {
        let pending = self
            .http
            .post(url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(request)
            .send();

        ChatStream::spawn(protocol, self.config.event_capacity, async move {
            let response = pending.await.map_err(|e| format!("request failed: {e}"))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(format!("HTTP {}: {}", status.as_u16(), body.trim()));
            }

            tracing::debug!(status = %status, "Chat response streaming");
            Ok(response.bytes_stream())
        })
    }
}
