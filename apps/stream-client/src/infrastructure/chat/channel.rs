//! Chat Channel
//!
//! A logical conversation lane with at most one active request. Sending a
//! new message cancels whatever the channel was still streaming.

use parking_lot::Mutex;

use super::client::ChatClient;
use super::request::{CancelHandle, ChatStream};
use crate::domain::conversation::ChatRequest;

/// One-request-at-a-time wrapper around a [`ChatClient`].
#[derive(Debug)]
pub struct ChatChannel {
    client: ChatClient,
    active: Mutex<Option<CancelHandle>>,
}

impl ChatChannel {
    /// Create an idle channel.
    #[must_use]
    pub const fn new(client: ChatClient) -> Self {
        Self {
            client,
            active: Mutex::new(None),
        }
    }

    /// Send on the chunked chat endpoint, cancelling any prior request.
    ///
    /// Must be called within a Tokio runtime.
    pub fn send(&self, request: &ChatRequest) -> ChatStream {
        self.replace(|| self.client.stream(request))
    }

    /// Send on the legacy endpoint, cancelling any prior request.
    ///
    /// Must be called within a Tokio runtime.
    pub fn send_legacy(&self, request: &ChatRequest) -> ChatStream {
        self.replace(|| self.client.stream_legacy(request))
    }

    /// Cancel the active request, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.active.lock().take() {
            handle.cancel();
        }
    }

    /// Whether a request is still streaming.
    #[must_use]
    pub fn has_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(CancelHandle::is_active)
    }

    fn replace(&self, start: impl FnOnce() -> ChatStream) -> ChatStream {
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            if previous.is_active() {
                tracing::debug!("New message supersedes in-flight request");
            }
            previous.cancel();
        }

        let stream = start();
        *active = Some(stream.cancel_handle());
        drop(active);

        tracing::debug!(request_id = %stream.id(), "Chat request started");
        stream
    }
}
