//! Assistant Conversation Types
//!
//! Typed events produced by the chunked chat stream, the request payload,
//! and the consumer-side accumulator that turns a sequence of events into
//! displayable reply text.
//!
//! # Failure display
//!
//! When a stream fails after partial content was delivered, the partial
//! answer is kept and an inline error annotation is appended:
//!
//! ```text
//! The BTC price is currently
//!
//! [Error: connection reset]
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default cadence at which streamed text is re-rendered.
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(120);

// =============================================================================
// Request
// =============================================================================

/// Body of an outgoing chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// User message.
    pub message: String,
    /// Conversation to continue, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Age of the user, used by the backend to adapt tone.
    pub user_age: u32,
    /// Additional backend-specific fields, sent verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    /// Create a request for a new conversation.
    #[must_use]
    pub fn new(message: impl Into<String>, user_age: u32) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            user_age,
            extra: Map::new(),
        }
    }

    /// Continue an existing conversation.
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Attach an extra top-level field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

// =============================================================================
// Stream Events
// =============================================================================

/// One decoded event of an assistant response, in backend emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental answer text.
    TextDelta(String),
    /// Progress message (e.g. "Fetching prices...").
    Status(String),
    /// Tool invocations and the data they produced.
    Data {
        /// Tool calls made by the assistant.
        tool_calls: Value,
        /// Data sources consulted.
        data_used: Value,
    },
    /// Request failed. Terminal.
    Error(String),
    /// Response complete. Terminal.
    Done,
}

impl StreamEvent {
    /// Whether no further events follow this one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Done)
    }

    /// Wire-level type name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta(_) => "text",
            Self::Status(_) => "status",
            Self::Data { .. } => "data",
            Self::Error(_) => "error",
            Self::Done => "done",
        }
    }
}

// =============================================================================
// Reply Accumulator
// =============================================================================

/// Outcome of a reply as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyState {
    /// Events still arriving.
    #[default]
    Streaming,
    /// `done` received.
    Complete,
    /// `error` received; partial content retained.
    Failed,
    /// Cancelled by the user. Not an error.
    Cancelled,
}

/// Consumer-side view of one assistant reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    content: String,
    status: Option<String>,
    tool_calls: Option<Value>,
    data_used: Option<Value>,
    error: Option<String>,
    state: ReplyState,
}

impl AssistantReply {
    /// Create an empty, streaming reply.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an event into the reply.
    ///
    /// Returns `true` if the rendered text changed. Events after a terminal
    /// state are ignored.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        if self.state != ReplyState::Streaming {
            return false;
        }

        match event {
            StreamEvent::TextDelta(delta) => {
                self.content.push_str(delta);
                !delta.is_empty()
            }
            StreamEvent::Status(message) => {
                self.status = Some(message.clone());
                false
            }
            StreamEvent::Data {
                tool_calls,
                data_used,
            } => {
                self.tool_calls = Some(tool_calls.clone());
                self.data_used = Some(data_used.clone());
                false
            }
            StreamEvent::Error(message) => {
                self.error = Some(message.clone());
                self.status = None;
                self.state = ReplyState::Failed;
                true
            }
            StreamEvent::Done => {
                self.status = None;
                self.state = ReplyState::Complete;
                false
            }
        }
    }

    /// Record a user cancellation. No-op once the reply has settled.
    pub fn mark_cancelled(&mut self) {
        if self.state == ReplyState::Streaming {
            self.status = None;
            self.state = ReplyState::Cancelled;
        }
    }

    /// Text received so far, without annotations.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Latest progress message while streaming.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Latest tool calls, if a data event arrived.
    #[must_use]
    pub const fn tool_calls(&self) -> Option<&Value> {
        self.tool_calls.as_ref()
    }

    /// Latest data sources, if a data event arrived.
    #[must_use]
    pub const fn data_used(&self) -> Option<&Value> {
        self.data_used.as_ref()
    }

    /// Error message, if the reply failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Current outcome.
    #[must_use]
    pub const fn state(&self) -> ReplyState {
        self.state
    }

    /// Display text: partial content plus an inline error annotation.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.error {
            None => self.content.clone(),
            Some(message) if self.content.is_empty() => format!("[Error: {message}]"),
            Some(message) => format!("{}\n\n[Error: {message}]", self.content),
        }
    }
}

// =============================================================================
// Render Throttle
// =============================================================================

/// Limits how often streamed text is pushed to the display.
///
/// Independent of the price coalescing cadence.
#[derive(Debug, Clone)]
pub struct RenderThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl Default for RenderThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_INTERVAL)
    }
}

impl RenderThrottle {
    /// Create a throttle with the given minimum spacing.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a render is due at `now`; records the render if so.
    pub fn ready(&mut self, now: Instant) -> bool {
        let due = self
            .last
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }

    /// Forget the last render so the next call is due immediately.
    pub const fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_serializes_optional_and_extra_fields() {
        let request = ChatRequest::new("price of BTC?", 30)
            .with_conversation("c-1")
            .with_field("locale", json!("en"));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["message"], "price of BTC?");
        assert_eq!(value["conversation_id"], "c-1");
        assert_eq!(value["user_age"], 30);
        assert_eq!(value["locale"], "en");
    }

    #[test]
    fn request_omits_missing_conversation() {
        let value = serde_json::to_value(ChatRequest::new("hi", 20)).unwrap();
        assert!(value.get("conversation_id").is_none());
    }

    #[test]
    fn terminal_events() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(StreamEvent::Error("x".into()).is_terminal());
        assert!(!StreamEvent::TextDelta("x".into()).is_terminal());
        assert_eq!(StreamEvent::Status("s".into()).kind(), "status");
    }

    #[test]
    fn reply_accumulates_text_in_order() {
        let mut reply = AssistantReply::new();
        reply.apply(&StreamEvent::Status("thinking".into()));
        assert_eq!(reply.status(), Some("thinking"));

        assert!(reply.apply(&StreamEvent::TextDelta("Hel".into())));
        assert!(reply.apply(&StreamEvent::TextDelta("lo".into())));
        reply.apply(&StreamEvent::Done);

        assert_eq!(reply.content(), "Hello");
        assert_eq!(reply.state(), ReplyState::Complete);
        assert!(reply.status().is_none());
    }

    #[test]
    fn failure_keeps_partial_content_and_annotates() {
        let mut reply = AssistantReply::new();
        reply.apply(&StreamEvent::TextDelta("Partial answer".into()));
        reply.apply(&StreamEvent::Error("connection reset".into()));

        assert_eq!(reply.state(), ReplyState::Failed);
        assert_eq!(reply.content(), "Partial answer");
        assert_eq!(reply.render(), "Partial answer\n\n[Error: connection reset]");
    }

    #[test]
    fn failure_without_content_renders_annotation_only() {
        let mut reply = AssistantReply::new();
        reply.apply(&StreamEvent::Error("HTTP 500".into()));
        assert_eq!(reply.render(), "[Error: HTTP 500]");
    }

    #[test]
    fn events_after_terminal_are_ignored() {
        let mut reply = AssistantReply::new();
        reply.apply(&StreamEvent::TextDelta("a".into()));
        reply.apply(&StreamEvent::Done);
        assert!(!reply.apply(&StreamEvent::TextDelta("b".into())));
        assert_eq!(reply.content(), "a");
    }

    #[test]
    fn cancellation_is_not_an_error() {
        let mut reply = AssistantReply::new();
        reply.apply(&StreamEvent::TextDelta("Hel".into()));
        reply.mark_cancelled();

        assert_eq!(reply.state(), ReplyState::Cancelled);
        assert!(reply.error().is_none());
        assert_eq!(reply.render(), "Hel");

        reply.apply(&StreamEvent::TextDelta("lo".into()));
        assert_eq!(reply.content(), "Hel");
    }

    #[test]
    fn data_event_records_tool_calls() {
        let mut reply = AssistantReply::new();
        reply.apply(&StreamEvent::Data {
            tool_calls: json!([{"name": "get_price"}]),
            data_used: json!(["coingecko"]),
        });
        assert_eq!(reply.tool_calls(), Some(&json!([{"name": "get_price"}])));
        assert_eq!(reply.data_used(), Some(&json!(["coingecko"])));
    }

    #[test]
    fn throttle_spaces_renders() {
        let mut throttle = RenderThrottle::new(Duration::from_millis(120));
        let start = Instant::now();

        assert!(throttle.ready(start));
        assert!(!throttle.ready(start + Duration::from_millis(50)));
        assert!(throttle.ready(start + Duration::from_millis(120)));
        assert!(!throttle.ready(start + Duration::from_millis(200)));

        throttle.reset();
        assert!(throttle.ready(start + Duration::from_millis(201)));
    }
}
