//! Stream Parser
//!
//! Classifies assembled frames into [`StreamEvent`]s. Frames without the
//! `data: ` marker are ignored. A malformed payload drops only its own
//! frame; the stream continues with the next one.

use serde_json::Value;

use super::messages::{DataFrame, ErrorFrame, StatusFrame, TextFrame};
use crate::domain::conversation::StreamEvent;
use crate::infrastructure::MALFORMED_RUN_LOG_EVERY;
use crate::infrastructure::metrics::{self, Protocol};

/// Prefix of every event frame.
pub const FRAME_MARKER: &str = "data: ";

/// Characters of an offending frame kept in logs.
const PREVIEW_CHARS: usize = 80;

/// Which event types an endpoint may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatProtocol {
    /// Chunked chat stream: every event type.
    #[default]
    Chat,
    /// Legacy endpoint: `text`, `status` and `done` only.
    Legacy,
}

impl ChatProtocol {
    /// Whether this protocol emits events of wire type `kind`.
    #[must_use]
    pub fn supports(self, kind: &str) -> bool {
        match self {
            Self::Chat => matches!(kind, "text" | "status" | "data" | "error" | "done"),
            Self::Legacy => matches!(kind, "text" | "status" | "done"),
        }
    }

    /// Metric label.
    #[must_use]
    pub const fn metric_protocol(self) -> Protocol {
        match self {
            Self::Chat => Protocol::Chat,
            Self::Legacy => Protocol::LegacyChat,
        }
    }
}

/// Frame parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Payload is not valid JSON or does not match its type's schema.
    #[error("invalid frame payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload has no string `type` field.
    #[error("frame payload has no type field")]
    MissingType,

    /// Payload type is not emitted by this protocol.
    #[error("unsupported event type: {0}")]
    UnsupportedType(String),
}

/// Stateful frame classifier for one response stream.
#[derive(Debug, Default)]
pub struct StreamParser {
    protocol: ChatProtocol,
    malformed_run: u64,
}

impl StreamParser {
    /// Create a parser for `protocol`.
    #[must_use]
    pub const fn new(protocol: ChatProtocol) -> Self {
        Self {
            protocol,
            malformed_run: 0,
        }
    }

    /// Protocol this parser accepts.
    #[must_use]
    pub const fn protocol(&self) -> ChatProtocol {
        self.protocol
    }

    /// Parse one frame. `Ok(None)` for frames without the marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed or of a type the
    /// protocol does not emit.
    pub fn parse(&self, frame: &str) -> Result<Option<StreamEvent>, ParseError> {
        let Some(payload) = frame
            .trim_start_matches(['\r', '\n'])
            .strip_prefix(FRAME_MARKER)
        else {
            return Ok(None);
        };

        let value: Value = serde_json::from_str(payload.trim())?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingType)?;

        if !self.protocol.supports(kind) {
            return Err(ParseError::UnsupportedType(kind.to_string()));
        }

        let event = match kind {
            "text" => {
                let frame: TextFrame = serde_json::from_value(value)?;
                StreamEvent::TextDelta(frame.content)
            }
            "status" => {
                let frame: StatusFrame = serde_json::from_value(value)?;
                StreamEvent::Status(frame.message)
            }
            "data" => {
                let frame: DataFrame = serde_json::from_value(value)?;
                StreamEvent::Data {
                    tool_calls: frame.tool_calls,
                    data_used: frame.data_used,
                }
            }
            "error" => {
                let frame: ErrorFrame = serde_json::from_value(value)?;
                StreamEvent::Error(frame.message)
            }
            "done" => StreamEvent::Done,
            other => return Err(ParseError::UnsupportedType(other.to_string())),
        };

        Ok(Some(event))
    }

    /// Parse one frame, logging and dropping anything that is not an event.
    pub fn accept(&mut self, frame: &str) -> Option<StreamEvent> {
        let protocol = self.protocol.metric_protocol();
        metrics::record_frame_received(protocol);

        match self.parse(frame) {
            Ok(Some(event)) => {
                self.malformed_run = 0;
                Some(event)
            }
            Ok(None) => {
                tracing::trace!(preview = %preview(frame), "Ignoring frame without data marker");
                None
            }
            Err(ParseError::UnsupportedType(kind)) => {
                self.malformed_run = 0;
                tracing::debug!(event_type = %kind, "Dropping unsupported event");
                None
            }
            Err(e) => {
                self.malformed_run += 1;
                metrics::record_frame_malformed(protocol);
                tracing::warn!(error = %e, preview = %preview(frame), "Dropping malformed frame");
                if self.malformed_run % MALFORMED_RUN_LOG_EVERY == 0 {
                    tracing::error!(
                        consecutive = self.malformed_run,
                        "Chat stream keeps sending malformed frames"
                    );
                }
                None
            }
        }
    }
}

fn preview(frame: &str) -> String {
    frame.chars().take(PREVIEW_CHARS).collect()
}
