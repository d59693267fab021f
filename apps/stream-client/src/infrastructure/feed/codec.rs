//! Price Feed Codec
//!
//! JSON encoding and decoding for the duplex price feed. Each transport
//! message carries exactly one JSON object, so a transport message is a
//! complete frame; decoding only has to classify it.
//!
//! Decoding inspects the `type` field first and then deserializes into the
//! matching wire type, so an unknown type is distinguishable from a
//! malformed payload.

use super::messages::{FeedMessage, PONG_TYPE, PRICE_UPDATE_TYPE, PriceUpdateMessage};

/// Characters of an offending payload kept in error messages.
const PREVIEW_CHARS: usize = 50;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is valid JSON but has no `type` field.
    #[error("message has no type field")]
    MissingType,

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the price feed.
#[derive(Debug, Default, Clone)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text message.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON object, has no `type`,
    /// or a `price_update` does not match the wire schema.
    pub fn decode(&self, text: &str) -> Result<FeedMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                preview(trimmed)
            )));
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        let msg_type = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(CodecError::MissingType)?;

        match msg_type {
            PRICE_UPDATE_TYPE => {
                let m: PriceUpdateMessage = serde_json::from_value(value)?;
                Ok(FeedMessage::PriceUpdate(m))
            }
            PONG_TYPE => Ok(FeedMessage::Pong),
            other => Ok(FeedMessage::Ignored(other.to_string())),
        }
    }

    /// Encode a value to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

/// Leading characters of `text`, safe on any char boundary.
#[must_use]
pub fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}
