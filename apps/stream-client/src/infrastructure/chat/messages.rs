//! Chat Stream Wire Messages
//!
//! Payload types of the chunked chat stream. Each frame is
//! `"data: " + JSON + "\n\n"` and the JSON carries a `type` field:
//!
//! | type     | fields                    | terminal |
//! |----------|---------------------------|----------|
//! | `text`   | `content`                 | no       |
//! | `status` | `message`                 | no       |
//! | `data`   | `tool_calls`, `data_used` | no       |
//! | `error`  | `message`                 | yes      |
//! | `done`   |                           | yes      |

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message shown when an `error` frame carries none.
pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

/// `text` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFrame {
    /// Incremental answer text.
    pub content: String,
}

/// `status` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    /// Progress message.
    pub message: String,
}

/// `data` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    /// Tool invocations.
    #[serde(default)]
    pub tool_calls: Value,
    /// Data sources consulted.
    #[serde(default)]
    pub data_used: Value,
}

/// `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Failure description.
    #[serde(default = "default_error_message")]
    pub message: String,
}

fn default_error_message() -> String {
    DEFAULT_ERROR_MESSAGE.to_string()
}
