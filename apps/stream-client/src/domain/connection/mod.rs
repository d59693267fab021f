//! Connection Lifecycle
//!
//! State of a duplex price connection as observed by consumers.

use std::fmt;

/// Lifecycle state of a duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport open and nothing scheduled.
    #[default]
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Handshake complete; heartbeat running.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Reconnection attempts exhausted. Terminal until re-opened.
    Failed,
}

impl ConnectionState {
    /// Whether the transport is currently usable.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether no further transitions happen without an explicit open.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }

    /// Lowercase name for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published to consumers on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Reconnect attempts made in the current episode (0 after a success).
    pub attempt_count: u32,
    /// Most recent transport error, cleared on a successful connect.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_disconnected() {
        let status = ConnectionStatus::default();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.attempt_count, 0);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Reconnecting.is_terminal());
        assert!(ConnectionState::Connected.is_connected());
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
