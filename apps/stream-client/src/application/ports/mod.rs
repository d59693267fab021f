//! Port Interfaces
//!
//! Defines the duplex transport contract following the Hexagonal
//! Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: opens a duplex transport to a URL (handshake included)
//! - `DuplexTransport`: an open transport carrying text messages
//!
//! The transport handle is owned exclusively by the connection manager;
//! nothing else reads from or writes to it.

use async_trait::async_trait;

/// Errors raised by a duplex transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Handshake failed or the endpoint was unreachable.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Sending a message failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading from the transport failed mid-stream.
    #[error("receive failed: {0}")]
    Receive(String),
}

/// Opens duplex transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `url` and complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the transport cannot be established.
    async fn connect(&self, url: &str) -> Result<Box<dyn DuplexTransport>, TransportError>;
}

/// An established duplex transport carrying text messages.
#[async_trait]
pub trait DuplexTransport: Send {
    /// Send one text message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] if the write fails.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next text message. `Ok(None)` means the peer closed.
    ///
    /// Must be cancel-safe: it is raced against timers in `select!`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Receive`] on a transport failure.
    async fn recv_text(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the transport. Best effort.
    async fn close(&mut self);
}
