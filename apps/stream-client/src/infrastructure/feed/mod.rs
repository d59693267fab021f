//! Duplex Price Feed
//!
//! WebSocket price subscription with automatic reconnection, keepalive,
//! and per-symbol update coalescing.
//!
//! # Connection Lifecycle
//!
//! 1. [`ConnectionManager::open`] connects through a [`Connector`](crate::application::ports::Connector)
//! 2. While connected, text messages are forwarded and keepalives are sent
//! 3. On close or error, reconnect after `base * 2^attempt`
//! 4. After `max_attempts` the state becomes `Failed` until re-opened
//!
//! # Message Flow
//!
//! Inbound messages are decoded by [`FeedCodec`], filtered by the
//! subscription key set, and buffered in an [`UpdateCoalescer`] that
//! releases one [`PriceBatch`](crate::domain::market::PriceBatch) per tick.

/// JSON codec for price feed messages.
pub mod codec;

/// Per-symbol update coalescing.
pub mod coalescer;

/// Connection lifecycle state machine.
pub mod connection;

/// Price feed: connection plus coalescing pump.
#[allow(clippy::module_inception)]
pub mod feed;

/// Keepalive timer.
pub mod heartbeat;

/// Price feed wire message types.
pub mod messages;

/// Exponential backoff policy.
pub mod reconnect;

/// Shared feeds keyed by subscription set.
pub mod registry;

/// WebSocket transport adapter.
pub mod transport;

pub use codec::{CodecError, FeedCodec};
pub use coalescer::{CoalescerConfig, UpdateCoalescer};
pub use connection::{ConnectionConfig, ConnectionHandle, ConnectionManager};
pub use feed::{PriceFeed, PriceFeedConfig};
pub use heartbeat::{Heartbeat, HeartbeatConfig};
pub use messages::{FeedMessage, KeepaliveMessage, PriceUpdateMessage};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use registry::{FeedLease, FeedRegistry};
pub use transport::{WsConnector, WsTransport};
