#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Stream Client - Real-time Data Ingestion
//!
//! Client-side ingestion layer for the crypto assistant: a resilient duplex
//! price feed and a cancellable chunked chat stream. Both turn an
//! unreliable, partially framed byte stream into ordered events without
//! dropping, duplicating or reordering data.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Streaming types with no I/O
//!   - `market`: Price updates, history series, coalesced batches
//!   - `connection`: Connection lifecycle state
//!   - `conversation`: Chat stream events and the reply accumulator
//!
//! - **Application**: Port definitions
//!   - `ports`: Duplex transport seam used by the connection manager
//!
//! - **Infrastructure**: Protocol clients and adapters
//!   - `feed`: Connection manager, coalescer, shared feed registry
//!   - `chat`: Frame assembler, stream parser, cancellable requests
//!   - `config`: Environment configuration
//!   - `metrics` / `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                   ┌───────────────────┐   ┌────────────────┐
//! WebSocket ───────►│ ConnectionManager │──►│ UpdateCoalescer│──► PriceBatch (every 500 ms)
//!                   └───────────────────┘   └────────────────┘
//!
//!                   ┌────────────────┐   ┌──────────────┐   ┌────────────┐
//! HTTP body ───────►│ FrameAssembler │──►│ StreamParser │──►│ ChatStream │──► StreamEvent
//!                   └────────────────┘   └──────────────┘   └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Protocol clients and adapters.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionState, ConnectionStatus};
pub use domain::conversation::{AssistantReply, ChatRequest, ReplyState, StreamEvent};
pub use domain::market::{CoalescedUpdate, PriceBatch, PriceUpdate, SubscriptionKeys};

// Ports
pub use application::ports::{Connector, DuplexTransport, TransportError};

// Configuration
pub use infrastructure::config::{ClientConfig, ConfigError};

// Price feed
pub use infrastructure::feed::{
    ConnectionManager, FeedLease, FeedRegistry, PriceFeed, PriceFeedConfig, UpdateCoalescer,
    WsConnector,
};

// Chat stream
pub use infrastructure::chat::{
    CancelHandle, ChatChannel, ChatClient, ChatClientConfig, ChatError, ChatProtocol, ChatStream,
    FrameAssembler, StreamParser,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
