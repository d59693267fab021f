//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the protocol clients and the concrete
//! implementations of the port interfaces defined in the application layer.

/// Chunked chat stream client (HTTP).
pub mod chat;

/// Configuration loaded from the environment.
pub mod config;

/// Duplex price feed client (WebSocket).
pub mod feed;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// A run of consecutive malformed frames logs an error every this many
/// frames. Malformed frames never fail a connection or request.
pub const MALFORMED_RUN_LOG_EVERY: u64 = 10;
