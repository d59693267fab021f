//! Prometheus Metrics Module
//!
//! Client-side counters and gauges for the two ingestion paths.
//!
//! # Metrics Categories
//!
//! - **Frames**: frames received and dropped as malformed, per protocol
//! - **Connection**: reconnect attempts and current connection state
//! - **Coalescing**: updates absorbed and batches flushed
//! - **Chat**: request outcomes
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "stream_client_frames_received_total",
        "Total frames received by protocol"
    );
    describe_counter!(
        "stream_client_frames_malformed_total",
        "Total frames dropped because they could not be decoded"
    );

    describe_counter!(
        "stream_client_reconnects_total",
        "Total price feed reconnection attempts scheduled"
    );
    describe_counter!(
        "stream_client_connection_failures_total",
        "Total price feed connections that gave up after exhausting retries"
    );
    describe_gauge!(
        "stream_client_connection_state",
        "Current price feed connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=failed)"
    );
    describe_gauge!(
        "stream_client_active_feeds",
        "Number of shared price feeds held by the registry"
    );

    describe_counter!(
        "stream_client_updates_coalesced_total",
        "Total price updates buffered for coalescing"
    );
    describe_counter!(
        "stream_client_batches_flushed_total",
        "Total coalesced batches delivered"
    );
    describe_histogram!(
        "stream_client_batch_symbols",
        "Number of symbols per flushed batch"
    );

    describe_counter!(
        "stream_client_chat_requests_total",
        "Total chat requests by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for stream protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Duplex price feed.
    PriceFeed,
    /// Chunked chat stream.
    Chat,
    /// Legacy chat endpoint.
    LegacyChat,
}

impl Protocol {
    const fn as_str(self) -> &'static str {
        match self {
            Self::PriceFeed => "price_feed",
            Self::Chat => "chat",
            Self::LegacyChat => "legacy_chat",
        }
    }
}

/// Metric labels for chat request outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    /// Terminal `done` received.
    Completed,
    /// Terminal `error` delivered.
    Failed,
    /// Cancelled by the consumer.
    Cancelled,
    /// Body ended without a terminal frame.
    Truncated,
}

impl ChatOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Truncated => "truncated",
        }
    }
}

const fn state_code(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Reconnecting => 3.0,
        ConnectionState::Failed => 4.0,
    }
}

/// Record a frame received.
pub fn record_frame_received(protocol: Protocol) {
    counter!(
        "stream_client_frames_received_total",
        "protocol" => protocol.as_str()
    )
    .increment(1);
}

/// Record a frame dropped as malformed.
pub fn record_frame_malformed(protocol: Protocol) {
    counter!(
        "stream_client_frames_malformed_total",
        "protocol" => protocol.as_str()
    )
    .increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("stream_client_reconnects_total").increment(1);
}

/// Record a connection that exhausted its retries.
pub fn record_connection_failure() {
    counter!("stream_client_connection_failures_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("stream_client_connection_state").set(state_code(state));
}

/// Update the number of shared feeds.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_feeds(count: usize) {
    gauge!("stream_client_active_feeds").set(count as f64);
}

/// Record an update buffered for coalescing.
pub fn record_update_coalesced() {
    counter!("stream_client_updates_coalesced_total").increment(1);
}

/// Record a flushed batch.
#[allow(clippy::cast_precision_loss)]
pub fn record_batch_flushed(symbols: usize) {
    counter!("stream_client_batches_flushed_total").increment(1);
    histogram!("stream_client_batch_symbols").record(symbols as f64);
}

/// Record the outcome of a chat request.
pub fn record_chat_outcome(protocol: Protocol, outcome: ChatOutcome) {
    counter!(
        "stream_client_chat_requests_total",
        "protocol" => protocol.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
