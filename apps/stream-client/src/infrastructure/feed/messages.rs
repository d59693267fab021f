//! Price Feed Wire Messages
//!
//! Wire format types for the duplex price feed. These map directly to the
//! backend's JSON message schema and convert into domain types.
//!
//! # Message Types
//!
//! ## Outbound
//! - `ping`: keepalive sent on the heartbeat interval
//!
//! ## Inbound
//! - `price_update`: latest scalar fields and intraday series for a symbol
//! - `pong`: keepalive reply (ignored)

use serde::{Deserialize, Serialize};

use crate::domain::market::{PriceHistory, PricePoint, PriceQuote, PriceUpdate};

/// Type tag of an inbound price update.
pub const PRICE_UPDATE_TYPE: &str = "price_update";

/// Type tag of the outbound keepalive.
pub const PING_TYPE: &str = "ping";

/// Type tag of a keepalive reply.
pub const PONG_TYPE: &str = "pong";

// =============================================================================
// Outbound
// =============================================================================

/// Keepalive message.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "ping"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveMessage {
    /// Message type (always "ping").
    #[serde(rename = "type")]
    pub msg_type: String,
}

impl KeepaliveMessage {
    /// Create the keepalive ping.
    #[must_use]
    pub fn ping() -> Self {
        Self {
            msg_type: PING_TYPE.to_string(),
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Price update for a single symbol.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "type": "price_update",
///   "symbol": "BTCUSDT",
///   "data": {
///     "price": 64250.5, "percent_change": 1.8,
///     "high_24h": 65000.0, "low_24h": 62000.0, "volume_24h": 18234.2,
///     "last_update": "2024-05-01T12:00:00Z"
///   },
///   "history": [{"time": 1714564800000, "price": 64100.0}]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdateMessage {
    /// Message type (always "`price_update`").
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Symbol the update is for.
    pub symbol: String,

    /// Scalar fields.
    pub data: PriceData,

    /// Intraday series, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryPoint>,
}

/// Scalar fields of a price update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    /// Current price.
    pub price: f64,

    /// Percent change over 24h.
    pub percent_change: f64,

    /// 24h high.
    #[serde(default)]
    pub high_24h: f64,

    /// 24h low.
    #[serde(default)]
    pub low_24h: f64,

    /// 24h volume.
    #[serde(default)]
    pub volume_24h: f64,

    /// Backend timestamp of the update.
    #[serde(default)]
    pub last_update: String,
}

/// One point of the intraday series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// Point time.
    pub time: f64,
    /// Price at `time`.
    pub price: f64,
}

impl PriceUpdateMessage {
    /// Convert into a domain update, keeping at most `max_history_points`
    /// of the most recent history points.
    #[must_use]
    pub fn into_update(self, max_history_points: usize) -> PriceUpdate {
        let points = self
            .history
            .into_iter()
            .map(|p| PricePoint {
                time: p.time,
                price: p.price,
            })
            .collect();

        PriceUpdate {
            symbol: self.symbol,
            quote: PriceQuote {
                price: self.data.price,
                percent_change: self.data.percent_change,
                high_24h: self.data.high_24h,
                low_24h: self.data.low_24h,
                volume_24h: self.data.volume_24h,
                last_update: self.data.last_update,
            },
            history: PriceHistory::bounded(points, max_history_points),
        }
    }
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// A price update.
    PriceUpdate(PriceUpdateMessage),
    /// Keepalive reply.
    Pong,
    /// Well-formed message of a type this client does not consume.
    Ignored(String),
}
