//! Market Data Types
//!
//! Codec-agnostic price types handed to consumers. Updates are keyed by
//! symbol and the latest update for a symbol supersedes all older ones; no
//! ordering is implied across symbols.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A symbol identifier (e.g. `BTCUSDT`).
pub type Symbol = String;

/// Default bound on the number of points kept in a history series.
pub const DEFAULT_MAX_HISTORY_POINTS: usize = 100;

// =============================================================================
// Subscription Keys
// =============================================================================

/// Immutable set of symbols a price connection is created for.
///
/// Changing the set means tearing the connection down and acquiring a new
/// one; there is no in-place add/remove. An empty set accepts every symbol
/// the feed publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubscriptionKeys(BTreeSet<Symbol>);

impl SubscriptionKeys {
    /// Build a key set, trimming whitespace and dropping blanks and duplicates.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            symbols
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated symbol list.
    #[must_use]
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Whether an update for `symbol` belongs to this subscription.
    #[must_use]
    pub fn accepts(&self, symbol: &str) -> bool {
        self.0.is_empty() || self.0.contains(symbol)
    }

    /// Number of symbols in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate symbols in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.0.iter()
    }
}

impl fmt::Display for SubscriptionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("*");
        }
        let joined: Vec<&str> = self.0.iter().map(String::as_str).collect();
        f.write_str(&joined.join(","))
    }
}

// =============================================================================
// History Series
// =============================================================================

/// A single point of the intraday price series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Point time as sent by the backend (epoch based).
    pub time: f64,
    /// Price at `time`.
    pub price: f64,
}

/// Ordered, bounded price series attached to an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceHistory(Vec<PricePoint>);

impl PriceHistory {
    /// Build a series keeping at most `max_points` of the most recent points.
    #[must_use]
    pub fn bounded(mut points: Vec<PricePoint>, max_points: usize) -> Self {
        if points.len() > max_points {
            points.drain(..points.len() - max_points);
        }
        Self(points)
    }

    /// Points in time order.
    #[must_use]
    pub fn points(&self) -> &[PricePoint] {
        &self.0
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the series has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Most recent point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&PricePoint> {
        self.0.last()
    }
}

// =============================================================================
// Updates
// =============================================================================

/// Scalar price fields for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Current price.
    pub price: f64,
    /// Percent change over 24h.
    pub percent_change: f64,
    /// 24h high.
    pub high_24h: f64,
    /// 24h low.
    pub low_24h: f64,
    /// 24h volume.
    pub volume_24h: f64,
    /// Backend timestamp of the last update, verbatim.
    pub last_update: String,
}

impl PriceQuote {
    /// Parse `last_update` as RFC 3339, if it is one.
    #[must_use]
    pub fn last_update_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.last_update)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Latest known state of a symbol as received from the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    /// Symbol this update is for.
    pub symbol: Symbol,
    /// Scalar fields.
    pub quote: PriceQuote,
    /// Intraday series; may be empty.
    pub history: PriceHistory,
}

/// One symbol's entry in a flushed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CoalescedUpdate {
    /// Symbol this entry is for.
    pub symbol: Symbol,
    /// Most recent scalar fields as of the flush.
    pub quote: PriceQuote,
    /// Replacement history series, present only when the history gate
    /// allowed a redraw on this flush.
    pub history: Option<PriceHistory>,
}

/// A flush of the pending buffer, keyed by symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBatch {
    /// Monotonic flush counter for this feed (starts at 1).
    pub sequence: u64,
    /// Wall-clock time of the flush.
    pub flushed_at: DateTime<Utc>,
    /// Latest update per symbol.
    pub updates: HashMap<Symbol, CoalescedUpdate>,
}

impl PriceBatch {
    /// Entry for `symbol`, if it changed during this interval.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&CoalescedUpdate> {
        self.updates.get(symbol)
    }

    /// Number of symbols in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(time: f64, price: f64) -> PricePoint {
        PricePoint { time, price }
    }

    #[test]
    fn keys_trim_and_dedupe() {
        let keys = SubscriptionKeys::new([" BTCUSDT", "ETHUSDT", "BTCUSDT ", ""]);
        assert_eq!(keys.len(), 2);
        assert!(keys.accepts("BTCUSDT"));
        assert!(!keys.accepts("SOLUSDT"));
        assert_eq!(keys.to_string(), "BTCUSDT,ETHUSDT");
    }

    #[test]
    fn keys_equal_regardless_of_order() {
        let a = SubscriptionKeys::parse_list("ETHUSDT,BTCUSDT");
        let b = SubscriptionKeys::parse_list("BTCUSDT, ETHUSDT");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_keys_accept_everything() {
        let keys = SubscriptionKeys::default();
        assert!(keys.accepts("ANYTHING"));
        assert_eq!(keys.to_string(), "*");
    }

    #[test]
    fn history_keeps_most_recent_points() {
        let points: Vec<_> = (0..5).map(|i| point(f64::from(i), f64::from(i) * 10.0)).collect();
        let history = PriceHistory::bounded(points, 3);
        assert_eq!(history.len(), 3);
        assert_eq!(history.points()[0], point(2.0, 20.0));
        assert_eq!(history.last(), Some(&point(4.0, 40.0)));
    }

    #[test]
    fn history_under_bound_is_untouched() {
        let history = PriceHistory::bounded(vec![point(1.0, 1.0)], 10);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn quote_last_update_parses_rfc3339() {
        let quote = PriceQuote {
            price: 1.0,
            percent_change: 0.0,
            high_24h: 1.0,
            low_24h: 1.0,
            volume_24h: 0.0,
            last_update: "2024-05-01T12:00:00Z".to_string(),
        };
        assert!(quote.last_update_at().is_some());

        let opaque = PriceQuote {
            last_update: "a moment ago".to_string(),
            ..quote
        };
        assert!(opaque.last_update_at().is_none());
    }
}
