//! Update Coalescer
//!
//! Buffers price updates per symbol and releases them as one batch per
//! flush tick. Within a tick the latest update for a symbol overwrites any
//! earlier one, so downstream consumers see at most one update per symbol
//! per interval regardless of how fast the backend pushes.
//!
//! History series are replaced at a slower cadence than scalar fields: a
//! symbol's history is attached to a batch at most once per
//! `history_interval`. Scalar fields are never throttled beyond the tick.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, Interval};

use crate::domain::market::{CoalescedUpdate, PriceBatch, PriceHistory, PriceUpdate, Symbol};
use crate::infrastructure::config::FeedSettings;
use crate::infrastructure::feed::heartbeat::interval_after;
use crate::infrastructure::metrics;

/// Coalescing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescerConfig {
    /// Flush cadence.
    pub flush_interval: Duration,
    /// Minimum spacing between history replacements for one symbol.
    pub history_interval: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(500),
            history_interval: Duration::from_secs(10),
        }
    }
}

impl CoalescerConfig {
    /// Create configuration from [`FeedSettings`].
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            flush_interval: settings.flush_interval,
            history_interval: settings.history_interval,
        }
    }
}

/// Per-symbol pending buffer with a fixed flush cadence.
///
/// Owned by a single task; the buffer is only read when it is swapped out
/// at flush time.
#[derive(Debug)]
pub struct UpdateCoalescer {
    config: CoalescerConfig,
    pending: HashMap<Symbol, PriceUpdate>,
    history_replaced_at: HashMap<Symbol, Instant>,
    sequence: u64,
}

impl UpdateCoalescer {
    /// Create an empty coalescer.
    #[must_use]
    pub fn new(config: CoalescerConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            history_replaced_at: HashMap::new(),
            sequence: 0,
        }
    }

    /// Buffer an update, replacing any pending update for the same symbol.
    pub fn push(&mut self, update: PriceUpdate) {
        metrics::record_update_coalesced();
        self.pending.insert(update.symbol.clone(), update);
    }

    /// Symbols waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Swap out the pending buffer as a batch.
    ///
    /// Returns `None` when nothing arrived since the last flush.
    pub fn flush(&mut self, now: Instant) -> Option<PriceBatch> {
        if self.pending.is_empty() {
            return None;
        }

        let drained = std::mem::take(&mut self.pending);
        let updates = drained
            .into_iter()
            .map(|(symbol, update)| {
                let history = self.gate_history(&symbol, update.history, now);
                let coalesced = CoalescedUpdate {
                    symbol: update.symbol,
                    quote: update.quote,
                    history,
                };
                (symbol, coalesced)
            })
            .collect::<HashMap<_, _>>();

        self.sequence += 1;
        Some(PriceBatch {
            sequence: self.sequence,
            flushed_at: Utc::now(),
            updates,
        })
    }

    /// Flush timer. The first tick fires one interval from now; missed
    /// ticks are skipped.
    #[must_use]
    pub fn ticker(&self) -> Interval {
        interval_after(self.config.flush_interval)
    }

    fn gate_history(
        &mut self,
        symbol: &str,
        history: PriceHistory,
        now: Instant,
    ) -> Option<PriceHistory> {
        if history.is_empty() {
            return None;
        }

        let due = self
            .history_replaced_at
            .get(symbol)
            .is_none_or(|last| now.saturating_duration_since(*last) >= self.config.history_interval);
        if !due {
            return None;
        }

        self.history_replaced_at.insert(symbol.to_string(), now);
        Some(history)
    }
}
