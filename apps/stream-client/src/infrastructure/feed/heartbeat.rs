//! Heartbeat
//!
//! Keepalive timer for a connected price feed. Each tick sends a `ping`
//! message; the timer only keeps intermediaries from idling the connection
//! out and does not judge liveness.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::infrastructure::config::{FeedSettings, MAX_TIMER_INTERVAL};

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between keepalive messages.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with a custom interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Create configuration from [`FeedSettings`].
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            interval: settings.heartbeat_interval,
        }
    }
}

/// Keepalive timer, started when a connection is established.
///
/// The first tick fires one full interval after creation. Missed ticks are
/// skipped rather than replayed in a burst.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Interval,
}

impl Heartbeat {
    /// Start the timer.
    #[must_use]
    pub fn start(config: &HeartbeatConfig) -> Self {
        Self {
            interval: interval_after(config.interval),
        }
    }

    /// Wait for the next keepalive tick. Cancel-safe.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Interval whose first tick fires one `period` from now, skipping missed
/// ticks. The period is clamped to `1ms..=MAX_TIMER_INTERVAL`.
pub(crate) fn interval_after(period: Duration) -> Interval {
    let period = period.clamp(Duration::from_millis(1), MAX_TIMER_INTERVAL);
    let now = Instant::now();
    let start = now.checked_add(period).unwrap_or(now);
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
