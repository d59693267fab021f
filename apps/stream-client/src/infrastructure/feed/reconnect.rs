//! Reconnection Policy
//!
//! Exponential backoff for price feed reconnection: the delay before
//! reconnect attempt `n` (zero-based) is `base_delay * 2^n`. After
//! `max_attempts` scheduled attempts the policy stops yielding delays and
//! the connection is marked failed. A limit of zero fails on the first
//! connection failure.

use std::time::Duration;

use crate::infrastructure::config::FeedSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Reconnection attempts allowed before the connection fails.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from [`FeedSettings`].
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            base_delay: settings.reconnect_base_delay,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Delay before zero-based attempt `attempt`, saturating at
    /// [`Duration::MAX`].
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

/// Reconnection policy implementing exponential backoff.
///
/// # Example
///
/// ```rust
/// use stream_client::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
///
/// // Successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Get the delay before the next attempt and count the attempt.
    ///
    /// Returns `None` if max attempts have been reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let delay = self.config.delay_for(self.attempt_count);
        self.attempt_count = self.attempt_count.saturating_add(1);

        Some(delay)
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts scheduled since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt limit.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.attempt_count < self.config.max_attempts
    }
}

/// Error type for reconnection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({attempts}) exceeded: {last_error}")]
    MaxAttemptsExceeded {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        last_error: String,
    },
}
