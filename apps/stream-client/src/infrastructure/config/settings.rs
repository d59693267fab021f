//! Client Configuration Settings
//!
//! Configuration types for the stream client, loaded from environment variables.

use std::time::Duration;

/// Base address used when `API_BASE_URL` is unset or still a placeholder.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Upper bound for every timer interval read from the environment.
pub const MAX_TIMER_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Endpoint paths relative to the base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Duplex price feed path.
    pub price_path: String,
    /// Chunked chat stream path.
    pub chat_path: String,
    /// Legacy chat endpoint path.
    pub legacy_chat_path: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            price_path: "/ws/prices".to_string(),
            chat_path: "/api/chat/stream".to_string(),
            legacy_chat_path: "/api/chat/sse".to_string(),
        }
    }
}

/// Price feed connection and coalescing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Keepalive interval while connected.
    pub heartbeat_interval: Duration,
    /// Base of the exponential reconnect delay.
    pub reconnect_base_delay: Duration,
    /// Reconnection attempts before the connection is marked failed. Zero
    /// fails on the first connection failure.
    pub max_reconnect_attempts: u32,
    /// Coalescing flush cadence.
    pub flush_interval: Duration,
    /// Minimum spacing between history replacements per symbol.
    pub history_interval: Duration,
    /// Most recent history points kept per symbol.
    pub max_history_points: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_millis(1000),
            max_reconnect_attempts: 10,
            flush_interval: Duration::from_millis(500),
            history_interval: Duration::from_secs(10),
            max_history_points: 100,
        }
    }
}

/// Chat stream settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    /// Minimum spacing between text re-renders.
    pub render_interval: Duration,
    /// `user_age` attached to outgoing requests.
    pub user_age: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            render_interval: Duration::from_millis(120),
            user_age: 30,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// HTTP(S) or WS(S) base address, without trailing slash.
    pub api_base_url: String,
    /// Endpoint paths.
    pub endpoints: EndpointSettings,
    /// Price feed settings.
    pub feed: FeedSettings,
    /// Chat settings.
    pub chat: ChatSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            endpoints: EndpointSettings::default(),
            feed: FeedSettings::default(),
            chat: ChatSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `API_BASE_URL` uses an unsupported scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if `API_BASE_URL` uses an unsupported scheme.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = match lookup("API_BASE_URL") {
            Some(v) if !is_placeholder(&v) => normalize_base_url(&v)?,
            _ => DEFAULT_API_BASE_URL.to_string(),
        };

        let endpoints_default = EndpointSettings::default();
        let endpoints = EndpointSettings {
            price_path: parse_env_path(
                &lookup,
                "STREAM_CLIENT_PRICE_PATH",
                endpoints_default.price_path,
            ),
            chat_path: parse_env_path(
                &lookup,
                "STREAM_CLIENT_CHAT_PATH",
                endpoints_default.chat_path,
            ),
            legacy_chat_path: parse_env_path(
                &lookup,
                "STREAM_CLIENT_LEGACY_CHAT_PATH",
                endpoints_default.legacy_chat_path,
            ),
        };

        let feed_default = FeedSettings::default();
        let feed = FeedSettings {
            heartbeat_interval: parse_env_duration_secs(
                &lookup,
                "STREAM_CLIENT_HEARTBEAT_INTERVAL_SECS",
                feed_default.heartbeat_interval,
            ),
            reconnect_base_delay: parse_env_duration_millis(
                &lookup,
                "STREAM_CLIENT_RECONNECT_BASE_DELAY_MS",
                feed_default.reconnect_base_delay,
            ),
            max_reconnect_attempts: parse_env_u32(
                &lookup,
                "STREAM_CLIENT_MAX_RECONNECT_ATTEMPTS",
                feed_default.max_reconnect_attempts,
            ),
            flush_interval: parse_env_duration_millis(
                &lookup,
                "STREAM_CLIENT_FLUSH_INTERVAL_MS",
                feed_default.flush_interval,
            ),
            history_interval: parse_env_duration_secs(
                &lookup,
                "STREAM_CLIENT_HISTORY_INTERVAL_SECS",
                feed_default.history_interval,
            ),
            max_history_points: parse_env_usize(
                &lookup,
                "STREAM_CLIENT_MAX_HISTORY_POINTS",
                feed_default.max_history_points,
            ),
        };

        let chat_default = ChatSettings::default();
        let chat = ChatSettings {
            render_interval: parse_env_duration_millis(
                &lookup,
                "STREAM_CLIENT_RENDER_INTERVAL_MS",
                chat_default.render_interval,
            ),
            user_age: parse_env_u32(&lookup, "STREAM_CLIENT_USER_AGE", chat_default.user_age),
        };

        Ok(Self {
            api_base_url,
            endpoints,
            feed,
            chat,
        })
    }

    /// Get the duplex price feed URL (`ws://` or `wss://`).
    #[must_use]
    pub fn price_feed_url(&self) -> String {
        format!(
            "{}{}",
            with_scheme(&self.api_base_url, Transport::WebSocket),
            self.endpoints.price_path
        )
    }

    /// Get the chunked chat stream URL.
    #[must_use]
    pub fn chat_url(&self) -> String {
        format!(
            "{}{}",
            with_scheme(&self.api_base_url, Transport::Http),
            self.endpoints.chat_path
        )
    }

    /// Get the legacy chat endpoint URL.
    #[must_use]
    pub fn legacy_chat_url(&self) -> String {
        format!(
            "{}{}",
            with_scheme(&self.api_base_url, Transport::Http),
            self.endpoints.legacy_chat_path
        )
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Base address uses a scheme other than http(s) or ws(s).
    #[error("invalid API base URL {0:?}: expected http(s):// or ws(s)://")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Clone, Copy)]
enum Transport {
    Http,
    WebSocket,
}

const SCHEMES: [(&str, &str, &str); 4] = [
    ("https://", "https://", "wss://"),
    ("http://", "http://", "ws://"),
    ("wss://", "https://", "wss://"),
    ("ws://", "http://", "ws://"),
];

fn with_scheme(base: &str, transport: Transport) -> String {
    for (prefix, http, ws) in SCHEMES {
        if let Some(rest) = strip_prefix_ignore_case(base, prefix) {
            let scheme = match transport {
                Transport::Http => http,
                Transport::WebSocket => ws,
            };
            return format!("{scheme}{rest}");
        }
    }
    base.to_string()
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let supported = SCHEMES.iter().any(|(prefix, _, _)| {
        strip_prefix_ignore_case(trimmed, prefix).is_some_and(|rest| !rest.is_empty())
    });
    if supported {
        Ok(trimmed.to_string())
    } else {
        Err(ConfigError::InvalidBaseUrl(raw.to_string()))
    }
}

/// Whether a configured value is an unfilled template value.
#[must_use]
pub fn is_placeholder(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    lower.is_empty()
        || lower.starts_with("your")
        || (lower.starts_with('<') && lower.ends_with('>'))
        || lower == "changeme"
        || lower.contains("placeholder")
}

fn parse_env_path<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: String) -> String {
    match lookup(key) {
        Some(v) if !v.trim().is_empty() => {
            let v = v.trim();
            if v.starts_with('/') {
                v.to_string()
            } else {
                format!("/{v}")
            }
        }
        _ => default,
    }
}

fn parse_env_u32<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map_or(default, Duration::from_secs)
        .min(MAX_TIMER_INTERVAL)
}

fn parse_env_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|millis| *millis > 0)
        .map_or(default, Duration::from_millis)
        .min(MAX_TIMER_INTERVAL)
}
