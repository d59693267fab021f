//! Configuration Module
//!
//! Configuration loading for the stream client.

mod settings;

pub use settings::{
    ChatSettings, ClientConfig, ConfigError, DEFAULT_API_BASE_URL, EndpointSettings, FeedSettings,
    MAX_TIMER_INTERVAL, is_placeholder,
};
