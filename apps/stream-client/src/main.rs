//! Stream Client Binary
//!
//! Exercises the ingestion layer against a running backend.
//!
//! # Usage
//!
//! ```bash
//! # Log coalesced price batches until Ctrl-C
//! PRICE_SYMBOLS=BTCUSDT,ETHUSDT cargo run --bin stream-client
//!
//! # Stream one assistant reply to stdout (Ctrl-C cancels)
//! CHAT_MESSAGE="What is the BTC price?" cargo run --bin stream-client
//! ```
//!
//! # Environment Variables
//!
//! - `API_BASE_URL`: Backend base address (default: <http://localhost:8000>)
//! - `CHAT_MESSAGE`: If set, send this message instead of watching prices
//! - `CHAT_LEGACY`: Use the legacy chat endpoint when "true"
//! - `PRICE_SYMBOLS`: Comma-separated symbols (default: BTCUSDT)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use futures::StreamExt;
use stream_client::domain::conversation::{ChatRequest, RenderThrottle, ReplyState, StreamEvent};
use stream_client::domain::market::{PriceBatch, PriceHistory, SubscriptionKeys};
use stream_client::infrastructure::chat::{ChatChannel, ChatClient, ChatClientConfig};
use stream_client::infrastructure::feed::{FeedRegistry, PriceFeedConfig, WsConnector};
use stream_client::infrastructure::telemetry;
use stream_client::{AssistantReply, ClientConfig, ConnectionState, init_metrics};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

const DEFAULT_SYMBOLS: &str = "BTCUSDT";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    let metrics_handle = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };

    let config = ClientConfig::from_env().context("invalid client configuration")?;
    log_config(&config);

    match std::env::var("CHAT_MESSAGE") {
        Ok(message) if !message.trim().is_empty() => {
            let legacy = std::env::var("CHAT_LEGACY").is_ok_and(|v| v.eq_ignore_ascii_case("true"));
            run_chat(&config, message, legacy).await?;
        }
        _ => {
            let symbols =
                std::env::var("PRICE_SYMBOLS").unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string());
            run_prices(&config, SubscriptionKeys::parse_list(&symbols)).await;
        }
    }

    if let Some(handle) = metrics_handle {
        tracing::debug!(metrics = %handle.render(), "Final metrics");
    }

    Ok(())
}

/// Stream one reply to stdout, re-rendering at the throttle cadence.
async fn run_chat(config: &ClientConfig, message: String, legacy: bool) -> anyhow::Result<()> {
    let client = ChatClient::new(ChatClientConfig::from_client_config(config))
        .context("failed to create chat client")?;
    let channel = ChatChannel::new(client);

    let request = ChatRequest::new(message, config.chat.user_age);
    let mut stream = if legacy {
        channel.send_legacy(&request)
    } else {
        channel.send(&request)
    };
    tracing::info!(request_id = %stream.id(), legacy, "Chat request sent");

    let mut reply = AssistantReply::new();
    let mut throttle = RenderThrottle::new(config.chat.render_interval);
    let mut printed = 0;
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            event = stream.next() => {
                let Some(event) = event else { break };
                if let StreamEvent::Status(status) = &event {
                    tracing::info!(status = %status, "Assistant status");
                }
                if reply.apply(&event) && throttle.ready(Instant::now()) {
                    printed = print_new(&mut stdout, &reply.render(), printed)?;
                }
            }
            _ = signal::ctrl_c() => {
                channel.cancel();
                reply.mark_cancelled();
                break;
            }
        }
    }

    print_new(&mut stdout, &reply.render(), printed)?;
    writeln!(stdout)?;

    match reply.state() {
        ReplyState::Complete => tracing::info!(chars = reply.content().len(), "Reply complete"),
        ReplyState::Failed => tracing::warn!(error = ?reply.error(), "Reply failed"),
        ReplyState::Cancelled => tracing::info!("Reply cancelled"),
        ReplyState::Streaming => tracing::warn!("Reply ended without a terminal event"),
    }
    Ok(())
}

/// Write the part of `rendered` not yet printed. Returns the new offset.
fn print_new(out: &mut impl Write, rendered: &str, printed: usize) -> std::io::Result<usize> {
    if let Some(tail) = rendered.get(printed..) {
        out.write_all(tail.as_bytes())?;
        out.flush()?;
    }
    Ok(rendered.len())
}

/// Log batches and connection transitions until Ctrl-C.
async fn run_prices(config: &ClientConfig, keys: SubscriptionKeys) {
    let registry = FeedRegistry::new(
        PriceFeedConfig::from_client_config(config),
        Arc::new(WsConnector::new()),
    );
    let lease = registry.acquire(keys);
    let mut batches = lease.batches();
    let mut transitions = lease.transitions();

    tracing::info!(keys = %lease.keys(), "Watching prices");

    loop {
        tokio::select! {
            batch = batches.recv() => match batch {
                Ok(batch) => log_batch(&batch),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Batch consumer lagging");
                }
                Err(RecvError::Closed) => break,
            },
            state = transitions.recv() => match state {
                Ok(ConnectionState::Failed) => {
                    let status = lease.status();
                    tracing::error!(error = ?status.last_error, "Price feed unavailable");
                    break;
                }
                Ok(state) => tracing::info!(state = %state, "Price feed state changed"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, closing price feed");
                break;
            }
        }
    }

    lease.release();
}

fn log_batch(batch: &PriceBatch) {
    for update in batch.updates.values() {
        tracing::info!(
            sequence = batch.sequence,
            symbol = %update.symbol,
            price = update.quote.price,
            percent_change = update.quote.percent_change,
            history_points = update.history.as_ref().map(PriceHistory::len),
            "Price update"
        );
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        api_base_url = %config.api_base_url,
        heartbeat_secs = config.feed.heartbeat_interval.as_secs(),
        flush_ms = config.feed.flush_interval.as_millis(),
        max_reconnect_attempts = config.feed.max_reconnect_attempts,
        "Configuration loaded"
    );
    tracing::debug!(
        price_feed_url = %config.price_feed_url(),
        chat_url = %config.chat_url(),
        legacy_chat_url = %config.legacy_chat_url(),
        "Endpoints"
    );
}
