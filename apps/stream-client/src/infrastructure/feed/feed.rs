//! Price Feed
//!
//! Wires a [`ConnectionManager`] to an [`UpdateCoalescer`] and fans
//! coalesced batches out to subscribers over a `tokio::sync::broadcast`
//! channel.
//!
//! ```text
//! transport ─▶ ConnectionManager ─mpsc─▶ pump task (decode ▸ filter ▸ coalesce) ─tick─▶ broadcast<PriceBatch>
//! ```
//!
//! Malformed messages are logged and counted but never tear the connection
//! down.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::codec::{FeedCodec, preview};
use super::coalescer::{CoalescerConfig, UpdateCoalescer};
use super::connection::{ConnectionConfig, ConnectionHandle, ConnectionManager};
use super::messages::FeedMessage;
use crate::application::ports::Connector;
use crate::domain::connection::{ConnectionState, ConnectionStatus};
use crate::domain::market::{DEFAULT_MAX_HISTORY_POINTS, PriceBatch, SubscriptionKeys};
use crate::infrastructure::MALFORMED_RUN_LOG_EVERY;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics::{self, Protocol};

/// Price feed configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceFeedConfig {
    /// Connection supervision.
    pub connection: ConnectionConfig,
    /// Coalescing cadence.
    pub coalescer: CoalescerConfig,
    /// Most recent history points kept per update.
    pub max_history_points: usize,
    /// Inbound messages buffered between the transport and the pump.
    pub inbound_capacity: usize,
    /// Batches buffered per subscriber before it lags.
    pub batch_capacity: usize,
}

impl PriceFeedConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            coalescer: CoalescerConfig::default(),
            max_history_points: DEFAULT_MAX_HISTORY_POINTS,
            inbound_capacity: 1_024,
            batch_capacity: 64,
        }
    }

    /// Create configuration from the client configuration.
    #[must_use]
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            connection: ConnectionConfig::from_client_config(config),
            coalescer: CoalescerConfig::from_feed_settings(&config.feed),
            max_history_points: config.feed.max_history_points,
            ..Self::new(config.price_feed_url())
        }
    }
}

/// A live price subscription for one key set.
#[derive(Debug)]
pub struct PriceFeed {
    keys: SubscriptionKeys,
    connection: ConnectionManager,
    batches: broadcast::Sender<Arc<PriceBatch>>,
    shutdown: CancellationToken,
}

impl PriceFeed {
    /// Start the pump task and open the connection.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn start(
        keys: SubscriptionKeys,
        config: PriceFeedConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (batches, _) = broadcast::channel(config.batch_capacity.max(1));
        let shutdown = CancellationToken::new();
        let connection = ConnectionManager::new(config.connection, connector, inbound_tx);

        let pump = Pump {
            keys: keys.clone(),
            codec: FeedCodec::new(),
            coalescer: UpdateCoalescer::new(config.coalescer),
            max_history_points: config.max_history_points,
            batches: batches.clone(),
            malformed_run: 0,
        };
        let span = tracing::info_span!("price_pump", keys = %keys);
        tokio::spawn(pump.run(inbound_rx, shutdown.clone()).instrument(span));

        connection.open();
        tracing::info!(keys = %keys, url = connection.url(), "Price feed started");

        Self {
            keys,
            connection,
            batches,
            shutdown,
        }
    }

    /// Key set this feed serves.
    #[must_use]
    pub const fn keys(&self) -> &SubscriptionKeys {
        &self.keys
    }

    /// Receive coalesced batches from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PriceBatch>> {
        self.batches.subscribe()
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.watch_status()
    }

    /// Subscribe to connection state transitions.
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.connection.transitions()
    }

    /// Re-open the connection, e.g. after it failed. No-op while live.
    pub fn reopen(&self) -> ConnectionHandle {
        self.connection.open()
    }

    /// Stop the connection and the pump. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.connection.close();
    }
}

impl Drop for PriceFeed {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Pump Task
// =============================================================================

struct Pump {
    keys: SubscriptionKeys,
    codec: FeedCodec,
    coalescer: UpdateCoalescer,
    max_history_points: usize,
    batches: broadcast::Sender<Arc<PriceBatch>>,
    malformed_run: u64,
}

impl Pump {
    async fn run(mut self, mut inbound: mpsc::Receiver<String>, shutdown: CancellationToken) {
        let mut ticker = self.coalescer.ticker();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => self.flush(),
                text = inbound.recv() => match text {
                    Some(text) => self.handle_text(&text),
                    None => break,
                },
            }
        }

        tracing::debug!("Price pump stopped");
    }

    fn handle_text(&mut self, text: &str) {
        match self.codec.decode(text) {
            Ok(FeedMessage::PriceUpdate(message)) => {
                self.malformed_run = 0;
                let update = message.into_update(self.max_history_points);
                if self.keys.accepts(&update.symbol) {
                    self.coalescer.push(update);
                } else {
                    tracing::trace!(symbol = %update.symbol, "Ignoring update outside key set");
                }
            }
            Ok(FeedMessage::Pong) => {
                self.malformed_run = 0;
                tracing::trace!("Keepalive acknowledged");
            }
            Ok(FeedMessage::Ignored(kind)) => {
                self.malformed_run = 0;
                tracing::debug!(message_type = %kind, "Ignoring price feed message");
            }
            Err(e) => {
                self.malformed_run += 1;
                metrics::record_frame_malformed(Protocol::PriceFeed);
                tracing::warn!(error = %e, preview = %preview(text), "Dropping malformed price message");
                if self.malformed_run % MALFORMED_RUN_LOG_EVERY == 0 {
                    tracing::error!(
                        consecutive = self.malformed_run,
                        "Price feed keeps sending malformed messages"
                    );
                }
            }
        }
    }

    fn flush(&mut self) {
        let Some(batch) = self.coalescer.flush(Instant::now()) else {
            return;
        };

        metrics::record_batch_flushed(batch.len());
        tracing::trace!(sequence = batch.sequence, symbols = batch.len(), "Flushing price batch");
        // No subscribers is fine
        let _ = self.batches.send(Arc::new(batch));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::{DuplexTransport, TransportError};

    /// Accepts once and replays `messages`, then stays open.
    struct ReplayConnector {
        messages: Mutex<Option<Vec<String>>>,
    }

    impl ReplayConnector {
        fn new(messages: Vec<String>) -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(Some(messages)),
            })
        }
    }

    #[async_trait]
    impl Connector for ReplayConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn DuplexTransport>, TransportError> {
            match self.messages.lock().take() {
                Some(messages) => Ok(Box::new(ReplayTransport {
                    messages: messages.into(),
                })),
                None => Err(TransportError::Connect("connection refused".to_string())),
            }
        }
    }

    struct ReplayTransport {
        messages: std::collections::VecDeque<String>,
    }

    #[async_trait]
    impl DuplexTransport for ReplayTransport {
        async fn send_text(&mut self, _text: String) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
            match self.messages.pop_front() {
                Some(message) => Ok(Some(message)),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    /// Accepts once and emits `count` updates for one symbol, `spacing`
    /// apart starting at `offset` after connecting. Update `n` carries price
    /// `n`. Stays open afterwards.
    struct TickingConnector {
        schedule: Mutex<Option<(u32, Duration, Duration)>>,
    }

    #[async_trait]
    impl Connector for TickingConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn DuplexTransport>, TransportError> {
            match self.schedule.lock().take() {
                Some((count, offset, spacing)) => Ok(Box::new(TickingTransport {
                    next_at: Instant::now() + offset,
                    spacing,
                    sent: 0,
                    count,
                })),
                None => Err(TransportError::Connect("connection refused".to_string())),
            }
        }
    }

    struct TickingTransport {
        next_at: Instant,
        spacing: Duration,
        sent: u32,
        count: u32,
    }

    #[async_trait]
    impl DuplexTransport for TickingTransport {
        async fn send_text(&mut self, _text: String) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
            if self.sent == self.count {
                return std::future::pending().await;
            }
            tokio::time::sleep_until(self.next_at).await;
            self.next_at += self.spacing;
            self.sent += 1;
            Ok(Some(price("BTCUSDT", f64::from(self.sent), 0)))
        }

        async fn close(&mut self) {}
    }

    fn price(symbol: &str, price: f64, history: usize) -> String {
        let points: Vec<String> = (0..history)
            .map(|i| format!(r#"{{"time":{i},"price":{price}}}"#))
            .collect();
        format!(
            r#"{{"type":"price_update","symbol":"{symbol}","data":{{"price":{price},"percent_change":0.5,"high_24h":{price},"low_24h":{price},"volume_24h":1.0,"last_update":"2024-05-01T12:00:00Z"}},"history":[{}]}}"#,
            points.join(",")
        )
    }

    fn start(keys: &str, messages: Vec<String>) -> PriceFeed {
        let connector: Arc<dyn Connector> = ReplayConnector::new(messages);
        PriceFeed::start(
            SubscriptionKeys::parse_list(keys),
            PriceFeedConfig::new("ws://localhost:8000/ws/prices"),
            connector,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_delivered_as_one_batch_with_latest_value() {
        let messages = (1..=5).map(|i| price("BTCUSDT", f64::from(i), 0)).collect();
        let feed = start("BTCUSDT", messages);
        let mut batches = feed.subscribe();

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.sequence, 1);
        assert_eq!(batch.len(), 1);
        assert!((batch.get("BTCUSDT").unwrap().quote.price - 5.0).abs() < f64::EPSILON);

        // Nothing new arrived, so no further batch.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(
            batches.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn steady_stream_yields_one_batch_per_tick() {
        // Updates land at 25ms, 75ms, 125ms, ... so none coincides with a
        // 500ms boundary. Ten arrive per tick across four ticks.
        let connector: Arc<dyn Connector> = Arc::new(TickingConnector {
            schedule: Mutex::new(Some((
                40,
                Duration::from_millis(25),
                Duration::from_millis(50),
            ))),
        });
        let feed = PriceFeed::start(
            SubscriptionKeys::parse_list("BTCUSDT"),
            PriceFeedConfig::new("ws://localhost:8000/ws/prices"),
            connector,
        );
        let mut batches = feed.subscribe();
        let start = Instant::now();

        for tick in 1..=4_u32 {
            let batch = batches.recv().await.unwrap();
            assert_eq!(batch.sequence, u64::from(tick));
            assert_eq!(start.elapsed(), Duration::from_millis(500 * u64::from(tick)));
            assert_eq!(batch.len(), 1);
            let latest = batch.get("BTCUSDT").unwrap().quote.price;
            assert!(
                (latest - f64::from(tick * 10)).abs() < f64::EPSILON,
                "tick {tick} carried {latest}"
            );
        }

        // The stream has gone quiet, so later ticks flush nothing.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(
            batches.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn symbols_outside_key_set_and_garbage_are_dropped() {
        let messages = vec![
            price("ETHUSDT", 3000.0, 0),
            "not json".to_string(),
            r#"{"type":"pong"}"#.to_string(),
            r#"{"type":"news"}"#.to_string(),
            price("BTCUSDT", 64000.0, 2),
        ];
        let feed = start("BTCUSDT", messages);
        let mut batches = feed.subscribe();

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        let entry = batch.get("BTCUSDT").unwrap();
        assert_eq!(entry.history.as_ref().unwrap().len(), 2);
        assert_eq!(feed.status().state, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_key_set_accepts_all_symbols() {
        let messages = vec![price("ETHUSDT", 3000.0, 0), price("BTCUSDT", 64000.0, 0)];
        let feed = start("", messages);
        let mut batches = feed.subscribe();

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_disconnects_and_stops_batches() {
        let feed = start("BTCUSDT", vec![]);
        let mut status = feed.watch_status();
        status
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();

        feed.close();
        feed.close();
        assert_eq!(feed.status().state, ConnectionState::Disconnected);
    }
}
