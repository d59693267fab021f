//! Connection Manager
//!
//! Supervises the duplex price feed transport:
//!
//! ```text
//! Disconnected ──open()──▶ Connecting ──ok──▶ Connected
//!                              ▲                 │ closed / error
//!                              │ delay elapsed   ▼
//!                              └────────── Reconnecting ──attempts exhausted──▶ Failed
//! ```
//!
//! The delay before reconnect attempt `n` is `base * 2^n`; a successful
//! connection resets the attempt count. While connected a keepalive `ping`
//! is sent on the heartbeat interval. `close()` moves any state to
//! `Disconnected` and cancels pending timers.
//!
//! The transport is owned by the supervisor task; inbound text messages
//! are forwarded on an `mpsc` channel in arrival order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::codec::FeedCodec;
use super::heartbeat::{Heartbeat, HeartbeatConfig};
use super::messages::KeepaliveMessage;
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use crate::application::ports::{Connector, DuplexTransport, TransportError};
use crate::domain::connection::{ConnectionState, ConnectionStatus};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics::{self, Protocol};

/// Buffered state transitions per subscriber.
const TRANSITION_CAPACITY: usize = 64;

/// Connection configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Price feed URL (`ws://` or `wss://`).
    pub url: String,
    /// Reconnection policy configuration.
    pub reconnect: ReconnectConfig,
    /// Keepalive configuration.
    pub heartbeat: HeartbeatConfig,
}

impl ConnectionConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Create configuration from the client configuration.
    #[must_use]
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            url: config.price_feed_url(),
            reconnect: ReconnectConfig::from_feed_settings(&config.feed),
            heartbeat: HeartbeatConfig::from_feed_settings(&config.feed),
        }
    }
}

/// Handle to one connection episode started by [`ConnectionManager::open`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    /// Episode identifier; repeated `open()` calls on a live episode share it.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }
}

// =============================================================================
// Status Publishing
// =============================================================================

struct StatusPublisher {
    status: watch::Sender<ConnectionStatus>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl StatusPublisher {
    /// Apply `change` unless `gate` is cancelled.
    ///
    /// The gate is checked under the watch lock, so an episode cancelled by
    /// `close()` can never publish after the `Disconnected` it raced with.
    fn update<F>(&self, gate: Option<&CancellationToken>, change: F)
    where
        F: FnOnce(&mut ConnectionStatus),
    {
        self.status.send_if_modified(|status| {
            if gate.is_some_and(CancellationToken::is_cancelled) {
                return false;
            }

            let before = status.clone();
            change(status);

            if status.state != before.state {
                metrics::set_connection_state(status.state);
                // No receivers is fine
                let _ = self.transitions.send(status.state);
            }
            *status != before
        });
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

struct Episode {
    handle: ConnectionHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the price feed transport lifecycle.
pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    inbound: mpsc::Sender<String>,
    publisher: Arc<StatusPublisher>,
    active: Mutex<Option<Episode>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.config.url)
            .field("status", &*self.publisher.status.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager. Nothing connects until [`Self::open`].
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        inbound: mpsc::Sender<String>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);

        Self {
            config,
            connector,
            inbound,
            publisher: Arc::new(StatusPublisher {
                status,
                transitions,
            }),
            active: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    /// Start connecting.
    ///
    /// Idempotent while an episode is live; after `Failed` or `close()` a
    /// fresh episode starts with attempt count 0. Must be called within a
    /// Tokio runtime.
    pub fn open(&self) -> ConnectionHandle {
        let mut active = self.active.lock();

        if let Some(episode) = active.as_ref()
            && !episode.task.is_finished()
            && self.publisher.status.borrow().state != ConnectionState::Failed
        {
            return episode.handle.clone();
        }

        if let Some(stale) = active.take() {
            stale.cancel.cancel();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let handle = ConnectionHandle {
            id,
            status: self.publisher.status.subscribe(),
        };

        let supervisor = Supervisor {
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            inbound: self.inbound.clone(),
            publisher: Arc::clone(&self.publisher),
            cancel: cancel.clone(),
            codec: FeedCodec::new(),
        };
        let span = tracing::info_span!("price_feed", connection_id = id, url = %self.config.url);
        let task = tokio::spawn(supervisor.run().instrument(span));

        *active = Some(Episode {
            handle: handle.clone(),
            cancel,
            task,
        });
        handle
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        if let Some(episode) = self.active.lock().take() {
            episode.cancel.cancel();
            tracing::info!(connection_id = episode.handle.id, "Price feed closed");
        }
        self.publisher
            .update(None, |status| *status = ConnectionStatus::default());
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.publisher.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.publisher.status.subscribe()
    }

    /// Subscribe to state transitions from now on.
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.publisher.transitions.subscribe()
    }

    /// Feed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(episode) = self.active.get_mut().take() {
            episode.cancel.cancel();
        }
    }
}

// =============================================================================
// Supervisor Task
// =============================================================================

enum Step {
    Cancelled,
    Keepalive,
    Received(Result<Option<String>, TransportError>),
}

enum PumpExit {
    Cancelled,
    ConsumerGone,
    Dropped(String),
}

struct Supervisor {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    inbound: mpsc::Sender<String>,
    publisher: Arc<StatusPublisher>,
    cancel: CancellationToken,
    codec: FeedCodec,
}

impl Supervisor {
    fn publish<F: FnOnce(&mut ConnectionStatus)>(&self, change: F) {
        self.publisher.update(Some(&self.cancel), change);
    }

    async fn run(self) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        self.publish(|status| {
            *status = ConnectionStatus {
                state: ConnectionState::Connecting,
                ..ConnectionStatus::default()
            };
        });

        loop {
            tracing::debug!(attempt = policy.attempt_count(), "Connecting to price feed");

            let connected = tokio::select! {
                () = self.cancel.cancelled() => return,
                result = self.connector.connect(&self.config.url) => result,
            };

            let failure = match connected {
                Ok(transport) => {
                    policy.reset();
                    self.publish(|status| {
                        status.state = ConnectionState::Connected;
                        status.attempt_count = 0;
                        status.last_error = None;
                    });
                    tracing::info!("Price feed connected");

                    match self.pump(transport).await {
                        PumpExit::Cancelled => return,
                        PumpExit::ConsumerGone => {
                            tracing::debug!("Inbound consumer dropped, stopping connection");
                            self.publish(|status| status.state = ConnectionState::Disconnected);
                            return;
                        }
                        PumpExit::Dropped(reason) => reason,
                    }
                }
                Err(e) => e.to_string(),
            };

            let Some(delay) = policy.next_delay() else {
                let error = ReconnectError::MaxAttemptsExceeded {
                    attempts: policy.attempt_count(),
                    last_error: failure,
                };
                tracing::error!(error = %error, "Price feed connection failed");
                metrics::record_connection_failure();
                self.publish(|status| {
                    status.state = ConnectionState::Failed;
                    status.last_error = Some(error.to_string());
                });
                return;
            };

            let attempt = policy.attempt_count();
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis(),
                error = %failure,
                "Price feed disconnected, reconnecting"
            );
            metrics::record_reconnect();
            self.publish(|status| {
                status.state = ConnectionState::Reconnecting;
                status.attempt_count = attempt;
                status.last_error = Some(failure);
            });

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            self.publish(|status| status.state = ConnectionState::Connecting);
        }
    }

    /// Run a connected transport until it drops or the episode is cancelled.
    async fn pump(&self, mut transport: Box<dyn DuplexTransport>) -> PumpExit {
        let mut heartbeat = Heartbeat::start(&self.config.heartbeat);

        let exit = loop {
            let step = tokio::select! {
                () = self.cancel.cancelled() => Step::Cancelled,
                () = heartbeat.tick() => Step::Keepalive,
                received = transport.recv_text() => Step::Received(received),
            };

            match step {
                Step::Cancelled => break PumpExit::Cancelled,
                Step::Keepalive => {
                    if let Err(reason) = self.send_keepalive(transport.as_mut()).await {
                        break PumpExit::Dropped(reason);
                    }
                }
                Step::Received(Ok(Some(text))) => {
                    metrics::record_frame_received(Protocol::PriceFeed);
                    let delivered = tokio::select! {
                        () = self.cancel.cancelled() => None,
                        sent = self.inbound.send(text) => Some(sent.is_ok()),
                    };
                    match delivered {
                        None => break PumpExit::Cancelled,
                        Some(false) => break PumpExit::ConsumerGone,
                        Some(true) => {}
                    }
                }
                Step::Received(Ok(None)) => {
                    break PumpExit::Dropped("connection closed by peer".to_string());
                }
                Step::Received(Err(e)) => break PumpExit::Dropped(e.to_string()),
            }
        };

        transport.close().await;
        exit
    }

    async fn send_keepalive(&self, transport: &mut dyn DuplexTransport) -> Result<(), String> {
        let ping = self
            .codec
            .encode(&KeepaliveMessage::ping())
            .map_err(|e| e.to_string())?;
        tracing::trace!("Sending price feed keepalive");
        transport.send_text(ping).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;

    enum Script {
        Accept {
            messages: Vec<&'static str>,
            then_close: bool,
        },
    }

    #[derive(Default)]
    struct ScriptedConnector {
        script: Mutex<VecDeque<Script>>,
        attempts: Mutex<Vec<Instant>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedConnector {
        /// Accepts per `script`, then refuses every further attempt.
        fn new(script: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            })
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().clone()
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn DuplexTransport>, TransportError> {
            self.attempts.lock().push(Instant::now());
            match self.script.lock().pop_front() {
                Some(Script::Accept {
                    messages,
                    then_close,
                }) => Ok(Box::new(ScriptedTransport {
                    inbound: messages.into_iter().map(String::from).collect(),
                    then_close,
                    sent: Arc::clone(&self.sent),
                })),
                None => Err(TransportError::Connect("connection refused".to_string())),
            }
        }
    }

    struct ScriptedTransport {
        inbound: VecDeque<String>,
        then_close: bool,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DuplexTransport for ScriptedTransport {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            self.sent.lock().push(text);
            Ok(())
        }

        async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
            if let Some(message) = self.inbound.pop_front() {
                return Ok(Some(message));
            }
            if self.then_close {
                return Ok(None);
            }
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    fn manager(
        connector: &Arc<ScriptedConnector>,
        max_attempts: u32,
    ) -> (ConnectionManager, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let config = ConnectionConfig {
            url: "ws://localhost:8000/ws/prices".to_string(),
            reconnect: ReconnectConfig {
                max_attempts,
                ..ReconnectConfig::default()
            },
            heartbeat: HeartbeatConfig::new(Duration::from_secs(30)),
        };
        let connector: Arc<dyn Connector> = Arc::clone(connector) as Arc<dyn Connector>;
        (ConnectionManager::new(config, connector, tx), rx)
    }

    fn stay_open(messages: Vec<&'static str>) -> Script {
        Script::Accept {
            messages,
            then_close: false,
        }
    }

    fn gaps_ms(attempts: &[Instant]) -> Vec<u128> {
        attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_until_failed() {
        let connector = ScriptedConnector::new(vec![]);
        let (manager, _rx) = manager(&connector, 3);
        let mut status = manager.watch_status();

        manager.open();
        let failed = status
            .wait_for(|s| s.state == ConnectionState::Failed)
            .await
            .unwrap()
            .clone();

        assert_eq!(failed.attempt_count, 3);
        let last_error = failed.last_error.unwrap();
        assert!(last_error.contains("(3) exceeded"), "{last_error}");
        assert!(last_error.contains("connection refused"), "{last_error}");

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 4);
        assert_eq!(gaps_ms(&attempts), vec![1000, 2000, 4000]);

        // No further attempts after Failed
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts().len(), 4);
        assert_eq!(manager.status().state, ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempt_limit_fails_on_first_refusal() {
        let connector = ScriptedConnector::new(vec![]);
        let (manager, _rx) = manager(&connector, 0);
        let mut status = manager.watch_status();

        manager.open();
        let failed = status
            .wait_for(|s| s.state == ConnectionState::Failed)
            .await
            .unwrap()
            .clone();

        assert_eq!(failed.attempt_count, 0);
        let last_error = failed.last_error.unwrap();
        assert!(last_error.contains("(0) exceeded"), "{last_error}");

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(manager.status().state, ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_and_resets_attempts() {
        let connector = ScriptedConnector::new(vec![
            Script::Accept {
                messages: vec![],
                then_close: true,
            },
            stay_open(vec![]),
        ]);
        let (manager, _rx) = manager(&connector, 10);
        let mut transitions = manager.transitions();

        manager.open();

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(transitions.recv().await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
        assert_eq!(gaps_ms(&connector.attempts()), vec![1000]);

        let status = manager.status();
        assert_eq!(status.attempt_count, 0);
        assert!(status.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnecting_status_reports_attempt_and_error() {
        let connector = ScriptedConnector::new(vec![]);
        let (manager, _rx) = manager(&connector, 10);
        let mut status = manager.watch_status();

        manager.open();
        let reconnecting = status
            .wait_for(|s| s.state == ConnectionState::Reconnecting)
            .await
            .unwrap()
            .clone();

        assert_eq!(reconnecting.attempt_count, 1);
        assert_eq!(
            reconnecting.last_error.as_deref(),
            Some("connect failed: connection refused")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn open_is_idempotent_while_live() {
        let connector = ScriptedConnector::new(vec![stay_open(vec![])]);
        let (manager, _rx) = manager(&connector, 10);
        let mut status = manager.watch_status();

        let first = manager.open();
        let second = manager.open();
        assert_eq!(first.id(), second.id());

        status
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(manager.open().id(), first.id());
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_cancels_pending_reconnect() {
        let connector = ScriptedConnector::new(vec![]);
        let (manager, _rx) = manager(&connector, 10);
        let mut status = manager.watch_status();

        manager.open();
        status
            .wait_for(|s| s.state == ConnectionState::Reconnecting)
            .await
            .unwrap();

        let mut transitions = manager.transitions();
        manager.close();
        manager.close();

        assert_eq!(manager.status(), ConnectionStatus::default());
        assert_eq!(transitions.try_recv().unwrap(), ConnectionState::Disconnected);
        assert!(transitions.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(manager.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn open_after_failed_starts_fresh_episode() {
        let connector = ScriptedConnector::new(vec![]);
        let (manager, _rx) = manager(&connector, 1);
        let mut status = manager.watch_status();

        let first = manager.open();
        status
            .wait_for(|s| s.state == ConnectionState::Failed)
            .await
            .unwrap();
        assert_eq!(connector.attempts().len(), 2);

        let second = manager.open();
        assert_ne!(first.id(), second.id());
        status
            .wait_for(|s| s.state == ConnectionState::Reconnecting)
            .await
            .unwrap();
        status
            .wait_for(|s| s.state == ConnectionState::Failed)
            .await
            .unwrap();
        assert_eq!(connector.attempts().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_sent_on_heartbeat_interval() {
        let connector = ScriptedConnector::new(vec![stay_open(vec![])]);
        let (manager, _rx) = manager(&connector, 10);
        let mut status = manager.watch_status();

        manager.open();
        status
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(connector.sent(), vec![r#"{"type":"ping"}"#; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_messages_forwarded_in_order() {
        let connector = ScriptedConnector::new(vec![stay_open(vec!["a", "b", "c"])]);
        let (manager, mut rx) = manager(&connector, 10);

        manager.open();
        for expected in ["a", "b", "c"] {
            assert_eq!(rx.recv().await.unwrap(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_consumer_disconnects() {
        let connector = ScriptedConnector::new(vec![stay_open(vec!["a"])]);
        let (manager, rx) = manager(&connector, 10);
        drop(rx);
        let mut transitions = manager.transitions();

        manager.open();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(transitions.recv().await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
            ]
        );
        assert_eq!(connector.attempts().len(), 1);
    }
}
