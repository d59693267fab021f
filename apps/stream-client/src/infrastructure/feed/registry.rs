//! Feed Registry
//!
//! Shares one price feed connection among every consumer interested in the
//! same key set. Consumers hold a [`FeedLease`]; the connection is opened
//! by the first lease for a key set and closed when the last lease is
//! released or dropped.
//!
//! # Design
//!
//! The registry tracks, per key set:
//! - The running [`PriceFeed`]
//! - A reference count of outstanding leases
//!
//! Leases reach back into the registry through a weak reference, so a
//! registry dropped before its leases does not keep feeds alive.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use super::connection::ConnectionHandle;
use super::feed::{PriceFeed, PriceFeedConfig};
use crate::application::ports::Connector;
use crate::domain::connection::{ConnectionState, ConnectionStatus};
use crate::domain::market::{PriceBatch, SubscriptionKeys};
use crate::infrastructure::metrics;

struct FeedEntry {
    feed: Arc<PriceFeed>,
    leases: usize,
}

struct RegistryInner {
    config: PriceFeedConfig,
    connector: Arc<dyn Connector>,
    feeds: Mutex<HashMap<SubscriptionKeys, FeedEntry>>,
}

impl RegistryInner {
    fn release(&self, keys: &SubscriptionKeys) {
        let closed = {
            let mut feeds = self.feeds.lock();
            let Some(entry) = feeds.get_mut(keys) else {
                return;
            };

            entry.leases = entry.leases.saturating_sub(1);
            let closed = if entry.leases == 0 {
                feeds.remove(keys).map(|entry| entry.feed)
            } else {
                None
            };
            metrics::set_active_feeds(feeds.len());
            closed
        };

        if let Some(feed) = closed {
            tracing::debug!(keys = %keys, "Last lease released, closing price feed");
            feed.close();
        }
    }
}

/// Reference-counted pool of price feeds keyed by subscription set.
#[derive(Clone)]
pub struct FeedRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for FeedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRegistry")
            .field("active_feeds", &self.active_feeds())
            .finish_non_exhaustive()
    }
}

impl FeedRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: PriceFeedConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                connector,
                feeds: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Lease the feed for `keys`, starting it if no consumer holds it yet.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn acquire(&self, keys: SubscriptionKeys) -> FeedLease {
        let mut feeds = self.inner.feeds.lock();
        let entry = feeds.entry(keys.clone()).or_insert_with(|| {
            tracing::debug!(keys = %keys, "Starting shared price feed");
            FeedEntry {
                feed: Arc::new(PriceFeed::start(
                    keys.clone(),
                    self.inner.config.clone(),
                    Arc::clone(&self.inner.connector),
                )),
                leases: 0,
            }
        });
        entry.leases += 1;
        let feed = Arc::clone(&entry.feed);
        metrics::set_active_feeds(feeds.len());

        FeedLease {
            keys,
            feed,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Number of distinct feeds currently running.
    #[must_use]
    pub fn active_feeds(&self) -> usize {
        self.inner.feeds.lock().len()
    }

    /// Outstanding leases for `keys`.
    #[must_use]
    pub fn lease_count(&self, keys: &SubscriptionKeys) -> usize {
        self.inner
            .feeds
            .lock()
            .get(keys)
            .map_or(0, |entry| entry.leases)
    }
}

/// A consumer's share of a price feed. Releases on drop.
pub struct FeedLease {
    keys: SubscriptionKeys,
    feed: Arc<PriceFeed>,
    registry: Weak<RegistryInner>,
}

impl std::fmt::Debug for FeedLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedLease")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl FeedLease {
    /// Key set of the leased feed.
    #[must_use]
    pub const fn keys(&self) -> &SubscriptionKeys {
        &self.keys
    }

    /// Receive coalesced batches from now on.
    #[must_use]
    pub fn batches(&self) -> broadcast::Receiver<Arc<PriceBatch>> {
        self.feed.subscribe()
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.feed.status()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.feed.watch_status()
    }

    /// Subscribe to connection state transitions.
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.feed.transitions()
    }

    /// Re-open the shared connection after it failed.
    pub fn reopen(&self) -> ConnectionHandle {
        self.feed.reopen()
    }

    /// Give the lease back explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for FeedLease {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.keys);
        }
    }
}
