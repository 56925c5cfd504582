//! Manager owning one tracker task per trading pair

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use prometheus::Registry;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::task::OrderBookTracker;
use super::telemetry::TrackerMetrics;
use super::{TrackerState, TrackerStatus};
use crate::config::TrackerConfig;
use crate::error::{MarketDataError, Result};
use crate::feed::ExchangeFeedAdapter;
use crate::orderbook::{BookListener, BookView, ListenerId, ListenerRegistry};

struct TrackerHandle {
    shutdown: watch::Sender<bool>,
    status: watch::Receiver<TrackerStatus>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// Signal the tracker and wait until its connection is closed
    async fn stop(self, trading_pair: &str) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!(pair = %trading_pair, error = %e, "Tracker task panicked");
            }
        }
        debug!(pair = %trading_pair, "Tracker stopped");
    }
}

/// Entry point for starting, stopping and reading order book trackers
///
/// The pair map is only mutated by `start` and `stop`; readers go through
/// the status channels and never wait on a tracker.
pub struct OrderBookTrackerManager {
    adapter: Arc<dyn ExchangeFeedAdapter>,
    config: TrackerConfig,
    listeners: ListenerRegistry,
    registry: Registry,
    metrics: TrackerMetrics,
    trackers: RwLock<HashMap<String, TrackerHandle>>,
}

impl OrderBookTrackerManager {
    /// Create a manager with its own metrics registry
    pub fn new(adapter: Arc<dyn ExchangeFeedAdapter>, config: TrackerConfig) -> Result<Self> {
        Self::with_registry(adapter, config, Registry::new())
    }

    /// Create a manager registering its metrics into `registry`
    pub fn with_registry(
        adapter: Arc<dyn ExchangeFeedAdapter>,
        config: TrackerConfig,
        registry: Registry,
    ) -> Result<Self> {
        let metrics = TrackerMetrics::register(&registry)?;
        Ok(Self {
            adapter,
            config,
            listeners: ListenerRegistry::new(),
            registry,
            metrics,
            trackers: RwLock::new(HashMap::new()),
        })
    }

    /// Start a tracker for every pair not already tracked
    ///
    /// Returns the pairs that were actually started.
    pub async fn start(&self, trading_pairs: &[String]) -> Vec<String> {
        let mut trackers = self.trackers.write().await;
        let mut started = Vec::new();

        for pair in trading_pairs {
            if trackers.contains_key(pair) {
                debug!(pair = %pair, "Tracker already running");
                continue;
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (status_tx, status_rx) = watch::channel(TrackerStatus::default());
            let tracker = OrderBookTracker::new(
                pair,
                self.adapter.clone(),
                self.config.clone(),
                self.listeners.clone(),
                self.metrics.clone(),
                status_tx,
                shutdown_rx,
            );

            let task = tokio::spawn(tracker.run());
            trackers.insert(
                pair.clone(),
                TrackerHandle {
                    shutdown: shutdown_tx,
                    status: status_rx,
                    task,
                },
            );
            started.push(pair.clone());
        }

        if !started.is_empty() {
            info!(
                exchange = self.adapter.name(),
                pairs = ?started,
                total = trackers.len(),
                "Started order book trackers"
            );
        }
        started
    }

    /// Stop one tracker; resolves after its connection is closed
    pub async fn stop(&self, trading_pair: &str) -> bool {
        let handle = self.trackers.write().await.remove(trading_pair);
        match handle {
            Some(handle) => {
                handle.stop(trading_pair).await;
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let handles: Vec<(String, TrackerHandle)> =
            self.trackers.write().await.drain().collect();
        let count = handles.len();

        join_all(
            handles
                .into_iter()
                .map(|(pair, handle)| async move { handle.stop(&pair).await }),
        )
        .await;

        info!(count, "Stopped all order book trackers");
    }

    /// Current view of a synced book; `None` while not ready or not tracked
    pub async fn current_book(&self, trading_pair: &str) -> Option<Arc<BookView>> {
        let trackers = self.trackers.read().await;
        let handle = trackers.get(trading_pair)?;
        let view = handle.status.borrow().ready_view();
        view
    }

    /// Pairs whose tracker is currently synced
    pub async fn ready_pairs(&self) -> Vec<String> {
        let trackers = self.trackers.read().await;
        let mut pairs: Vec<String> = trackers
            .iter()
            .filter(|(_, handle)| handle.status.borrow().is_synced())
            .map(|(pair, _)| pair.clone())
            .collect();
        pairs.sort();
        pairs
    }

    pub async fn tracked_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.trackers.read().await.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    pub async fn status(&self, trading_pair: &str) -> Option<TrackerStatus> {
        let trackers = self.trackers.read().await;
        let handle = trackers.get(trading_pair)?;
        let status = handle.status.borrow().clone();
        Some(status)
    }

    /// Subscribe to status changes of one tracker
    pub async fn watch(&self, trading_pair: &str) -> Option<watch::Receiver<TrackerStatus>> {
        let trackers = self.trackers.read().await;
        trackers.get(trading_pair).map(|handle| handle.status.clone())
    }

    /// True when at least one pair is tracked and every tracked pair is synced
    pub async fn is_ready(&self) -> bool {
        let trackers = self.trackers.read().await;
        !trackers.is_empty()
            && trackers
                .values()
                .all(|handle| handle.status.borrow().is_synced())
    }

    /// Wait until every tracked pair is synced
    pub async fn wait_until_ready(&self, limit: Duration) -> Result<()> {
        let receivers: Vec<(String, watch::Receiver<TrackerStatus>)> = {
            let trackers = self.trackers.read().await;
            if trackers.is_empty() {
                return Err(MarketDataError::NotReady("no trading pairs tracked".to_string()));
            }
            trackers
                .iter()
                .map(|(pair, handle)| (pair.clone(), handle.status.clone()))
                .collect()
        };

        let all_synced = join_all(receivers.into_iter().map(|(pair, mut rx)| async move {
            rx.wait_for(|status| status.state == TrackerState::Synced)
                .await
                .map(|_| ())
                .map_err(|_| MarketDataError::NotReady(format!("{pair} tracker stopped")))
        }));

        match timeout(limit, all_synced).await {
            Ok(results) => results.into_iter().collect(),
            Err(_) => {
                let pending = self
                    .tracked_pairs()
                    .await
                    .len()
                    .saturating_sub(self.ready_pairs().await.len());
                Err(MarketDataError::NotReady(format!(
                    "{pending} pair(s) not synced after {limit:?}"
                )))
            }
        }
    }

    /// Register a listener for book updates and trades of every pair
    pub fn add_listener(&self, listener: Arc<dyn BookListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Metrics registry holding the tracker counters
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
