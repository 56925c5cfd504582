//! Scripted exchange adapter driven through tokio channels

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use orderbook_sync::config::BackoffConfig;
use orderbook_sync::{
    BookListener, Diff, ExchangeFeedAdapter, FeedConnection, FeedEvent, LevelUpdate,
    MarketDataError, OrderBookTrackerManager, PairMetadata, Result, SequenceRule, Snapshot,
    TopOfBook, Trade, TrackerConfig, TrackerStatus,
};

pub const PAIR: &str = "BTCUSDT";
pub const WAIT: Duration = Duration::from_secs(5);

/// Test-side handle of one opened stream
pub struct StreamHandle {
    events: mpsc::UnboundedSender<Result<FeedEvent>>,
    closed: Arc<AtomicBool>,
}

impl StreamHandle {
    pub fn send(&self, event: Result<FeedEvent>) {
        // the tracker may already have torn the stream down
        let _ = self.events.send(event);
    }

    pub fn diff(&self, first: u64, last: u64, levels: Vec<LevelUpdate>) {
        self.send(Ok(FeedEvent::Diff(diff(first, last, levels))));
    }

    pub fn trade(&self, trade: Trade) {
        self.send(Ok(FeedEvent::Trade(trade)));
    }

    pub fn close_from_exchange(&self, reason: &str) {
        self.send(Ok(FeedEvent::Closed(reason.to_string())));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedConnection {
    events: mpsc::UnboundedReceiver<Result<FeedEvent>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FeedConnection for ScriptedConnection {
    async fn next_event(&mut self) -> Result<FeedEvent> {
        match self.events.recv().await {
            Some(event) => event,
            None => Ok(FeedEvent::Closed("script ended".to_string())),
        }
    }

    /// Never answered; a silent script looks like a dead peer
    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Adapter whose snapshots and streams are fed by the test
pub struct ScriptedAdapter {
    rule: SequenceRule,
    snapshots: AsyncMutex<mpsc::UnboundedReceiver<Result<Snapshot>>>,
    connections: mpsc::UnboundedSender<StreamHandle>,
}

#[async_trait]
impl ExchangeFeedAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn sequence_rule(&self) -> SequenceRule {
        self.rule
    }

    async fn fetch_snapshot(&self, trading_pair: &str) -> Result<Snapshot> {
        let mut snapshots = self.snapshots.lock().await;
        match snapshots.recv().await {
            Some(snapshot) => snapshot,
            None => Err(MarketDataError::SnapshotFetch {
                pair: trading_pair.to_string(),
                reason: "script ended".to_string(),
            }),
        }
    }

    async fn open_diff_stream(&self, _trading_pairs: &[String]) -> Result<Box<dyn FeedConnection>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.connections.send(StreamHandle {
            events: tx,
            closed: closed.clone(),
        });
        Ok(Box::new(ScriptedConnection { events: rx, closed }))
    }

    async fn discover_trading_pairs(&self) -> Result<HashMap<String, PairMetadata>> {
        Ok(HashMap::new())
    }
}

pub struct Harness {
    pub manager: OrderBookTrackerManager,
    snapshots: mpsc::UnboundedSender<Result<Snapshot>>,
    connections: mpsc::UnboundedReceiver<StreamHandle>,
}

impl Harness {
    pub fn new(rule: SequenceRule) -> Self {
        Self::with_config(rule, fast_config())
    }

    pub fn with_config(rule: SequenceRule, config: TrackerConfig) -> Self {
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let adapter = Arc::new(ScriptedAdapter {
            rule,
            snapshots: AsyncMutex::new(snapshot_rx),
            connections: conn_tx,
        });
        let manager = OrderBookTrackerManager::new(adapter, config).unwrap();
        Self {
            manager,
            snapshots: snapshot_tx,
            connections: conn_rx,
        }
    }

    pub fn send_snapshot(&self, snapshot: Snapshot) {
        self.snapshots.send(Ok(snapshot)).unwrap();
    }

    pub fn fail_snapshot(&self) {
        self.snapshots
            .send(Err(MarketDataError::SnapshotFetch {
                pair: PAIR.to_string(),
                reason: "HTTP 503".to_string(),
            }))
            .unwrap();
    }

    pub async fn next_connection(&mut self) -> StreamHandle {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection opened")
            .expect("adapter dropped")
    }

    pub async fn no_new_connection(&mut self, within: Duration) -> bool {
        tokio::time::timeout(within, self.connections.recv())
            .await
            .is_err()
    }

    pub async fn start(&mut self) -> watch::Receiver<TrackerStatus> {
        self.manager.start(&[PAIR.to_string()]).await;
        self.manager.watch(PAIR).await.unwrap()
    }
}

/// Backoff and liveness settings small enough for tests
pub fn fast_config() -> TrackerConfig {
    TrackerConfig {
        backoff: BackoffConfig {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter: 0.0,
            reset_after: Duration::from_secs(60),
        },
        buffer_capacity: 64,
        message_timeout: Duration::from_secs(30),
        ping_timeout: Duration::from_secs(10),
    }
}

/// Sum of every sample of a counter family
pub fn counter_total(manager: &OrderBookTrackerManager, name: &str) -> f64 {
    manager
        .registry()
        .gather()
        .iter()
        .filter(|family| family.get_name() == name)
        .flat_map(|family| family.get_metric())
        .map(|metric| metric.get_counter().get_value())
        .sum()
}

pub async fn wait_for<F>(rx: &mut watch::Receiver<TrackerStatus>, mut f: F) -> TrackerStatus
where
    F: FnMut(&TrackerStatus) -> bool,
{
    let status = tokio::time::timeout(WAIT, rx.wait_for(|status| f(status)))
        .await
        .expect("timed out waiting for tracker status")
        .expect("tracker status channel closed");
    status.clone()
}

pub fn snapshot(update_id: u64, levels: Vec<LevelUpdate>) -> Snapshot {
    Snapshot {
        trading_pair: PAIR.to_string(),
        update_id,
        levels,
    }
}

pub fn diff(first: u64, last: u64, levels: Vec<LevelUpdate>) -> Diff {
    Diff {
        trading_pair: PAIR.to_string(),
        first_update_id: first,
        final_update_id: last,
        timestamp: Utc::now(),
        levels,
    }
}

pub fn bid(price: i64, quantity: i64) -> LevelUpdate {
    LevelUpdate::bid(Decimal::from(price), Decimal::from(quantity))
}

pub fn ask(price: i64, quantity: i64) -> LevelUpdate {
    LevelUpdate::ask(Decimal::from(price), Decimal::from(quantity))
}

/// Listener recording everything it is told
#[derive(Default)]
pub struct Recorder {
    pub updates: Mutex<Vec<TopOfBook>>,
    pub trades: Mutex<Vec<Trade>>,
}

impl BookListener for Recorder {
    fn on_book_update(&self, update: &TopOfBook) -> Result<()> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }

    fn on_trade(&self, trade: &Trade) -> Result<()> {
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }
}

/// Listener with a bug in it
pub struct Panicking;

impl BookListener for Panicking {
    fn on_book_update(&self, _update: &TopOfBook) -> Result<()> {
        panic!("listener bug");
    }
}
