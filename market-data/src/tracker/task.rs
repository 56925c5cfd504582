//! Tracker task: one order book kept in sync with one exchange stream

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::bootstrap::BootstrapBuffer;
use super::liveness::Liveness;
use super::telemetry::TrackerMetrics;
use super::{TrackerState, TrackerStatus};
use crate::config::{BackoffConfig, TrackerConfig};
use crate::error::{MarketDataError, Result};
use crate::feed::{ExchangeFeedAdapter, FeedConnection};
use crate::messages::{Diff, FeedEvent, Snapshot};
use crate::orderbook::{ListenerRegistry, OrderBook};

/// How one epoch ended
enum EpochEnd {
    Stopped,
    Failed {
        error: MarketDataError,
        /// Time spent `Synced` before the failure
        synced_for: Duration,
    },
}

impl EpochEnd {
    fn failed(error: MarketDataError) -> Self {
        EpochEnd::Failed {
            error,
            synced_for: Duration::ZERO,
        }
    }
}

/// What to do with one item read from the connection
enum Routed {
    Diff(Diff),
    Skip,
    Fail(MarketDataError),
}

/// Synchronization state machine for a single trading pair
pub struct OrderBookTracker {
    trading_pair: String,
    adapter: Arc<dyn ExchangeFeedAdapter>,
    config: TrackerConfig,
    listeners: ListenerRegistry,
    metrics: TrackerMetrics,
    status: watch::Sender<TrackerStatus>,
    shutdown: watch::Receiver<bool>,
    backoff: Backoff,
    epoch: u64,
}

impl OrderBookTracker {
    pub fn new(
        trading_pair: &str,
        adapter: Arc<dyn ExchangeFeedAdapter>,
        config: TrackerConfig,
        listeners: ListenerRegistry,
        metrics: TrackerMetrics,
        status: watch::Sender<TrackerStatus>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let backoff = Backoff::new(config.backoff.clone());
        Self {
            trading_pair: trading_pair.to_string(),
            adapter,
            config,
            listeners,
            metrics,
            status,
            shutdown,
            backoff,
            epoch: 0,
        }
    }

    /// Run epochs until shutdown is signalled. There is no retry limit.
    pub async fn run(mut self) {
        info!(
            pair = %self.trading_pair,
            exchange = self.adapter.name(),
            "Starting order book tracker"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.epoch += 1;
            match self.run_epoch().await {
                EpochEnd::Stopped => break,
                EpochEnd::Failed { error, synced_for } => {
                    self.record_failure(&error);
                    self.set_state(TrackerState::Disconnected);

                    if self.backoff.reset_if_stable(synced_for) {
                        debug!(
                            pair = %self.trading_pair,
                            synced_secs = synced_for.as_secs(),
                            "Resetting backoff after stable epoch"
                        );
                    }
                    if !self.sleep_backoff().await {
                        break;
                    }
                }
            }
        }

        self.set_state(TrackerState::Disconnected);
        info!(pair = %self.trading_pair, epochs = self.epoch, "Order book tracker stopped");
    }

    /// Open a connection, run it to completion and always close it
    async fn run_epoch(&mut self) -> EpochEnd {
        self.set_state(TrackerState::Connecting);
        let pairs = [self.trading_pair.clone()];

        let opened = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut self.shutdown) => return EpochEnd::Stopped,
            opened = self.adapter.open_diff_stream(&pairs) => opened,
        };
        let mut conn = match opened {
            Ok(conn) => conn,
            Err(error) => return EpochEnd::failed(error),
        };

        info!(pair = %self.trading_pair, epoch = self.epoch, "Stream connected");
        let end = self.drive(conn.as_mut()).await;
        conn.close().await;
        end
    }

    async fn drive(&mut self, conn: &mut dyn FeedConnection) -> EpochEnd {
        self.set_state(TrackerState::Bootstrapping);

        let mut liveness = Liveness::new(self.config.message_timeout, self.config.ping_timeout);
        let mut buffer = BootstrapBuffer::new(self.config.buffer_capacity);
        let mut book = OrderBook::new(
            &self.trading_pair,
            self.adapter.sequence_rule(),
            self.listeners.clone(),
        );

        let snapshot_fetch = fetch_snapshot_with_retry(
            self.adapter.clone(),
            self.trading_pair.clone(),
            self.config.backoff.clone(),
            self.metrics.clone(),
        );
        tokio::pin!(snapshot_fetch);

        // Bootstrapping: buffer diffs until the snapshot lands
        let snapshot = loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => return EpochEnd::Stopped,
                snapshot = &mut snapshot_fetch => break snapshot,
                event = liveness.next_event(conn) => match self.route(event) {
                    Routed::Diff(diff) => {
                        if let Err(error) = buffer.push(diff) {
                            return EpochEnd::failed(error);
                        }
                    }
                    Routed::Skip => {}
                    Routed::Fail(error) => return EpochEnd::failed(error),
                },
            }
        };

        if let Err(error) = self.bootstrap(&mut book, &snapshot, &mut buffer) {
            return EpochEnd::failed(error);
        }

        let synced_at = Instant::now();
        self.set_state(TrackerState::Synced);
        self.publish_view(&book);
        info!(
            pair = %self.trading_pair,
            epoch = self.epoch,
            last_update_id = book.last_update_id(),
            "Order book synced"
        );

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => return EpochEnd::Stopped,
                event = liveness.next_event(conn) => match self.route(event) {
                    // still in flight when the snapshot landed
                    Routed::Diff(diff) if diff.key() <= book.last_update_id() => {
                        self.metrics
                            .discarded_diffs
                            .with_label_values(&[&self.trading_pair])
                            .inc();
                    }
                    Routed::Diff(diff) => match book.apply_diff(&diff) {
                        Ok(()) => {
                            self.metrics
                                .diffs_applied
                                .with_label_values(&[&self.trading_pair])
                                .inc();
                            self.publish_view(&book);
                        }
                        Err(error) => {
                            return EpochEnd::Failed {
                                error,
                                synced_for: synced_at.elapsed(),
                            }
                        }
                    },
                    Routed::Skip => {}
                    Routed::Fail(error) => {
                        return EpochEnd::Failed {
                            error,
                            synced_for: synced_at.elapsed(),
                        }
                    }
                },
            }
        }
    }

    /// Apply the snapshot, then replay the buffered diffs newer than it
    fn bootstrap(
        &self,
        book: &mut OrderBook,
        snapshot: &Snapshot,
        buffer: &mut BootstrapBuffer,
    ) -> Result<()> {
        book.apply_snapshot(snapshot)?;

        let replay = buffer.drain_after(snapshot.update_id);
        if replay.discarded > 0 {
            self.metrics
                .discarded_diffs
                .with_label_values(&[&self.trading_pair])
                .inc_by(replay.discarded as u64);
        }
        debug!(
            pair = %self.trading_pair,
            snapshot_id = snapshot.update_id,
            discarded = replay.discarded,
            replayed = replay.apply.len(),
            "Replaying buffered diffs"
        );

        for diff in &replay.apply {
            book.apply_diff(diff)?;
            self.metrics
                .diffs_applied
                .with_label_values(&[&self.trading_pair])
                .inc();
        }
        Ok(())
    }

    /// Decide what an item read from the connection means for this book
    ///
    /// Trades go straight to listeners in every phase. Decode failures drop
    /// the message without ending the epoch.
    fn route(&self, event: Result<FeedEvent>) -> Routed {
        match event {
            Ok(FeedEvent::Diff(diff)) => {
                if diff.trading_pair.eq_ignore_ascii_case(&self.trading_pair) {
                    Routed::Diff(diff)
                } else {
                    Routed::Skip
                }
            }
            Ok(FeedEvent::Trade(trade)) => {
                if trade.trading_pair.eq_ignore_ascii_case(&self.trading_pair) {
                    self.listeners.notify_trade(&trade);
                }
                Routed::Skip
            }
            Ok(FeedEvent::Heartbeat) => Routed::Skip,
            Ok(FeedEvent::Closed(reason)) => {
                Routed::Fail(MarketDataError::ConnectionClosed(reason))
            }
            Err(MarketDataError::Decode(reason)) => {
                warn!(pair = %self.trading_pair, error = %reason, "Dropping undecodable message");
                self.metrics
                    .decode_errors
                    .with_label_values(&[&self.trading_pair])
                    .inc();
                Routed::Skip
            }
            Err(error) => Routed::Fail(error),
        }
    }

    fn record_failure(&self, error: &MarketDataError) {
        let reason = error.resync_reason();
        self.metrics
            .resyncs
            .with_label_values(&[&self.trading_pair, reason])
            .inc();

        if error.is_fatal() {
            error!(
                pair = %self.trading_pair,
                epoch = self.epoch,
                error = %error,
                "Resource exhausted, tracker will keep retrying"
            );
        } else {
            warn!(
                pair = %self.trading_pair,
                epoch = self.epoch,
                reason,
                error = %error,
                "Epoch ended, resynchronizing"
            );
        }

        let message = error.to_string();
        self.status.send_modify(|status| status.last_error = Some(message));
    }

    /// Publish a state change; views are dropped on every non-synced state
    fn set_state(&self, state: TrackerState) {
        let epoch = self.epoch;
        let synced_pairs = &self.metrics.synced_pairs;
        self.status.send_modify(|status| {
            match (status.is_synced(), state == TrackerState::Synced) {
                (true, false) => synced_pairs.dec(),
                (false, true) => synced_pairs.inc(),
                _ => {}
            }
            status.state = state;
            status.epoch = epoch;
            if state != TrackerState::Synced {
                status.view = None;
            }
        });
    }

    fn publish_view(&self, book: &OrderBook) {
        let view = Arc::new(book.snapshot_view());
        self.status.send_modify(|status| status.view = Some(view));
    }

    /// Sleep for the next backoff delay. Returns false if stopped meanwhile.
    async fn sleep_backoff(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        info!(
            pair = %self.trading_pair,
            attempt = self.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after backoff"
        );

        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut self.shutdown) => false,
            _ = sleep(delay) => true,
        }
    }
}

/// Fetch a snapshot, retrying with backoff until one arrives
///
/// Owns everything it needs so it can run alongside the stream reads.
async fn fetch_snapshot_with_retry(
    adapter: Arc<dyn ExchangeFeedAdapter>,
    trading_pair: String,
    backoff: BackoffConfig,
    metrics: TrackerMetrics,
) -> Snapshot {
    let mut backoff = Backoff::new(backoff);
    loop {
        match adapter.fetch_snapshot(&trading_pair).await {
            Ok(snapshot) => {
                debug!(
                    pair = %trading_pair,
                    update_id = snapshot.update_id,
                    levels = snapshot.levels.len(),
                    "Snapshot received"
                );
                return snapshot;
            }
            Err(e) => {
                metrics
                    .snapshot_failures
                    .with_label_values(&[&trading_pair])
                    .inc();
                let delay = backoff.next_delay();
                warn!(
                    pair = %trading_pair,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Snapshot fetch failed"
                );
                sleep(delay).await;
            }
        }
    }
}

/// Resolves once shutdown is requested or the manager is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_shutdown_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_for_shutdown(&mut rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_already_set() {
        let (_tx, mut rx) = watch::channel(true);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .unwrap();
    }
}
