//! Core order book implementation
//!
//! Uses BTreeMap for efficient sorted price level management. Every mutation
//! either applies completely or leaves the book untouched: sequence and level
//! checks run before anything changes, and a diff that would cross the book is
//! rolled back before the error is returned.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{BookView, Level, ListenerRegistry, OrderBookMetrics, SequenceRule, Side, TopOfBook};
use crate::error::{MarketDataError, Result};
use crate::messages::{Diff, LevelUpdate, Snapshot};

/// Order book for a single trading pair
///
/// Books are owned by their tracker; callers read them through
/// `OrderBookTrackerManager::current_book`.
///
/// ```compile_fail
/// use orderbook_sync::orderbook::{ListenerRegistry, OrderBook, SequenceRule};
///
/// let _book = OrderBook::new("BTCUSDT", SequenceRule::Range, ListenerRegistry::new());
/// ```
#[derive(Debug)]
pub struct OrderBook {
    trading_pair: String,
    /// Bids sorted by price descending (highest first)
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    /// Asks sorted by price ascending (lowest first)
    asks: BTreeMap<Decimal, Decimal>,
    /// Ordering key of the last applied snapshot or diff
    last_update_id: u64,
    /// Whether the book has been initialized with a snapshot
    initialized: bool,
    /// Successor rule declared by the feed adapter
    rule: SequenceRule,
    /// Timestamp of last update
    last_update_time: DateTime<Utc>,
    listeners: ListenerRegistry,
}

/// Previous quantity of a level touched by a diff, for rollback
struct Undo {
    side: Side,
    price: Decimal,
    previous: Option<Decimal>,
}

impl OrderBook {
    /// Create a new empty order book. Only trackers own books.
    pub(crate) fn new(trading_pair: &str, rule: SequenceRule, listeners: ListenerRegistry) -> Self {
        Self {
            trading_pair: trading_pair.to_string(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            initialized: false,
            rule,
            last_update_time: Utc::now(),
            listeners,
        }
    }

    /// Book detached from any tracker, for benchmarks
    #[cfg(feature = "bench")]
    #[doc(hidden)]
    pub fn standalone(trading_pair: &str, rule: SequenceRule) -> Self {
        Self::new(trading_pair, rule, ListenerRegistry::new())
    }

    /// Replace every level with the snapshot's content
    ///
    /// A snapshot containing a negative quantity or a crossed spread is
    /// rejected and the previous state is kept.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut bids = BTreeMap::new();
        let mut asks = BTreeMap::new();

        for level in &snapshot.levels {
            self.validate_level(level)?;
            if level.quantity.is_zero() {
                continue;
            }
            match level.side {
                Side::Bid => {
                    bids.insert(Reverse(level.price), level.quantity);
                }
                Side::Ask => {
                    asks.insert(level.price, level.quantity);
                }
            }
        }

        let best_bid = bids.keys().next().map(|Reverse(p)| *p);
        let best_ask = asks.keys().next().copied();
        if let (Some(bid), Some(ask)) = (best_bid, best_ask) {
            if bid >= ask {
                return Err(self.crossed(snapshot.update_id, bid, ask));
            }
        }

        self.bids = bids;
        self.asks = asks;
        self.last_update_id = snapshot.update_id;
        self.last_update_time = Utc::now();
        self.initialized = true;

        debug!(
            pair = %self.trading_pair,
            update_id = self.last_update_id,
            bid_levels = self.bids.len(),
            ask_levels = self.asks.len(),
            "Snapshot applied"
        );

        self.listeners.notify_book_update(&self.top_of_book());
        Ok(())
    }

    /// Apply a sequenced diff
    ///
    /// Fails with [`MarketDataError::SequenceGap`] if the diff is not the
    /// declared successor of the last applied update, and with
    /// [`MarketDataError::CrossedBook`] if applying it would cross the spread.
    /// The book is unchanged on every error.
    pub fn apply_diff(&mut self, diff: &Diff) -> Result<()> {
        if !self.initialized
            || !self
                .rule
                .accepts(self.last_update_id, diff.first_update_id, diff.final_update_id)
        {
            return Err(MarketDataError::SequenceGap {
                pair: self.trading_pair.clone(),
                expected: self.last_update_id.saturating_add(1),
                first: diff.first_update_id,
                last: diff.final_update_id,
            });
        }

        for level in &diff.levels {
            self.validate_level(level)?;
        }

        let mut undo = Vec::with_capacity(diff.levels.len());
        for level in &diff.levels {
            let previous = self.update_side(level);
            undo.push(Undo {
                side: level.side,
                price: level.price,
                previous,
            });
        }

        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid.price >= ask.price {
                self.rollback(undo);
                let err = self.crossed(diff.final_update_id, bid.price, ask.price);
                warn!(
                    pair = %self.trading_pair,
                    last_update_id = self.last_update_id,
                    first_update_id = diff.first_update_id,
                    final_update_id = diff.final_update_id,
                    best_bid = %bid.price,
                    best_ask = %ask.price,
                    "Rejected diff that would cross the book"
                );
                return Err(err);
            }
        }

        self.last_update_id = diff.final_update_id;
        self.last_update_time = diff.timestamp;

        self.listeners.notify_book_update(&self.top_of_book());
        Ok(())
    }

    /// Update a single price level, returning its previous quantity
    fn update_side(&mut self, level: &LevelUpdate) -> Option<Decimal> {
        match level.side {
            Side::Bid => {
                if level.quantity.is_zero() {
                    self.bids.remove(&Reverse(level.price))
                } else {
                    self.bids.insert(Reverse(level.price), level.quantity)
                }
            }
            Side::Ask => {
                if level.quantity.is_zero() {
                    self.asks.remove(&level.price)
                } else {
                    self.asks.insert(level.price, level.quantity)
                }
            }
        }
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match (entry.side, entry.previous) {
                (Side::Bid, Some(qty)) => {
                    self.bids.insert(Reverse(entry.price), qty);
                }
                (Side::Bid, None) => {
                    self.bids.remove(&Reverse(entry.price));
                }
                (Side::Ask, Some(qty)) => {
                    self.asks.insert(entry.price, qty);
                }
                (Side::Ask, None) => {
                    self.asks.remove(&entry.price);
                }
            }
        }
    }

    fn validate_level(&self, level: &LevelUpdate) -> Result<()> {
        if level.quantity < Decimal::ZERO || level.price <= Decimal::ZERO {
            return Err(MarketDataError::InvalidLevel {
                pair: self.trading_pair.clone(),
                price: level.price,
                quantity: level.quantity,
            });
        }
        Ok(())
    }

    fn crossed(&self, update_id: u64, best_bid: Decimal, best_ask: Decimal) -> MarketDataError {
        MarketDataError::CrossedBook {
            pair: self.trading_pair.clone(),
            update_id,
            best_bid,
            best_ask,
        }
    }

    /// Get best bid level
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first_key_value().map(|(Reverse(p), q)| Level {
            price: *p,
            quantity: *q,
        })
    }

    /// Get best ask level
    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first_key_value().map(|(p, q)| Level {
            price: *p,
            quantity: *q,
        })
    }

    /// Best `levels` entries of one side, best first
    pub fn depth(&self, side: Side, levels: usize) -> Vec<Level> {
        match side {
            Side::Bid => self
                .bids
                .iter()
                .take(levels)
                .map(|(Reverse(p), q)| Level {
                    price: *p,
                    quantity: *q,
                })
                .collect(),
            Side::Ask => self
                .asks
                .iter()
                .take(levels)
                .map(|(p, q)| Level {
                    price: *p,
                    quantity: *q,
                })
                .collect(),
        }
    }

    /// Quantity resting at exactly `price`
    pub fn quantity_at(&self, side: Side, price: Decimal) -> Option<Decimal> {
        match side {
            Side::Bid => self.bids.get(&Reverse(price)).copied(),
            Side::Ask => self.asks.get(&price).copied(),
        }
    }

    pub fn trading_pair(&self) -> &str {
        &self.trading_pair
    }

    /// Check if the book is initialized
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Get last update ID
    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn sequence_rule(&self) -> SequenceRule {
        self.rule
    }

    /// Copy both sides into an immutable view for readers
    pub fn snapshot_view(&self) -> BookView {
        let bids = self.depth(Side::Bid, usize::MAX);
        let asks = self.depth(Side::Ask, usize::MAX);
        let metrics = OrderBookMetrics::from_levels(&bids, &asks);
        BookView {
            trading_pair: self.trading_pair.clone(),
            timestamp: self.last_update_time,
            last_update_id: self.last_update_id,
            bids,
            asks,
            metrics,
        }
    }

    pub fn top_of_book(&self) -> TopOfBook {
        TopOfBook {
            trading_pair: self.trading_pair.clone(),
            update_id: self.last_update_id,
            timestamp: self.last_update_time,
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::MockBookListener;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn snapshot(update_id: u64) -> Snapshot {
        Snapshot {
            trading_pair: "BTCUSDT".to_string(),
            update_id,
            levels: vec![
                LevelUpdate::bid(dec!(50000), dec!(1.0)),
                LevelUpdate::bid(dec!(49999), dec!(2.0)),
                LevelUpdate::ask(dec!(50001), dec!(1.5)),
                LevelUpdate::ask(dec!(50002), dec!(2.5)),
            ],
        }
    }

    fn diff(first: u64, last: u64, levels: Vec<LevelUpdate>) -> Diff {
        Diff {
            trading_pair: "BTCUSDT".to_string(),
            first_update_id: first,
            final_update_id: last,
            timestamp: Utc::now(),
            levels,
        }
    }

    fn create_test_book() -> OrderBook {
        let mut book = OrderBook::new("BTCUSDT", SequenceRule::Range, ListenerRegistry::new());
        book.apply_snapshot(&snapshot(100)).unwrap();
        book
    }

    #[test]
    fn test_snapshot_replaces_levels() {
        let mut book = create_test_book();
        assert_eq!(book.last_update_id(), 100);
        assert!(book.is_initialized());
        assert_eq!(book.best_bid().unwrap().price, dec!(50000));
        assert_eq!(book.best_ask().unwrap().price, dec!(50001));

        let replacement = Snapshot {
            trading_pair: "BTCUSDT".to_string(),
            update_id: 250,
            levels: vec![
                LevelUpdate::bid(dec!(100), dec!(1)),
                LevelUpdate::ask(dec!(101), dec!(0)),
                LevelUpdate::ask(dec!(102), dec!(3)),
            ],
        };
        book.apply_snapshot(&replacement).unwrap();

        let view = book.snapshot_view();
        assert_eq!(view.last_update_id, 250);
        assert_eq!(
            view.bids,
            vec![Level {
                price: dec!(100),
                quantity: dec!(1)
            }]
        );
        // zero-sized snapshot levels are never stored
        assert_eq!(
            view.asks,
            vec![Level {
                price: dec!(102),
                quantity: dec!(3)
            }]
        );
    }

    #[test]
    fn test_crossed_snapshot_rejected() {
        let mut book = create_test_book();
        let crossed = Snapshot {
            trading_pair: "BTCUSDT".to_string(),
            update_id: 300,
            levels: vec![
                LevelUpdate::bid(dec!(101), dec!(1)),
                LevelUpdate::ask(dec!(100), dec!(1)),
            ],
        };
        let err = book.apply_snapshot(&crossed).unwrap_err();
        assert!(matches!(err, MarketDataError::CrossedBook { .. }));
        assert_eq!(book.last_update_id(), 100);
        assert_eq!(book.best_bid().unwrap().price, dec!(50000));
    }

    #[test]
    fn test_apply_diff() {
        let mut book = create_test_book();
        let update = diff(
            101,
            102,
            vec![
                LevelUpdate::bid(dec!(50000), dec!(2.0)),
                LevelUpdate::ask(dec!(50003), dec!(4.0)),
            ],
        );

        book.apply_diff(&update).unwrap();
        assert_eq!(book.last_update_id(), 102);
        assert_eq!(book.quantity_at(Side::Bid, dec!(50000)), Some(dec!(2.0)));
        assert_eq!(book.quantity_at(Side::Ask, dec!(50003)), Some(dec!(4.0)));
    }

    #[test]
    fn test_zero_quantity_removes_level() {
        let mut book = create_test_book();
        book.apply_diff(&diff(101, 101, vec![LevelUpdate::bid(dec!(50000), dec!(0))]))
            .unwrap();
        assert_eq!(book.quantity_at(Side::Bid, dec!(50000)), None);
        assert_eq!(book.best_bid().unwrap().price, dec!(49999));

        // removing a level that does not exist is a no-op
        let before = book.snapshot_view();
        book.apply_diff(&diff(102, 102, vec![LevelUpdate::ask(dec!(60000), dec!(0))]))
            .unwrap();
        let after = book.snapshot_view();
        assert_eq!(before.bids, after.bids);
        assert_eq!(before.asks, after.asks);
        assert_eq!(after.last_update_id, 102);
    }

    #[test]
    fn test_sequence_gap_does_not_mutate() {
        let mut book = create_test_book();
        let before = book.snapshot_view();

        let gap = diff(103, 104, vec![LevelUpdate::bid(dec!(49000), dec!(9))]);
        let err = book.apply_diff(&gap).unwrap_err();
        assert!(matches!(
            err,
            MarketDataError::SequenceGap {
                expected: 101,
                first: 103,
                last: 104,
                ..
            }
        ));

        let stale = diff(90, 100, vec![LevelUpdate::bid(dec!(49000), dec!(9))]);
        assert!(book.apply_diff(&stale).is_err());

        let after = book.snapshot_view();
        assert_eq!(before.bids, after.bids);
        assert_eq!(before.asks, after.asks);
        assert_eq!(after.last_update_id, 100);
    }

    #[test]
    fn test_uninitialized_book_rejects_diffs() {
        let mut book = OrderBook::new("BTCUSDT", SequenceRule::Increasing, ListenerRegistry::new());
        let err = book
            .apply_diff(&diff(1, 1, vec![LevelUpdate::bid(dec!(1), dec!(1))]))
            .unwrap_err();
        assert!(matches!(err, MarketDataError::SequenceGap { .. }));
        assert!(book.best_bid().is_none());
    }

    #[test]
    fn test_crossing_diff_is_rolled_back() {
        let mut book = create_test_book();
        let before = book.snapshot_view();

        // the removal is applied first, then the crossing bid; both must be undone
        let crossing = diff(
            101,
            101,
            vec![
                LevelUpdate::ask(dec!(50002), dec!(0)),
                LevelUpdate::bid(dec!(50001), dec!(1.0)),
            ],
        );
        let err = book.apply_diff(&crossing).unwrap_err();
        match err {
            MarketDataError::CrossedBook {
                update_id,
                best_bid,
                best_ask,
                ..
            } => {
                assert_eq!(update_id, 101);
                assert_eq!(best_bid, dec!(50001));
                assert_eq!(best_ask, dec!(50001));
            }
            other => panic!("expected crossed book, got {other:?}"),
        }

        let after = book.snapshot_view();
        assert_eq!(before.bids, after.bids);
        assert_eq!(before.asks, after.asks);
        assert_eq!(book.last_update_id(), 100);
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let mut book = create_test_book();
        let bad = diff(
            101,
            101,
            vec![
                LevelUpdate::bid(dec!(49000), dec!(1)),
                LevelUpdate::ask(dec!(51000), dec!(-1)),
            ],
        );
        assert!(matches!(
            book.apply_diff(&bad),
            Err(MarketDataError::InvalidLevel { .. })
        ));
        assert_eq!(book.quantity_at(Side::Bid, dec!(49000)), None);
        assert_eq!(book.last_update_id(), 100);
    }

    #[test]
    fn test_view_is_detached_from_book() {
        let mut book = create_test_book();
        let view = book.snapshot_view();
        book.apply_diff(&diff(101, 101, vec![LevelUpdate::bid(dec!(50000), dec!(0))]))
            .unwrap();
        assert_eq!(view.best_bid().unwrap().price, dec!(50000));
        assert_eq!(view.last_update_id, 100);
    }

    #[test]
    fn test_sequential_diffs_equal_net_diff() {
        // deterministic pseudo-random walk over non-overlapping price bands
        let mut seed: u64 = 0x5eed;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            seed >> 33
        };

        let base = Snapshot {
            trading_pair: "BTCUSDT".to_string(),
            update_id: 100,
            levels: vec![
                LevelUpdate::bid(dec!(40), dec!(1)),
                LevelUpdate::ask(dec!(60), dec!(1)),
            ],
        };

        let mut sequential =
            OrderBook::new("BTCUSDT", SequenceRule::Range, ListenerRegistry::new());
        sequential.apply_snapshot(&base).unwrap();

        let mut net: BTreeMap<(u8, Decimal), LevelUpdate> = BTreeMap::new();
        let mut id = 100;
        for _ in 0..200 {
            let count = 1 + next() % 4;
            let mut levels = Vec::new();
            for _ in 0..count {
                let quantity = Decimal::from(next() % 4);
                let update = if next() % 2 == 0 {
                    LevelUpdate::bid(Decimal::from(1 + next() % 49), quantity)
                } else {
                    LevelUpdate::ask(Decimal::from(51 + next() % 49), quantity)
                };
                levels.push(update);
            }
            let first = id + 1;
            id += 1 + next() % 3;
            let d = diff(first, id, levels);
            sequential.apply_diff(&d).unwrap();
            for level in d.levels {
                let side = if level.side == Side::Bid { 0 } else { 1 };
                net.insert((side, level.price), level);
            }
        }

        let mut merged = OrderBook::new("BTCUSDT", SequenceRule::Range, ListenerRegistry::new());
        merged.apply_snapshot(&base).unwrap();
        merged
            .apply_diff(&diff(101, id, net.into_values().collect()))
            .unwrap();

        let a = sequential.snapshot_view();
        let b = merged.snapshot_view();
        assert_eq!(a.bids, b.bids);
        assert_eq!(a.asks, b.asks);
        assert_eq!(a.last_update_id, b.last_update_id);
    }

    #[test]
    fn test_listeners_notified_after_apply() {
        let listeners = ListenerRegistry::new();
        let mut listener = MockBookListener::new();
        let mut seq = mockall::Sequence::new();
        listener
            .expect_on_book_update()
            .withf(|u| u.update_id == 100 && u.best_bid.map(|l| l.price) == Some(dec!(50000)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        listener
            .expect_on_book_update()
            .withf(|u| u.update_id == 101 && u.best_bid.map(|l| l.price) == Some(dec!(50000.5)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        listeners.add(Arc::new(listener));

        let mut book = OrderBook::new("BTCUSDT", SequenceRule::Range, listeners);
        book.apply_snapshot(&snapshot(100)).unwrap();
        book.apply_diff(&diff(101, 101, vec![LevelUpdate::bid(dec!(50000.5), dec!(1))]))
            .unwrap();
        // rejected diffs never notify
        assert!(book
            .apply_diff(&diff(105, 105, vec![LevelUpdate::bid(dec!(1), dec!(1))]))
            .is_err());
    }
}
