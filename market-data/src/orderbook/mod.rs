//! Order book module
//!
//! Maintains a sequenced, never-crossed price level book per trading pair.

mod book;
mod listener;
mod metrics;
mod sequence;

pub use book::OrderBook;
pub use listener::{BookListener, ListenerId, ListenerRegistry};
pub use metrics::OrderBookMetrics;
pub use sequence::SequenceRule;

#[cfg(test)]
pub use listener::MockBookListener;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single level in the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Immutable point-in-time copy of one book, handed to readers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookView {
    pub trading_pair: String,
    pub timestamp: DateTime<Utc>,
    pub last_update_id: u64,
    /// Highest price first
    pub bids: Vec<Level>,
    /// Lowest price first
    pub asks: Vec<Level>,
    pub metrics: OrderBookMetrics,
}

impl BookView {
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }

    /// Copy of this view truncated to `depth` levels per side
    pub fn top(&self, depth: usize) -> BookView {
        BookView {
            trading_pair: self.trading_pair.clone(),
            timestamp: self.timestamp,
            last_update_id: self.last_update_id,
            bids: self.bids.iter().take(depth).copied().collect(),
            asks: self.asks.iter().take(depth).copied().collect(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Best bid/ask notification sent to listeners after every applied change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopOfBook {
    pub trading_pair: String,
    pub update_id: u64,
    pub timestamp: DateTime<Utc>,
    pub best_bid: Option<Level>,
    pub best_ask: Option<Level>,
}
