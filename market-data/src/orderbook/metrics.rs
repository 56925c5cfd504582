//! Order book metrics calculation

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Level;

/// Levels considered by the top-of-book imbalance
const IMBALANCE_LEVELS: usize = 5;

/// Computed metrics for an order book view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookMetrics {
    /// Mid price (average of best bid and ask)
    pub mid_price: Option<Decimal>,

    /// Spread in basis points
    pub spread_bps: Option<Decimal>,

    /// Simple imbalance over the top levels: (bid_vol - ask_vol) / (bid_vol + ask_vol)
    pub imbalance: Option<Decimal>,

    /// Total bid depth (volume)
    pub bid_depth: Decimal,

    /// Total ask depth (volume)
    pub ask_depth: Decimal,

    /// Number of bid levels
    pub bid_levels: usize,

    /// Number of ask levels
    pub ask_levels: usize,
}

impl OrderBookMetrics {
    /// Compute from sides already sorted best-first
    pub fn from_levels(bids: &[Level], asks: &[Level]) -> Self {
        let best_bid = bids.first().map(|l| l.price);
        let best_ask = asks.first().map(|l| l.price);

        let mid_price = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        };

        let spread_bps = match (best_bid, best_ask, mid_price) {
            (Some(bid), Some(ask), Some(mid)) if mid > Decimal::ZERO => {
                Some((ask - bid) / mid * Decimal::from(10000))
            }
            _ => None,
        };

        let top_bid: Decimal = bids.iter().take(IMBALANCE_LEVELS).map(|l| l.quantity).sum();
        let top_ask: Decimal = asks.iter().take(IMBALANCE_LEVELS).map(|l| l.quantity).sum();
        let total = top_bid + top_ask;
        let imbalance = if total > Decimal::ZERO {
            Some((top_bid - top_ask) / total)
        } else {
            None
        };

        Self {
            mid_price,
            spread_bps,
            imbalance,
            bid_depth: bids.iter().map(|l| l.quantity).sum(),
            ask_depth: asks.iter().map(|l| l.quantity).sum(),
            bid_levels: bids.len(),
            ask_levels: asks.len(),
        }
    }

    /// Check if the order book is healthy (has valid data)
    pub fn is_healthy(&self) -> bool {
        self.mid_price.is_some()
            && self.spread_bps.is_some()
            && self.bid_levels > 0
            && self.ask_levels > 0
    }

    /// Get volume ratio (bid_depth / ask_depth)
    pub fn volume_ratio(&self) -> Option<Decimal> {
        if self.ask_depth > Decimal::ZERO {
            Some(self.bid_depth / self.ask_depth)
        } else {
            None
        }
    }
}
