//! Exchange-agnostic message shapes produced by feed adapters
//!
//! Adapters decode their wire formats into these types; nothing past the
//! adapter boundary looks at exchange JSON.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orderbook::Side;

/// One price level change, or one level of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpdate {
    pub side: Side,
    pub price: Decimal,
    /// Aggregate quantity at this price. Zero removes the level.
    pub quantity: Decimal,
}

impl LevelUpdate {
    pub fn bid(price: Decimal, quantity: Decimal) -> Self {
        Self {
            side: Side::Bid,
            price,
            quantity,
        }
    }

    pub fn ask(price: Decimal, quantity: Decimal) -> Self {
        Self {
            side: Side::Ask,
            price,
            quantity,
        }
    }
}

/// Complete book state as of `update_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub trading_pair: String,
    pub update_id: u64,
    pub levels: Vec<LevelUpdate>,
}

/// Incremental book change covering update ids `first_update_id..=final_update_id`
///
/// Single-increment schemes set both ids to the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub trading_pair: String,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub timestamp: DateTime<Utc>,
    pub levels: Vec<LevelUpdate>,
}

impl Diff {
    /// Ordering key used for bootstrap discard and `last_update_id`
    pub fn key(&self) -> u64 {
        self.final_update_id
    }
}

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Public trade print, forwarded to listeners but never applied to a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trading_pair: String,
    pub trade_id: u64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: TradeSide,
    pub timestamp: DateTime<Utc>,
}

/// Trading pair metadata returned by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairMetadata {
    pub base_asset: String,
    pub quote_asset: String,
    /// 24h volume in quote units
    pub volume: Decimal,
    /// 24h volume converted to USD, when a conversion rate is known
    pub usd_volume: Option<Decimal>,
}

/// Item yielded by a feed connection
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Diff(Diff),
    Trade(Trade),
    /// Keep-alive response or any other control frame proving the peer is alive
    Heartbeat,
    /// Terminal signal; the connection yields nothing else afterwards
    Closed(String),
}
