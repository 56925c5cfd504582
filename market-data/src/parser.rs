//! Parser module for Binance market data payloads
//!
//! Handles deserialization of depth updates, trades, REST snapshots and the
//! listing endpoints, and converts them into exchange-agnostic messages.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

use crate::error::{MarketDataError, Result};
use crate::messages::{Diff, FeedEvent, LevelUpdate, Snapshot, Trade, TradeSide};

/// Binance depth update message
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdate {
    /// Event type
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (milliseconds)
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in event
    #[serde(rename = "U")]
    pub first_update_id: u64,

    /// Final update ID in event
    #[serde(rename = "u")]
    pub final_update_id: u64,

    /// Bids to update
    #[serde(rename = "b", deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks to update
    #[serde(rename = "a", deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Binance trade message
#[derive(Debug, Clone, Deserialize)]
pub struct TradeEvent {
    /// Event type
    #[serde(rename = "e")]
    pub event_type: String,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Trade ID
    #[serde(rename = "t")]
    pub trade_id: u64,

    /// Price
    #[serde(rename = "p", deserialize_with = "deserialize_decimal")]
    pub price: Decimal,

    /// Quantity
    #[serde(rename = "q", deserialize_with = "deserialize_decimal")]
    pub quantity: Decimal,

    /// Trade time
    #[serde(rename = "T")]
    pub trade_time: u64,

    /// Is buyer maker
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// Price level (price, quantity pair)
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book snapshot from REST API
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookSnapshot {
    /// Last update ID
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,

    /// Bids
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Combined stream message wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    /// Stream name
    pub stream: String,

    /// Data payload
    pub data: serde_json::Value,
}

/// `GET /exchangeInfo` response, reduced to what discovery needs
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
}

/// One entry of `GET /ticker/24hr`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub last_price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub quote_volume: Decimal,
}

impl OrderBookSnapshot {
    pub fn into_snapshot(self, trading_pair: &str) -> Snapshot {
        Snapshot {
            trading_pair: trading_pair.to_string(),
            update_id: self.last_update_id,
            levels: to_level_updates(self.bids, self.asks),
        }
    }
}

impl DepthUpdate {
    pub fn into_diff(self) -> Diff {
        Diff {
            trading_pair: self.symbol,
            first_update_id: self.first_update_id,
            final_update_id: self.final_update_id,
            timestamp: millis_to_datetime(self.event_time),
            levels: to_level_updates(self.bids, self.asks),
        }
    }
}

impl TradeEvent {
    pub fn into_trade(self) -> Trade {
        Trade {
            trading_pair: self.symbol,
            trade_id: self.trade_id,
            price: self.price,
            quantity: self.quantity,
            // the taker sold into a resting bid when the buyer was the maker
            side: if self.is_buyer_maker {
                TradeSide::Sell
            } else {
                TradeSide::Buy
            },
            timestamp: millis_to_datetime(self.trade_time),
        }
    }
}

/// Decode one stream payload
///
/// Returns `Ok(None)` for payloads that carry nothing for the book, such as
/// subscription acknowledgements.
pub fn parse_stream_payload(raw: &str) -> Result<Option<FeedEvent>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;

    // Combined streams wrap the event as {"stream": ..., "data": ...}
    let data = match serde_json::from_value::<StreamMessage>(value.clone()) {
        Ok(wrapper) => wrapper.data,
        Err(_) => value,
    };

    let event_type = data.get("e").and_then(|e| e.as_str()).unwrap_or_default();
    match event_type {
        "depthUpdate" => {
            let depth: DepthUpdate = serde_json::from_value(data)?;
            Ok(Some(FeedEvent::Diff(depth.into_diff())))
        }
        "trade" => {
            let trade: TradeEvent = serde_json::from_value(data)?;
            Ok(Some(FeedEvent::Trade(trade.into_trade())))
        }
        _ if data.get("result").is_some() => Ok(None),
        other => Err(MarketDataError::Decode(format!(
            "unsupported event type {other:?}"
        ))),
    }
}

fn to_level_updates(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Vec<LevelUpdate> {
    bids.into_iter()
        .map(|l| LevelUpdate::bid(l.price, l.quantity))
        .chain(asks.into_iter().map(|l| LevelUpdate::ask(l.price, l.quantity)))
        .collect()
}

fn millis_to_datetime(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// Custom deserializer for Decimal from string
fn deserialize_decimal<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Decimal::from_str(&s).map_err(serde::de::Error::custom)
}

/// Custom deserializer for price levels from array of string pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> std::result::Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<String>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|pair| {
            if pair.len() != 2 {
                return Err(serde::de::Error::custom("Invalid price level format"));
            }
            Ok(PriceLevel {
                price: Decimal::from_str(&pair[0]).map_err(serde::de::Error::custom)?,
                quantity: Decimal::from_str(&pair[1]).map_err(serde::de::Error::custom)?,
            })
        })
        .collect()
}
