//! Exchange feed adapters
//!
//! An adapter is the only exchange-specific piece of the pipeline: it fetches
//! REST snapshots, opens streaming connections, decodes their payloads into
//! [`crate::messages`] types and declares the successor rule its diffs follow.

mod binance;
mod client;
mod discovery;

pub use binance::BinanceAdapter;
pub use client::{Frame, WebSocketClient};
pub use discovery::{DiscoveryCache, PairMap};

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::{FeedEvent, PairMetadata, Snapshot};
use crate::orderbook::SequenceRule;

/// One live streaming connection
///
/// `next_event` must be cancel safe: trackers race it against snapshot
/// fetches and shutdown signals. Decode failures are returned as
/// [`crate::MarketDataError::Decode`] and the connection stays usable; any
/// other error ends the connection.
#[async_trait]
pub trait FeedConnection: Send {
    async fn next_event(&mut self) -> Result<FeedEvent>;

    /// Send a keep-alive ping. The reply surfaces as [`FeedEvent::Heartbeat`].
    async fn ping(&mut self) -> Result<()>;

    async fn close(&mut self);
}

/// Capability interface implemented once per exchange
#[async_trait]
pub trait ExchangeFeedAdapter: Send + Sync {
    /// Exchange name used in logs
    fn name(&self) -> &str;

    /// Rule deciding whether a diff may follow the last applied update
    fn sequence_rule(&self) -> SequenceRule;

    /// Fetch a full book snapshot over REST
    async fn fetch_snapshot(&self, trading_pair: &str) -> Result<Snapshot>;

    /// Open one streaming connection carrying diffs and trades for `trading_pairs`
    async fn open_diff_stream(&self, trading_pairs: &[String]) -> Result<Box<dyn FeedConnection>>;

    /// List active trading pairs. Callers should go through [`DiscoveryCache`].
    async fn discover_trading_pairs(&self) -> Result<HashMap<String, PairMetadata>>;
}
