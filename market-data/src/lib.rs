//! Order book synchronization engine
//!
//! Keeps local order books in sync with exchange market data by combining a
//! REST snapshot with a stream of incremental diffs, one tracker task per
//! trading pair. Exchange specifics live behind [`feed::ExchangeFeedAdapter`].

pub mod config;
pub mod error;
pub mod feed;
pub mod messages;
pub mod orderbook;
pub mod parser;
pub mod publisher;
pub mod tracker;

pub use config::{Config, TrackerConfig};
pub use error::{MarketDataError, Result};
pub use feed::{BinanceAdapter, DiscoveryCache, ExchangeFeedAdapter, FeedConnection};
pub use messages::{Diff, FeedEvent, LevelUpdate, PairMetadata, Snapshot, Trade, TradeSide};
pub use orderbook::{BookListener, BookView, SequenceRule, TopOfBook};
pub use publisher::IpcPublisher;
pub use tracker::{OrderBookTrackerManager, TrackerState, TrackerStatus};
