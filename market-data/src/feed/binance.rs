//! Binance public market data adapter

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::client::{Frame, WebSocketClient};
use super::{ExchangeFeedAdapter, FeedConnection};
use crate::config::Config;
use crate::error::{MarketDataError, Result};
use crate::messages::{FeedEvent, PairMetadata, Snapshot};
use crate::orderbook::SequenceRule;
use crate::parser::{self, ExchangeInfo, OrderBookSnapshot, Ticker24h};

/// REST + combined-stream adapter for Binance spot
#[derive(Debug, Clone)]
pub struct BinanceAdapter {
    http: reqwest::Client,
    rest_endpoint: String,
    ws_endpoint: String,
    depth_levels: usize,
}

impl BinanceAdapter {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(http, config))
    }

    /// Build around an existing HTTP client so connection pools can be shared
    pub fn with_client(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            rest_endpoint: config.rest_endpoint.trim_end_matches('/').to_string(),
            ws_endpoint: config.ws_endpoint.trim_end_matches('/').to_string(),
            depth_levels: config.depth_levels,
        }
    }

    /// Combined stream URL carrying depth diffs and trades for every pair
    pub fn stream_url(&self, trading_pairs: &[String]) -> String {
        let streams: Vec<String> = trading_pairs
            .iter()
            .flat_map(|s| {
                let s_lower = s.to_lowercase();
                [format!("{}@depth@100ms", s_lower), format!("{}@trade", s_lower)]
            })
            .collect();

        // strip a trailing /ws so both endpoint spellings work
        let base = self.ws_endpoint.trim_end_matches("/ws");
        format!("{}/stream?streams={}", base, streams.join("/"))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MarketDataError::Transport(format!("GET {url} returned {status}")));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ExchangeFeedAdapter for BinanceAdapter {
    fn name(&self) -> &str {
        "binance"
    }

    fn sequence_rule(&self) -> SequenceRule {
        SequenceRule::Range
    }

    async fn fetch_snapshot(&self, trading_pair: &str) -> Result<Snapshot> {
        let url = format!(
            "{}/depth?symbol={}&limit={}",
            self.rest_endpoint, trading_pair, self.depth_levels
        );
        debug!(pair = %trading_pair, url = %url, "Fetching order book snapshot");

        let snapshot_error = |reason: String| MarketDataError::SnapshotFetch {
            pair: trading_pair.to_string(),
            reason,
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| snapshot_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(snapshot_error(format!("HTTP status {status}")));
        }

        let body = response
            .json::<OrderBookSnapshot>()
            .await
            .map_err(|e| snapshot_error(e.to_string()))?;

        Ok(body.into_snapshot(trading_pair))
    }

    async fn open_diff_stream(&self, trading_pairs: &[String]) -> Result<Box<dyn FeedConnection>> {
        let url = self.stream_url(trading_pairs);
        let client = WebSocketClient::connect(&url).await?;
        Ok(Box::new(BinanceConnection { client }))
    }

    async fn discover_trading_pairs(&self) -> Result<HashMap<String, PairMetadata>> {
        let info_url = format!("{}/exchangeInfo", self.rest_endpoint);
        let ticker_url = format!("{}/ticker/24hr", self.rest_endpoint);

        let (info, tickers) = tokio::try_join!(
            self.get_json::<ExchangeInfo>(&info_url),
            self.get_json::<Vec<Ticker24h>>(&ticker_url),
        )?;

        let pairs = build_pair_metadata(info, tickers);
        info!(pairs = pairs.len(), "Discovered trading pairs");
        Ok(pairs)
    }
}

/// Join listing and 24h ticker data, converting BTC and ETH volume to USD
fn build_pair_metadata(info: ExchangeInfo, tickers: Vec<Ticker24h>) -> HashMap<String, PairMetadata> {
    let last_price = |symbol: &str| {
        tickers
            .iter()
            .find(|t| t.symbol == symbol)
            .map(|t| t.last_price)
    };
    let btc_usd = last_price("BTCUSDT");
    let eth_usd = last_price("ETHUSDT");

    let trading: HashMap<&str, _> = info
        .symbols
        .iter()
        .filter(|s| s.status == "TRADING")
        .map(|s| (s.symbol.as_str(), s))
        .collect();

    tickers
        .iter()
        .filter_map(|ticker| {
            let symbol = trading.get(ticker.symbol.as_str())?;
            let usd_volume = match symbol.quote_asset.as_str() {
                "BTC" => btc_usd.map(|px| ticker.quote_volume * px),
                "ETH" => eth_usd.map(|px| ticker.quote_volume * px),
                "USDT" | "USDC" | "BUSD" | "USD" => Some(ticker.quote_volume),
                _ => None,
            };
            Some((
                ticker.symbol.clone(),
                PairMetadata {
                    base_asset: symbol.base_asset.clone(),
                    quote_asset: symbol.quote_asset.clone(),
                    volume: ticker.quote_volume,
                    usd_volume,
                },
            ))
        })
        .collect()
}

/// Live combined-stream connection
struct BinanceConnection {
    client: WebSocketClient,
}

#[async_trait]
impl FeedConnection for BinanceConnection {
    async fn next_event(&mut self) -> Result<FeedEvent> {
        loop {
            match self.client.recv().await? {
                Frame::Data(text) => match parser::parse_stream_payload(&text)? {
                    Some(event) => return Ok(event),
                    None => continue,
                },
                Frame::Control => return Ok(FeedEvent::Heartbeat),
                Frame::Closed(reason) => {
                    warn!(url = %self.client.url(), reason = %reason, "Stream closed");
                    return Ok(FeedEvent::Closed(reason));
                }
            }
        }
    }

    async fn ping(&mut self) -> Result<()> {
        self.client.ping().await
    }

    async fn close(&mut self) {
        self.client.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SymbolInfo;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn adapter(ws_endpoint: &str) -> BinanceAdapter {
        let config = Config {
            ws_endpoint: ws_endpoint.to_string(),
            ..Config::default()
        };
        BinanceAdapter::with_client(reqwest::Client::new(), &config)
    }

    #[test]
    fn test_stream_url() {
        let pairs = vec!["BTCUSDT".to_string(), "ETHBTC".to_string()];
        let expected = "wss://stream.binance.com:9443/stream?streams=\
            btcusdt@depth@100ms/btcusdt@trade/ethbtc@depth@100ms/ethbtc@trade";

        assert_eq!(adapter("wss://stream.binance.com:9443/ws").stream_url(&pairs), expected);
        assert_eq!(adapter("wss://stream.binance.com:9443").stream_url(&pairs), expected);
    }

    #[test]
    fn test_sequence_rule_is_range() {
        assert_eq!(adapter("wss://x").sequence_rule(), SequenceRule::Range);
    }

    fn symbol(symbol: &str, status: &str, base: &str, quote: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.to_string(),
            status: status.to_string(),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
        }
    }

    fn ticker(symbol: &str, last_price: Decimal, quote_volume: Decimal) -> Ticker24h {
        Ticker24h {
            symbol: symbol.to_string(),
            last_price,
            quote_volume,
        }
    }

    #[test]
    fn test_build_pair_metadata() {
        let info = ExchangeInfo {
            symbols: vec![
                symbol("BTCUSDT", "TRADING", "BTC", "USDT"),
                symbol("ETHUSDT", "TRADING", "ETH", "USDT"),
                symbol("ZRXETH", "TRADING", "ZRX", "ETH"),
                symbol("LOOMBTC", "TRADING", "LOOM", "BTC"),
                symbol("OLDBTC", "BREAK", "OLD", "BTC"),
            ],
        };
        let tickers = vec![
            ticker("BTCUSDT", dec!(40000), dec!(1000000)),
            ticker("ETHUSDT", dec!(2000), dec!(500000)),
            ticker("ZRXETH", dec!(0.0002), dec!(10)),
            ticker("LOOMBTC", dec!(0.000001), dec!(2)),
            ticker("OLDBTC", dec!(1), dec!(1)),
        ];

        let pairs = build_pair_metadata(info, tickers);
        assert_eq!(pairs.len(), 4);
        assert!(!pairs.contains_key("OLDBTC"));
        assert_eq!(pairs["ZRXETH"].usd_volume, Some(dec!(20000)));
        assert_eq!(pairs["LOOMBTC"].usd_volume, Some(dec!(80000)));
        assert_eq!(pairs["BTCUSDT"].usd_volume, Some(dec!(1000000)));
        assert_eq!(pairs["ZRXETH"].base_asset, "ZRX");
    }
}
