//! Configuration module for the order book synchronizer

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MarketDataError, Result};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Trading pairs to track (e.g., ["BTCUSDT", "ETHUSDT"]). Empty means discover.
    pub symbols: Vec<String>,

    /// WebSocket endpoint for Binance
    pub ws_endpoint: String,

    /// REST API endpoint for snapshots and discovery
    pub rest_endpoint: String,

    /// IPC socket path for publishing data
    pub ipc_socket_path: String,

    /// Snapshot depth requested from the REST API
    pub depth_levels: usize,

    /// Port of the health/metrics HTTP server
    pub http_port: u16,

    /// HTTP request timeout
    pub request_timeout_secs: u64,

    /// Reconnection backoff
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as random jitter (0.0 - 1.0)
    pub backoff_jitter: f64,
    /// Synced time after which backoff falls back to the minimum
    pub backoff_reset_secs: u64,

    /// Diffs held while a snapshot is in flight
    pub bootstrap_buffer_capacity: usize,

    /// Silence before a keep-alive ping is sent
    pub message_timeout_secs: u64,
    /// Time allowed for anything to arrive after a ping
    pub ping_timeout_secs: u64,

    /// Pair discovery cache lifetime
    pub discovery_ttl_secs: u64,
    /// Pairs to track when `symbols` is empty
    pub discovery_top_n: usize,
    /// Quote assets considered by discovery (e.g., ["BTC", "ETH", "USDT"])
    pub quote_assets: Vec<String>,

    /// Status logging interval in seconds
    pub health_check_interval_secs: u64,
}

impl Config {
    /// Load configuration from `.env` and environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            symbols: env_list("SYMBOLS").unwrap_or(defaults.symbols),
            ws_endpoint: env::var("WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            rest_endpoint: env::var("REST_ENDPOINT").unwrap_or(defaults.rest_endpoint),
            ipc_socket_path: env::var("IPC_SOCKET_PATH").unwrap_or(defaults.ipc_socket_path),
            depth_levels: env_parse("DEPTH_LEVELS", defaults.depth_levels)?,
            http_port: env_parse("HTTP_PORT", defaults.http_port)?,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            backoff_min_ms: env_parse("BACKOFF_MIN_MS", defaults.backoff_min_ms)?,
            backoff_max_ms: env_parse("BACKOFF_MAX_MS", defaults.backoff_max_ms)?,
            backoff_multiplier: env_parse("BACKOFF_MULTIPLIER", defaults.backoff_multiplier)?,
            backoff_jitter: env_parse("BACKOFF_JITTER", defaults.backoff_jitter)?,
            backoff_reset_secs: env_parse("BACKOFF_RESET_SECS", defaults.backoff_reset_secs)?,
            bootstrap_buffer_capacity: env_parse(
                "BOOTSTRAP_BUFFER_CAPACITY",
                defaults.bootstrap_buffer_capacity,
            )?,
            message_timeout_secs: env_parse("MESSAGE_TIMEOUT_SECS", defaults.message_timeout_secs)?,
            ping_timeout_secs: env_parse("PING_TIMEOUT_SECS", defaults.ping_timeout_secs)?,
            discovery_ttl_secs: env_parse("DISCOVERY_TTL_SECS", defaults.discovery_ttl_secs)?,
            discovery_top_n: env_parse("DISCOVERY_TOP_N", defaults.discovery_top_n)?,
            quote_assets: env_list("QUOTE_ASSETS").unwrap_or(defaults.quote_assets),
            health_check_interval_secs: env_parse(
                "HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval_secs,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(MarketDataError::ConfigError(msg));

        if self.backoff_min_ms == 0 || self.backoff_min_ms > self.backoff_max_ms {
            return fail(format!(
                "backoff bounds must satisfy 0 < min ({}) <= max ({})",
                self.backoff_min_ms, self.backoff_max_ms
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return fail(format!(
                "backoff multiplier must be finite and >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return fail(format!("backoff jitter must be within 0..=1, got {}", self.backoff_jitter));
        }
        if self.bootstrap_buffer_capacity == 0 {
            return fail("bootstrap buffer capacity must be positive".to_string());
        }
        if self.message_timeout_secs == 0 || self.ping_timeout_secs == 0 {
            return fail("liveness timeouts must be positive".to_string());
        }
        if self.symbols.is_empty() && self.discovery_top_n == 0 {
            return fail("no SYMBOLS configured and DISCOVERY_TOP_N is 0".to_string());
        }
        Ok(())
    }

    /// Tracker settings derived from this configuration
    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            backoff: BackoffConfig {
                min_delay: Duration::from_millis(self.backoff_min_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
                multiplier: self.backoff_multiplier,
                jitter: self.backoff_jitter,
                reset_after: Duration::from_secs(self.backoff_reset_secs),
            },
            buffer_capacity: self.bootstrap_buffer_capacity,
            message_timeout: Duration::from_secs(self.message_timeout_secs),
            ping_timeout: Duration::from_secs(self.ping_timeout_secs),
        }
    }

    pub fn discovery_ttl(&self) -> Duration {
        Duration::from_secs(self.discovery_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            ws_endpoint: "wss://stream.binance.com:9443/ws".to_string(),
            rest_endpoint: "https://api.binance.com/api/v3".to_string(),
            ipc_socket_path: "/tmp/orderbook-sync.sock".to_string(),
            depth_levels: 1000,
            http_port: 9090,
            request_timeout_secs: 10,
            backoff_min_ms: 500,
            backoff_max_ms: 30_000,
            backoff_multiplier: 2.0,
            backoff_jitter: 0.2,
            backoff_reset_secs: 60,
            bootstrap_buffer_capacity: 10_000,
            message_timeout_secs: 30,
            ping_timeout_secs: 10,
            discovery_ttl_secs: 30 * 60,
            discovery_top_n: 10,
            quote_assets: vec!["BTC".to_string(), "ETH".to_string(), "USDT".to_string()],
            health_check_interval_secs: 30,
        }
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub reset_after: Duration,
}

/// Settings shared by every tracker of a manager
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub backoff: BackoffConfig,
    pub buffer_capacity: usize,
    pub message_timeout: Duration,
    pub ping_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Config::default().tracker()
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = env::var(key).ok()?;
    Some(
        raw.split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MarketDataError::ConfigError(format!("{key} has invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}
