//! Error types for the order book synchronization engine

use rust_decimal::Decimal;
use thiserror::Error;

/// Market data errors
///
/// Everything except [`MarketDataError::ResourceExhausted`] is recoverable
/// inside a tracker, either by retrying or by a full resynchronization.
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Snapshot fetch failed for {pair}: {reason}")]
    SnapshotFetch { pair: String, reason: String },

    #[error("Sequence gap on {pair}: expected {expected}, got {first}..={last}")]
    SequenceGap {
        pair: String,
        expected: u64,
        first: u64,
        last: u64,
    },

    #[error("Crossed book on {pair} at update {update_id}: bid {best_bid} >= ask {best_ask}")]
    CrossedBook {
        pair: String,
        update_id: u64,
        best_bid: Decimal,
        best_ask: Decimal,
    },

    #[error("Invalid level on {pair}: price {price} quantity {quantity}")]
    InvalidLevel {
        pair: String,
        price: Decimal,
        quantity: Decimal,
    },

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("No data or keep-alive response within {0:?}")]
    LivenessTimeout(std::time::Duration),

    #[error("Bootstrap buffer overflow: {capacity} diffs buffered")]
    BufferOverflow { capacity: usize },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Not ready: {0}")]
    NotReady(String),
}

impl MarketDataError {
    /// Short label used for resync logging and metric labels
    pub fn resync_reason(&self) -> &'static str {
        match self {
            MarketDataError::Transport(_) | MarketDataError::WebSocketMessage(_) => "transport",
            MarketDataError::SnapshotFetch { .. } => "snapshot",
            MarketDataError::SequenceGap { .. } => "sequence_gap",
            MarketDataError::CrossedBook { .. } => "crossed_book",
            MarketDataError::InvalidLevel { .. } => "invalid_level",
            MarketDataError::Decode(_) => "decode",
            MarketDataError::ConnectionClosed(_) => "connection_closed",
            MarketDataError::LivenessTimeout(_) => "liveness_timeout",
            MarketDataError::BufferOverflow { .. } => "buffer_overflow",
            MarketDataError::ResourceExhausted(_) => "resource_exhausted",
            MarketDataError::Listener(_) => "listener",
            MarketDataError::IpcError(_) => "ipc",
            MarketDataError::SerializationError(_) => "serialization",
            MarketDataError::ConfigError(_) => "config",
            MarketDataError::Metrics(_) => "metrics",
            MarketDataError::NotReady(_) => "not_ready",
        }
    }

    /// Errors that must be surfaced to operators rather than silently retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, MarketDataError::ResourceExhausted(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                MarketDataError::ConnectionClosed(err.to_string())
            }
            WsError::Io(ref io) if is_exhaustion(io) => {
                MarketDataError::ResourceExhausted(err.to_string())
            }
            other => MarketDataError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(err: reqwest::Error) -> Self {
        MarketDataError::Transport(err.to_string())
    }
}

impl From<prometheus::Error> for MarketDataError {
    fn from(err: prometheus::Error) -> Self {
        MarketDataError::Metrics(err.to_string())
    }
}

impl From<std::io::Error> for MarketDataError {
    fn from(err: std::io::Error) -> Self {
        if is_exhaustion(&err) {
            MarketDataError::ResourceExhausted(err.to_string())
        } else {
            MarketDataError::IpcError(err.to_string())
        }
    }
}

/// EMFILE / ENFILE / ENOBUFS
fn is_exhaustion(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(23) | Some(24) | Some(105))
}

pub type Result<T> = std::result::Result<T, MarketDataError>;
