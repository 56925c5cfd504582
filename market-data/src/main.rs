//! Order book sync service
//!
//! Tracks Binance order books, publishes best bid/ask and trades over IPC and
//! serves health, readiness, metrics and book views over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use tokio::time::interval;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orderbook_sync::{
    BinanceAdapter, Config, DiscoveryCache, ExchangeFeedAdapter, IpcPublisher,
    OrderBookTrackerManager,
};

/// Queued IPC events before new ones are dropped
const IPC_QUEUE_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting order book sync service");

    let config = Config::load()?;
    info!(
        symbols = ?config.symbols,
        ws_endpoint = %config.ws_endpoint,
        rest_endpoint = %config.rest_endpoint,
        "Configuration loaded"
    );

    let adapter: Arc<dyn ExchangeFeedAdapter> = Arc::new(BinanceAdapter::new(&config)?);
    let pairs = resolve_pairs(&config, adapter.clone()).await?;

    let manager = Arc::new(OrderBookTrackerManager::new(adapter, config.tracker())?);

    let (publisher, _ipc_writer) = IpcPublisher::spawn(&config.ipc_socket_path, IPC_QUEUE_CAPACITY);
    manager.add_listener(Arc::new(publisher));

    manager.start(&pairs).await;

    let http_manager = manager.clone();
    let port = config.http_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(http_manager, port).await {
            warn!(error = %e, "Health server error");
        }
    });

    let status_manager = manager.clone();
    let status_every = Duration::from_secs(config.health_check_interval_secs);
    tokio::spawn(async move { log_status(status_manager, status_every).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    manager.stop_all().await;

    Ok(())
}

/// JSON logs by default, human readable with `LOG_FORMAT=pretty`
fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    let pretty = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("pretty"))
        .unwrap_or(false);

    if pretty {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    }
}

/// Configured symbols, or the top pairs by USD volume when none are set
async fn resolve_pairs(
    config: &Config,
    adapter: Arc<dyn ExchangeFeedAdapter>,
) -> anyhow::Result<Vec<String>> {
    if !config.symbols.is_empty() {
        return Ok(config.symbols.clone());
    }

    let discovery = DiscoveryCache::new(adapter, config.discovery_ttl());
    let pairs = discovery
        .top_by_volume(config.discovery_top_n, &config.quote_assets)
        .await?;
    info!(pairs = ?pairs, "Discovered trading pairs");
    Ok(pairs)
}

async fn log_status(manager: Arc<OrderBookTrackerManager>, every: Duration) {
    let mut ticker = interval(every);
    loop {
        ticker.tick().await;
        for pair in manager.tracked_pairs().await {
            let Some(status) = manager.status(&pair).await else {
                continue;
            };
            match status.ready_view() {
                Some(view) => info!(
                    pair = %pair,
                    epoch = status.epoch,
                    last_update_id = view.last_update_id,
                    mid_price = ?view.metrics.mid_price,
                    spread_bps = ?view.metrics.spread_bps,
                    imbalance = ?view.metrics.imbalance,
                    "Order book status"
                ),
                None => info!(
                    pair = %pair,
                    state = %status.state,
                    epoch = status.epoch,
                    last_error = ?status.last_error,
                    "Order book not ready"
                ),
            }
        }
    }
}

/// Start HTTP server for health checks, readiness, metrics and book views
async fn start_health_server(
    manager: Arc<OrderBookTrackerManager>,
    port: u16,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .route("/metrics", get(metrics))
        .route("/book/:pair", get(book))
        .layer(TraceLayer::new_for_http())
        .with_state(manager);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(manager): State<Arc<OrderBookTrackerManager>>) -> Json<serde_json::Value> {
    let mut trackers = serde_json::Map::new();
    for pair in manager.tracked_pairs().await {
        if let Some(status) = manager.status(&pair).await {
            trackers.insert(
                pair,
                serde_json::json!({
                    "state": status.state,
                    "epoch": status.epoch,
                    "last_error": status.last_error,
                }),
            );
        }
    }

    Json(serde_json::json!({
        "status": "healthy",
        "component": "orderbook-sync",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "trackers": trackers,
    }))
}

async fn readiness(State(manager): State<Arc<OrderBookTrackerManager>>) -> Response {
    let ready = manager.ready_pairs().await;
    let tracked = manager.tracked_pairs().await;
    let body = Json(serde_json::json!({ "ready": ready, "tracked": tracked }));

    if manager.is_ready().await {
        (StatusCode::OK, body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

async fn metrics(State(manager): State<Arc<OrderBookTrackerManager>>) -> Response {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = manager.registry().gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (StatusCode::OK, buffer).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct BookQuery {
    depth: Option<usize>,
}

async fn book(
    State(manager): State<Arc<OrderBookTrackerManager>>,
    Path(pair): Path<String>,
    Query(query): Query<BookQuery>,
) -> Response {
    let pair = pair.to_uppercase();
    match manager.current_book(&pair).await {
        Some(view) => {
            let depth = query.depth.unwrap_or(20);
            Json(view.top(depth)).into_response()
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "pair": pair, "ready": false })),
        )
            .into_response(),
    }
}
