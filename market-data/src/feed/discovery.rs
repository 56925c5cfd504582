//! TTL cache in front of an adapter's trading pair discovery

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ExchangeFeedAdapter;
use crate::error::Result;
use crate::messages::PairMetadata;

pub type PairMap = HashMap<String, PairMetadata>;

struct Cached {
    fetched_at: Instant,
    pairs: Arc<PairMap>,
}

/// Caches the discovered pair list for a bounded time
///
/// Concurrent callers share a single refresh. When a refresh fails the last
/// known list is returned instead of the error.
pub struct DiscoveryCache {
    adapter: Arc<dyn ExchangeFeedAdapter>,
    ttl: Duration,
    cached: Mutex<Option<Cached>>,
}

impl DiscoveryCache {
    pub fn new(adapter: Arc<dyn ExchangeFeedAdapter>, ttl: Duration) -> Self {
        Self {
            adapter,
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub async fn trading_pairs(&self) -> Result<Arc<PairMap>> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.pairs.clone());
            }
        }

        match self.adapter.discover_trading_pairs().await {
            Ok(pairs) => {
                debug!(exchange = %self.adapter.name(), pairs = pairs.len(), "Refreshed pair list");
                let pairs = Arc::new(pairs);
                *cached = Some(Cached {
                    fetched_at: Instant::now(),
                    pairs: pairs.clone(),
                });
                Ok(pairs)
            }
            Err(e) => match cached.as_ref() {
                Some(entry) => {
                    warn!(
                        exchange = %self.adapter.name(),
                        error = %e,
                        age_secs = entry.fetched_at.elapsed().as_secs(),
                        "Pair discovery failed, using last known list"
                    );
                    Ok(entry.pairs.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Highest USD volume pairs first, optionally restricted to some quote assets
    pub async fn top_by_volume(&self, n: usize, quote_assets: &[String]) -> Result<Vec<String>> {
        let pairs = self.trading_pairs().await?;

        let mut ranked: Vec<(&String, Decimal)> = pairs
            .iter()
            .filter(|(_, meta)| {
                quote_assets.is_empty()
                    || quote_assets
                        .iter()
                        .any(|q| q.eq_ignore_ascii_case(&meta.quote_asset))
            })
            .map(|(symbol, meta)| (symbol, meta.usd_volume.unwrap_or(Decimal::ZERO)))
            .collect();

        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(ranked.into_iter().take(n).map(|(s, _)| s.clone()).collect())
    }

    /// Drop the cached list so the next call refreshes
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
