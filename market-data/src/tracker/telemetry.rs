//! Prometheus metrics for trackers

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

use crate::error::Result;

/// Counters shared by all trackers of one manager
#[derive(Debug, Clone)]
pub struct TrackerMetrics {
    pub diffs_applied: IntCounterVec,
    pub resyncs: IntCounterVec,
    pub snapshot_failures: IntCounterVec,
    pub discarded_diffs: IntCounterVec,
    pub decode_errors: IntCounterVec,
    pub synced_pairs: IntGauge,
}

impl TrackerMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let diffs_applied = IntCounterVec::new(
            Opts::new("orderbook_diffs_applied_total", "Diffs applied to live books"),
            &["pair"],
        )?;
        let resyncs = IntCounterVec::new(
            Opts::new("orderbook_resyncs_total", "Epochs torn down and restarted"),
            &["pair", "reason"],
        )?;
        let snapshot_failures = IntCounterVec::new(
            Opts::new("orderbook_snapshot_failures_total", "Failed snapshot fetches"),
            &["pair"],
        )?;
        let discarded_diffs = IntCounterVec::new(
            Opts::new(
                "orderbook_buffered_diffs_discarded_total",
                "Buffered diffs already covered by the snapshot",
            ),
            &["pair"],
        )?;
        let decode_errors = IntCounterVec::new(
            Opts::new("orderbook_decode_errors_total", "Dropped undecodable messages"),
            &["pair"],
        )?;
        let synced_pairs = IntGauge::new("orderbook_synced_pairs", "Trackers currently synced")?;

        registry.register(Box::new(diffs_applied.clone()))?;
        registry.register(Box::new(resyncs.clone()))?;
        registry.register(Box::new(snapshot_failures.clone()))?;
        registry.register(Box::new(discarded_diffs.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(synced_pairs.clone()))?;

        Ok(Self {
            diffs_applied,
            resyncs,
            snapshot_failures,
            discarded_diffs,
            decode_errors,
            synced_pairs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_twice_fails() {
        let registry = Registry::new();
        let metrics = TrackerMetrics::register(&registry).unwrap();
        metrics.resyncs.with_label_values(&["BTCUSDT", "sequence_gap"]).inc();
        assert_eq!(
            metrics
                .resyncs
                .with_label_values(&["BTCUSDT", "sequence_gap"])
                .get(),
            1
        );
        assert!(TrackerMetrics::register(&registry).is_err());
    }
}
