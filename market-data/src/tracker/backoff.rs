//! Exponential reconnect backoff with jitter

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Delay generator for reconnects and snapshot retries
///
/// Every delay, jitter included, is capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.min_delay;
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let jitter_range_ms = (base.as_millis() as f64 * self.config.jitter) as u64;
        let jitter = if jitter_range_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_range_ms)
        };
        let delay = (base + Duration::from_millis(jitter)).min(self.config.max_delay);

        // saturate instead of overflowing Duration
        let next = Duration::try_from_secs_f64(base.as_secs_f64() * self.config.multiplier)
            .unwrap_or(self.config.max_delay);
        self.current = next.min(self.config.max_delay);
        self.attempts = self.attempts.saturating_add(1);

        delay
    }

    pub fn reset(&mut self) {
        self.current = self.config.min_delay;
        self.attempts = 0;
    }

    /// Reset if the last epoch stayed synced for at least `reset_after`
    pub fn reset_if_stable(&mut self, synced_for: Duration) -> bool {
        if synced_for >= self.config.reset_after && self.attempts > 0 {
            self.reset();
            return true;
        }
        false
    }

    /// Attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
