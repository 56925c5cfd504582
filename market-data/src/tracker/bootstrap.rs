//! Diff buffer used while a snapshot is in flight

use std::collections::VecDeque;

use crate::error::{MarketDataError, Result};
use crate::messages::Diff;

/// Bounded FIFO of diffs received before the snapshot arrived
#[derive(Debug)]
pub struct BootstrapBuffer {
    diffs: VecDeque<Diff>,
    capacity: usize,
}

/// Outcome of draining the buffer against a snapshot
#[derive(Debug, Default)]
pub struct Replay {
    /// Diffs newer than the snapshot, in arrival order
    pub apply: Vec<Diff>,
    /// Diffs already covered by the snapshot
    pub discarded: usize,
}

impl BootstrapBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            diffs: VecDeque::new(),
            capacity,
        }
    }

    /// Fails once `capacity` diffs are held; the caller restarts the epoch
    pub fn push(&mut self, diff: Diff) -> Result<()> {
        if self.diffs.len() >= self.capacity {
            return Err(MarketDataError::BufferOverflow {
                capacity: self.capacity,
            });
        }
        self.diffs.push_back(diff);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    /// Split buffered diffs around the snapshot's update id
    pub fn drain_after(&mut self, snapshot_id: u64) -> Replay {
        let mut replay = Replay::default();
        for diff in self.diffs.drain(..) {
            if diff.key() <= snapshot_id {
                replay.discarded += 1;
            } else {
                replay.apply.push(diff);
            }
        }
        replay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn diff(key: u64) -> Diff {
        Diff {
            trading_pair: "BTCUSDT".to_string(),
            first_update_id: key,
            final_update_id: key,
            timestamp: Utc::now(),
            levels: vec![],
        }
    }

    #[test]
    fn test_discards_covered_and_keeps_arrival_order() {
        let mut buffer = BootstrapBuffer::new(16);
        for key in [95, 101, 99, 103] {
            buffer.push(diff(key)).unwrap();
        }

        let replay = buffer.drain_after(100);
        let keys: Vec<u64> = replay.apply.iter().map(|d| d.key()).collect();
        assert_eq!(keys, vec![101, 103]);
        assert_eq!(replay.discarded, 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_diff_equal_to_snapshot_is_discarded() {
        let mut buffer = BootstrapBuffer::new(4);
        buffer.push(diff(100)).unwrap();
        let replay = buffer.drain_after(100);
        assert!(replay.apply.is_empty());
        assert_eq!(replay.discarded, 1);
    }

    #[test]
    fn test_overflow() {
        let mut buffer = BootstrapBuffer::new(2);
        buffer.push(diff(1)).unwrap();
        buffer.push(diff(2)).unwrap();
        assert!(matches!(
            buffer.push(diff(3)),
            Err(MarketDataError::BufferOverflow { capacity: 2 })
        ));
        assert_eq!(buffer.len(), 2);
    }
}
