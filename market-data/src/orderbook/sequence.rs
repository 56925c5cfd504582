//! Successor rules for sequenced diffs
//!
//! Each exchange numbers its book updates differently, so the adapter declares
//! which rule its diffs follow and the book only enforces it.

use serde::{Deserialize, Serialize};

/// How a diff's id range must relate to the last applied update id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceRule {
    /// `first <= last + 1 <= final` (Binance spot `U`/`u`)
    Range,
    /// `first == last + 1`
    Contiguous,
    /// `final > last` (timestamps or sparse ids)
    Increasing,
}

impl SequenceRule {
    /// Whether a diff spanning `first..=last_in_diff` may follow `last_applied`
    pub fn accepts(&self, last_applied: u64, first: u64, final_id: u64) -> bool {
        if first > final_id {
            return false;
        }
        let next = last_applied.saturating_add(1);
        match self {
            SequenceRule::Range => first <= next && next <= final_id,
            SequenceRule::Contiguous => first == next,
            SequenceRule::Increasing => final_id > last_applied,
        }
    }
}
