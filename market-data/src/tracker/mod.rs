//! Per-pair synchronization trackers
//!
//! Each tracker owns one order book and drives it through
//! `Connecting -> Bootstrapping -> Synced -> Disconnected` epochs. Readers
//! only ever see views published while `Synced`.

mod backoff;
mod bootstrap;
mod liveness;
mod manager;
mod task;
mod telemetry;

pub use backoff::Backoff;
pub use bootstrap::{BootstrapBuffer, Replay};
pub use liveness::Liveness;
pub use manager::OrderBookTrackerManager;
pub use task::OrderBookTracker;
pub use telemetry::TrackerMetrics;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::orderbook::BookView;

/// Synchronization state of one tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackerState {
    Connecting,
    Bootstrapping,
    Synced,
    Disconnected,
}

impl TrackerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerState::Connecting => "connecting",
            TrackerState::Bootstrapping => "bootstrapping",
            TrackerState::Synced => "synced",
            TrackerState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest published status of a tracker
#[derive(Debug, Clone)]
pub struct TrackerStatus {
    pub state: TrackerState,
    /// Connection lifetimes started so far, starting at 1
    pub epoch: u64,
    /// Set only while `Synced`
    pub view: Option<Arc<BookView>>,
    pub last_error: Option<String>,
}

impl TrackerStatus {
    pub fn is_synced(&self) -> bool {
        self.state == TrackerState::Synced
    }

    /// The book view, if it may be handed to readers
    pub fn ready_view(&self) -> Option<Arc<BookView>> {
        if self.is_synced() {
            self.view.clone()
        } else {
            None
        }
    }
}

impl Default for TrackerStatus {
    fn default() -> Self {
        Self {
            state: TrackerState::Connecting,
            epoch: 0,
            view: None,
            last_error: None,
        }
    }
}
