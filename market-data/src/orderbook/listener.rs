//! Observer registry for best bid/ask changes and trades
//!
//! Listeners are called synchronously from the mutation path, so they must
//! hand work off instead of blocking. A listener that errors or panics is
//! logged and skipped; the caller never sees the failure.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use super::TopOfBook;
use crate::error::Result;
use crate::messages::Trade;

/// Receives market data notifications
#[cfg_attr(test, mockall::automock)]
pub trait BookListener: Send + Sync {
    /// Called after every applied snapshot or diff
    fn on_book_update(&self, _update: &TopOfBook) -> Result<()> {
        Ok(())
    }

    /// Called for every trade received while a tracker is bootstrapping or synced
    fn on_trade(&self, _trade: &Trade) -> Result<()> {
        Ok(())
    }
}

/// Handle returned by [`ListenerRegistry::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Cloneable set of listeners shared by every tracker of a manager
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    listeners: RwLock<BTreeMap<ListenerId, Arc<dyn BookListener>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn BookListener>) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.write_listeners().insert(id, listener);
        id
    }

    /// Returns false if the id was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        self.write_listeners().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_book_update(&self, update: &TopOfBook) {
        for (id, listener) in self.snapshot() {
            dispatch(id, &update.trading_pair, || listener.on_book_update(update));
        }
    }

    pub fn notify_trade(&self, trade: &Trade) {
        for (id, listener) in self.snapshot() {
            dispatch(id, &trade.trading_pair, || listener.on_trade(trade));
        }
    }

    // Listeners are copied out so a slow callback never holds the lock
    fn snapshot(&self) -> Vec<(ListenerId, Arc<dyn BookListener>)> {
        let guard = match self.inner.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.iter().map(|(id, l)| (*id, l.clone())).collect()
    }

    fn write_listeners(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ListenerId, Arc<dyn BookListener>>> {
        match self.inner.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn dispatch<F>(id: ListenerId, pair: &str, call: F)
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(listener = id.0, pair = %pair, error = %e, "Listener failed");
        }
        Err(_) => {
            error!(listener = id.0, pair = %pair, "Listener panicked");
        }
    }
}
