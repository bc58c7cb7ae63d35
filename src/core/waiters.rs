//! Registry of pending long-poll waiters.

use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::types::{Version, WaiterId};

use super::record::VersionedRecord;

/// Single-fire completion handle for one pending long-poll.
pub type WaiterTx = oneshot::Sender<Arc<VersionedRecord>>;

#[derive(Debug)]
struct Waiter {
    floor: Version,
    tx: WaiterTx,
}

/// Pending long-poll registrations.
///
/// A waiter leaves the registry exactly once: either resolved by
/// [`WaiterRegistry::drain`] (which consumes its sender) or removed by
/// [`WaiterRegistry::remove`]. Both need `&mut self`, so they cannot
/// interleave for the same waiter.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    pending: HashMap<WaiterId, Waiter>,
}

impl WaiterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a waiter. A duplicate id replaces the older entry, whose
    /// receiver then observes a closed channel.
    pub fn insert(&mut self, id: WaiterId, floor: Version, tx: WaiterTx) {
        trace!(waiter = id, floor, "waiter registered");
        self.pending.insert(id, Waiter { floor, tx });
    }

    /// Removes a waiter that has not been resolved yet.
    ///
    /// Returns `false` when the waiter already left the registry, which is
    /// the normal outcome when a drain won the race against a timeout.
    pub fn remove(&mut self, id: WaiterId) -> bool {
        let removed = self.pending.remove(&id).is_some();
        trace!(waiter = id, removed, "waiter removed");
        removed
    }

    /// Number of pending waiters.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Resolves every pending waiter with `record` and empties the registry.
    ///
    /// Returns how many waiters were still listening.
    pub fn drain(&mut self, record: &Arc<VersionedRecord>) -> usize {
        let mut delivered = 0;
        for (id, waiter) in self.pending.drain() {
            trace!(
                waiter = id,
                floor = waiter.floor,
                version = record.version(),
                "resolving waiter"
            );
            if waiter.tx.send(Arc::clone(record)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
