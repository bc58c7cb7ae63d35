use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::{
    contact::Contact,
    types::{Version, WaiterId},
};

use super::{
    record::VersionedRecord,
    waiters::{WaiterRegistry, WaiterTx},
};

/// Failures raised while building a new snapshot.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The contact list could not be rendered as JSON.
    #[error("could not encode contacts: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result of a commit: the new current record and how many waiters it woke.
#[derive(Debug, Clone)]
pub struct Commit {
    /// Record now visible to readers.
    pub record: Arc<VersionedRecord>,
    /// Waiters resolved by the commit's drain.
    pub woken: usize,
}

/// Outcome of [`ContactStore::register_waiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A newer version already existed; the waiter was resolved immediately.
    Ready(Version),
    /// The waiter is parked until the next commit.
    Pending,
}

/// Lock-free, cloneable view of the current record.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    current: Arc<ArcSwap<VersionedRecord>>,
}

impl SnapshotReader {
    /// Latest committed record.
    pub fn load(&self) -> Arc<VersionedRecord> {
        self.current.load_full()
    }

    /// Version of the latest committed record.
    pub fn version(&self) -> Version {
        self.current.load().version()
    }
}

/// Authoritative contact list plus its waiter registry.
///
/// All mutation goes through `&mut self`; the runtime owns the store from a
/// single task, which gives commits, registrations and removals one total
/// order. Readers use [`SnapshotReader`] and never block the owner.
#[derive(Debug)]
pub struct ContactStore {
    current: Arc<ArcSwap<VersionedRecord>>,
    waiters: WaiterRegistry,
}

impl ContactStore {
    /// Builds a store at version 1 holding `contacts`.
    pub fn from_contacts(contacts: Vec<Contact>) -> Result<Self, StoreError> {
        let record = VersionedRecord::initial(contacts)?;
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(record)),
            waiters: WaiterRegistry::new(),
        })
    }

    /// Builds an empty store at version 1.
    pub fn empty() -> Result<Self, StoreError> {
        Self::from_contacts(Vec::new())
    }

    /// Reader sharing this store's current-record pointer.
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            current: Arc::clone(&self.current),
        }
    }

    /// Latest committed record.
    pub fn current(&self) -> Arc<VersionedRecord> {
        self.current.load_full()
    }

    /// Version of the latest committed record.
    pub fn version(&self) -> Version {
        self.current.load().version()
    }

    /// Appends `contact` and commits the successor record.
    pub fn append(&mut self, contact: Contact) -> Result<Commit, StoreError> {
        let next = self.current.load().appended(contact)?;
        Ok(self.commit(next))
    }

    /// Folds a contact list read from outside into the timeline.
    ///
    /// Returns `None` without committing when `contacts` is structurally
    /// equal to the current list.
    pub fn fold_external(&mut self, contacts: Vec<Contact>) -> Result<Option<Commit>, StoreError> {
        let current = self.current.load_full();
        if current.same_contacts(&contacts) {
            return Ok(None);
        }
        let next = current.successor(contacts)?;
        Ok(Some(self.commit(next)))
    }

    /// Parks a waiter interested in versions newer than `since`.
    ///
    /// If the current version is already newer the waiter is resolved on
    /// the spot and never enters the registry.
    pub fn register_waiter(&mut self, id: WaiterId, since: Version, tx: WaiterTx) -> Registration {
        let current = self.current.load_full();
        if current.version() > since {
            let version = current.version();
            let _ = tx.send(current);
            return Registration::Ready(version);
        }
        self.waiters.insert(id, since, tx);
        Registration::Pending
    }

    /// Removes a waiter that gave up. See [`WaiterRegistry::remove`].
    pub fn remove_waiter(&mut self, id: WaiterId) -> bool {
        self.waiters.remove(id)
    }

    /// Number of parked waiters.
    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    fn commit(&mut self, next: VersionedRecord) -> Commit {
        let record = Arc::new(next);
        self.current.store(Arc::clone(&record));
        let woken = self.waiters.drain(&record);
        Commit { record, woken }
    }
}
