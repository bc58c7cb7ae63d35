//! Long-poll outcome and waiter cleanup.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::{core::record::VersionedRecord, types::{Version, WaiterId}};

use super::handle::Command;

/// Why a long-poll returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// A version newer than the caller's was available.
    Changed,
    /// The timeout elapsed first.
    TimedOut,
    /// The caller's cancellation token fired first.
    Cancelled,
}

/// Snapshot handed back by a long-poll.
///
/// Serializes as `{"json": ..., "version": ...}`; the reason stays
/// server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitOutcome {
    /// Contact array rendered as JSON text.
    pub json: String,
    /// Version of the returned snapshot.
    pub version: Version,
    /// Why the wait ended.
    #[serde(skip)]
    pub reason: WakeReason,
}

impl WaitOutcome {
    pub(crate) fn from_record(record: &VersionedRecord, reason: WakeReason) -> Self {
        Self {
            json: record.json().to_owned(),
            version: record.version(),
            reason,
        }
    }
}

/// Unregisters a parked waiter unless it was resolved.
///
/// Dropping the guard covers timeout, cancellation and the waiting future
/// being dropped mid-flight. If the command queue is full the entry stays
/// until the next drain, which finds its receiver gone.
pub(crate) struct WaiterGuard {
    id: WaiterId,
    cmd_tx: Option<mpsc::Sender<Command>>,
}

impl WaiterGuard {
    pub(crate) fn new(id: WaiterId, cmd_tx: mpsc::Sender<Command>) -> Self {
        Self {
            id,
            cmd_tx: Some(cmd_tx),
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.cmd_tx = None;
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.try_send(Command::Unregister { id: self.id });
        }
    }
}
