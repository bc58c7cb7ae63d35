use std::sync::{
    Arc,
    atomic::{AtomicI64, AtomicU64, Ordering},
};

use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    contact::Contact,
    core::{
        record::VersionedRecord,
        store::{ContactStore, SnapshotReader, StoreError},
        waiters::WaiterTx,
    },
    persist::{ContactSink, PersistError, PersistResult},
    types::{Version, WaiterId},
};

use super::{
    events::ContactEvent,
    wait::{WaitOutcome, WaiterGuard, WakeReason},
};

/// Failures surfaced by [`ContactStoreHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The contact was committed in memory but could not be persisted.
    #[error("could not store contact")]
    Persist(#[source] Arc<PersistError>),
    /// Flushing the sink failed.
    #[error("could not flush contacts")]
    Flush(#[source] PersistError),
    /// Building the new snapshot failed; nothing was committed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The runtime has shut down.
    #[error("contact store runtime is not running")]
    ChannelClosed,
}

/// Queue sizes for the runtime loop and its persistence worker.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity of the command channel.
    pub command_queue_bound: usize,
    /// Capacity of the persistence queue; a full queue fails the store.
    pub persist_queue_bound: usize,
    /// Most queued writes folded into one file write.
    pub batch_max_writes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_queue_bound: 256,
            persist_queue_bound: 64,
            batch_max_writes: 32,
        }
    }
}

/// Cloneable facade over a running contact store.
///
/// Writes and waiter bookkeeping go through the runtime loop; reads of the
/// current snapshot are served directly from the shared pointer.
#[derive(Clone)]
pub struct ContactStoreHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<ContactEvent>,
    reader: SnapshotReader,
    durable: Arc<AtomicI64>,
    next_waiter_id: Arc<AtomicU64>,
}

type StoreResp = oneshot::Sender<Result<String, RuntimeError>>;

pub(crate) enum Command {
    Store {
        contact: Contact,
        resp: StoreResp,
    },
    External {
        contacts: Vec<Contact>,
        resp: oneshot::Sender<Result<Option<Version>, RuntimeError>>,
    },
    Register {
        id: WaiterId,
        since: Version,
        waiter: WaiterTx,
    },
    Unregister {
        id: WaiterId,
    },
    PendingWaiters {
        resp: oneshot::Sender<usize>,
    },
    Flush {
        resp: oneshot::Sender<Result<Version, RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Write {
        record: Arc<VersionedRecord>,
        resp: StoreResp,
    },
    Flush {
        resp: oneshot::Sender<PersistResult<Version>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Moves `store` into a runtime task and returns its handle.
///
/// Without a sink the runtime is purely in-memory and every store is
/// reported durable immediately.
pub fn spawn_contact_store(
    store: ContactStore,
    sink: Option<Box<dyn ContactSink>>,
    config: RuntimeConfig,
) -> ContactStoreHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<ContactEvent>(1024);
    let reader = store.reader();
    let durable = Arc::new(AtomicI64::new(store.version()));

    let persist_tx = sink.map(|sink| {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        spawn_persistence_worker(
            sink,
            persist_rx,
            events_tx.clone(),
            Arc::clone(&durable),
            config.clone(),
        );
        persist_tx
    });

    let events_tx_loop = events_tx.clone();
    let durable_loop = Arc::clone(&durable);

    tokio::spawn(async move {
        let mut store = store;
        while let Some(cmd) = cmd_rx.recv().await {
            let done = handle_command(
                cmd,
                &mut store,
                &events_tx_loop,
                &durable_loop,
                persist_tx.as_ref(),
            )
            .await;
            if done {
                break;
            }
        }
        debug!(
            version = store.version(),
            abandoned_waiters = store.pending_waiters(),
            "contact store runtime stopped"
        );
    });

    ContactStoreHandle {
        cmd_tx,
        events_tx,
        reader,
        durable,
        next_waiter_id: Arc::new(AtomicU64::new(1)),
    }
}

impl ContactStoreHandle {
    /// Subscribes to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<ContactEvent> {
        self.events_tx.subscribe()
    }

    /// Latest committed record.
    pub fn snapshot(&self) -> Arc<VersionedRecord> {
        self.reader.load()
    }

    /// Version of the latest committed record.
    pub fn version(&self) -> Version {
        self.reader.version()
    }

    /// Highest version known to be in the backing store.
    ///
    /// Lags [`ContactStoreHandle::version`] while writes are queued or after
    /// a write failed.
    pub fn durable_version(&self) -> Version {
        self.durable.load(Ordering::Acquire)
    }

    /// JSON array of all contacts in the latest committed record.
    pub fn get_all(&self) -> String {
        self.reader.load().json().to_owned()
    }

    /// Appends `contact`, persists the new list and returns it as JSON.
    ///
    /// The new version is visible to readers before persistence starts. On
    /// a persistence failure the error is returned but the in-memory commit
    /// stands.
    pub async fn store_contact(&self, contact: Contact) -> Result<String, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Store { contact, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Waits until a version newer than `since` exists, `timeout` elapses or
    /// `cancel` fires, then returns the snapshot.
    ///
    /// Returns without suspending when a newer version already exists.
    /// Timeout and cancellation are ordinary outcomes carrying the current
    /// snapshot, distinguished only by [`WaitOutcome::reason`].
    pub async fn wait_for_changes(
        &self,
        since: Version,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, RuntimeError> {
        let current = self.reader.load();
        if current.version() > since {
            return Ok(WaitOutcome::from_record(&current, WakeReason::Changed));
        }
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::from_record(&current, WakeReason::Cancelled));
        }

        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (waiter, mut resolved) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register { id, since, waiter })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        let mut guard = WaiterGuard::new(id, self.cmd_tx.clone());

        let reason = tokio::select! {
            record = &mut resolved => {
                guard.disarm();
                let record = record.map_err(|_| RuntimeError::ChannelClosed)?;
                return Ok(WaitOutcome::from_record(&record, WakeReason::Changed));
            }
            () = tokio::time::sleep(timeout) => WakeReason::TimedOut,
            () = cancel.cancelled() => WakeReason::Cancelled,
        };
        drop(guard);

        debug!(waiter = id, since, ?reason, "long-poll ended without a newer version");
        Ok(WaitOutcome::from_record(&self.reader.load(), reason))
    }

    /// Folds an externally observed contact list into the timeline.
    ///
    /// Returns the new version, or `None` if the list matched memory. The
    /// list is also ignored while memory holds versions the backing store
    /// has not received yet; it would predate them.
    pub async fn apply_external(&self, contacts: Vec<Contact>) -> Result<Option<Version>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::External { contacts, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Number of long-polls currently parked.
    pub async fn pending_waiters(&self) -> Result<usize, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::PendingWaiters { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Waits for queued writes to reach the sink and returns the highest
    /// durable version.
    pub async fn flush(&self) -> Result<Version, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Flush { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Flushes, stops the persistence worker and stops the runtime loop.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }
}

async fn handle_command(
    cmd: Command,
    store: &mut ContactStore,
    events_tx: &broadcast::Sender<ContactEvent>,
    durable: &AtomicI64,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) -> bool {
    match cmd {
        Command::Store { contact, resp } => {
            let commit = match store.append(contact) {
                Ok(commit) => commit,
                Err(err) => {
                    let _ = resp.send(Err(err.into()));
                    return false;
                }
            };
            let version = commit.record.version();
            debug!(version, woken = commit.woken, "contact stored");
            let _ = events_tx.send(ContactEvent::Stored {
                version,
                woken: commit.woken,
            });
            if let Some(tx) = persist_tx {
                enqueue_write(tx, commit.record, resp, events_tx);
            } else {
                durable.fetch_max(version, Ordering::AcqRel);
                let _ = events_tx.send(ContactEvent::Persisted { version });
                let _ = resp.send(Ok(commit.record.json().to_owned()));
            }
        }
        Command::External { contacts, resp } => {
            let unwritten = durable.load(Ordering::Acquire) < store.version();
            if unwritten {
                debug!(
                    version = store.version(),
                    durable = durable.load(Ordering::Acquire),
                    "ignoring external change while writes are outstanding"
                );
                let _ = resp.send(Ok(None));
                return false;
            }
            let out = store
                .fold_external(contacts)
                .map(|commit| {
                    commit.map(|commit| {
                        let version = commit.record.version();
                        // the list came from the backing file
                        durable.fetch_max(version, Ordering::AcqRel);
                        info!(version, woken = commit.woken, "folded external change");
                        let _ = events_tx.send(ContactEvent::ExternalChange {
                            version,
                            woken: commit.woken,
                        });
                        version
                    })
                })
                .map_err(RuntimeError::from);
            let _ = resp.send(out);
        }
        Command::Register { id, since, waiter } => {
            let registration = store.register_waiter(id, since, waiter);
            trace!(waiter = id, since, ?registration, "long-poll registered");
        }
        Command::Unregister { id } => {
            store.remove_waiter(id);
        }
        Command::PendingWaiters { resp } => {
            let _ = resp.send(store.pending_waiters());
        }
        Command::Flush { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::Flush))
                }
            } else {
                Ok(store.version())
            };
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (done_tx, done_rx) = oneshot::channel();
                if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    false
}

fn enqueue_write(
    tx: &mpsc::Sender<PersistMsg>,
    record: Arc<VersionedRecord>,
    resp: StoreResp,
    events_tx: &broadcast::Sender<ContactEvent>,
) {
    let (err, msg) = match tx.try_send(PersistMsg::Write { record, resp }) {
        Ok(()) => return,
        Err(mpsc::error::TrySendError::Full(msg)) => (PersistError::QueueFull, msg),
        Err(mpsc::error::TrySendError::Closed(msg)) => {
            (PersistError::Message("persistence worker stopped".to_string()), msg)
        }
    };
    if let PersistMsg::Write { record, resp } = msg {
        let version = record.version();
        warn!(version, error = %err, "could not enqueue contact write");
        let _ = events_tx.send(ContactEvent::PersistFailed {
            version,
            reason: err.to_string(),
        });
        let _ = resp.send(Err(RuntimeError::Persist(Arc::new(err))));
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn ContactSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    events_tx: broadcast::Sender<ContactEvent>,
    durable: Arc<AtomicI64>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let batch_max = config.batch_max_writes.max(1);
        let mut next = rx.recv().await;

        while let Some(msg) = next.take() {
            match msg {
                PersistMsg::Write { record, resp } => {
                    let mut batch = vec![(record, resp)];
                    while batch.len() < batch_max {
                        match rx.try_recv() {
                            Ok(PersistMsg::Write { record, resp }) => batch.push((record, resp)),
                            Ok(other) => {
                                next = Some(other);
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    write_batch(&sink, batch, &durable, &events_tx).await;
                }
                PersistMsg::Flush { resp } => {
                    let result = flush_sink(&sink).await;
                    let _ = resp.send(result.map(|()| durable.load(Ordering::Acquire)));
                }
                PersistMsg::Shutdown { resp } => {
                    if let Err(err) = flush_sink(&sink).await {
                        warn!(error = %err, "final flush failed");
                    }
                    let _ = resp.send(());
                    return;
                }
            }

            if next.is_none() {
                next = rx.recv().await;
            }
        }
    });
}

async fn write_batch(
    sink: &Arc<Mutex<Box<dyn ContactSink>>>,
    batch: Vec<(Arc<VersionedRecord>, StoreResp)>,
    durable: &AtomicI64,
    events_tx: &broadcast::Sender<ContactEvent>,
) {
    let Some(latest) = batch.last().map(|(record, _)| Arc::clone(record)) else {
        return;
    };
    let version = latest.version();

    let sink_ref = Arc::clone(sink);
    let result = match tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        sink.write_all(latest.json())?;
        sink.flush()
    })
    .await
    {
        Ok(inner) => inner,
        Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
    };

    match result {
        Ok(()) => {
            durable.fetch_max(version, Ordering::AcqRel);
            debug!(version, coalesced = batch.len(), "contacts persisted");
            let _ = events_tx.send(ContactEvent::Persisted { version });
            for (record, resp) in batch {
                let _ = resp.send(Ok(record.json().to_owned()));
            }
        }
        Err(err) => {
            warn!(version, error = %err, "could not persist contacts");
            let _ = events_tx.send(ContactEvent::PersistFailed {
                version,
                reason: err.to_string(),
            });
            let err = Arc::new(err);
            for (_, resp) in batch {
                let _ = resp.send(Err(RuntimeError::Persist(Arc::clone(&err))));
            }
        }
    }
}

async fn flush_sink(sink: &Arc<Mutex<Box<dyn ContactSink>>>) -> PersistResult<()> {
    let sink_ref = Arc::clone(sink);
    match tokio::task::spawn_blocking(move || sink_ref.blocking_lock().flush()).await {
        Ok(inner) => inner,
        Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
    }
}
