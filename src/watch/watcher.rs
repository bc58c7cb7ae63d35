use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{persist::json_file::read_contacts, runtime::handle::ContactStoreHandle};

use super::ChangeSource;

const MAX_SOURCE_RESTARTS: usize = 3;

/// Watcher tuning.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period required after the last signal before re-reading.
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(150),
        }
    }
}

/// Spawns the task that folds external edits of `path` into `handle`.
///
/// If `source` cannot be established the task logs a warning and exits;
/// the store keeps working without external change detection. The task
/// also exits when `shutdown` is cancelled.
pub fn spawn_file_watcher<S: ChangeSource>(
    mut source: S,
    path: PathBuf,
    handle: ContactStoreHandle,
    config: WatcherConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut signals = match source.signals() {
            Ok(signals) => signals,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "external change detection disabled");
                return;
            }
        };
        let mut restarts = 0usize;

        loop {
            let signal = tokio::select! {
                () = shutdown.cancelled() => break,
                signal = signals.next() => signal,
            };

            let Some(signal) = signal else {
                if restarts == MAX_SOURCE_RESTARTS {
                    warn!(path = %path.display(), "change source keeps ending; external change detection disabled");
                    break;
                }
                restarts += 1;
                match source.signals() {
                    Ok(fresh) => {
                        debug!(restarts, "change source restarted");
                        signals = fresh;
                        continue;
                    }
                    Err(err) => {
                        warn!(error = %err, "could not restart change source; external change detection disabled");
                        break;
                    }
                }
            };
            trace!(?signal, "backing file may have changed");

            // Trailing-edge debounce: every further signal restarts the quiet period.
            let mut absorbed = 0usize;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    more = signals.next() => match more {
                        Some(_) => absorbed += 1,
                        None => break,
                    },
                    () = tokio::time::sleep(config.debounce) => break,
                }
            }
            if absorbed > 0 {
                trace!(absorbed, "coalesced change signals");
            }

            reconcile(&path, &handle).await;
        }
        debug!(path = %path.display(), "file watcher stopped");
    })
}

// The runtime drops the list if memory holds versions the file has not
// received yet, so a touch during a queued or failed write cannot roll
// back the newest contacts.
async fn reconcile(path: &Path, handle: &ContactStoreHandle) {
    let read_path = path.to_path_buf();
    let contacts = match tokio::task::spawn_blocking(move || read_contacts(&read_path)).await {
        Ok(Ok(Some(contacts))) => contacts,
        Ok(Ok(None)) => {
            debug!(path = %path.display(), "backing file missing; ignoring change");
            return;
        }
        Ok(Err(err)) => {
            debug!(error = %err, "discarding unreadable external change");
            return;
        }
        Err(err) => {
            warn!(error = %err, "backing file read task failed");
            return;
        }
    };

    if handle.snapshot().same_contacts(&contacts) {
        trace!("backing file matches memory");
        return;
    }

    match handle.apply_external(contacts).await {
        Ok(Some(version)) => debug!(version, path = %path.display(), "external edit picked up"),
        Ok(None) => trace!("external edit already reflected"),
        Err(err) => warn!(error = %err, "could not fold external edit"),
    }
}
