use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::ModifyKind,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ChangeSignal, ChangeSource, SignalStream, WatchError};

/// [`ChangeSource`] backed by the platform's file notification API.
///
/// Watches the parent directory rather than the file so that creation and
/// rename-into-place are observed, then filters events down to the file's
/// name.
#[derive(Debug, Clone)]
pub struct NotifySource {
    path: PathBuf,
}

impl NotifySource {
    /// Source for the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChangeSource for NotifySource {
    fn signals(&mut self) -> Result<SignalStream, WatchError> {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| {
                WatchError::Notify(notify::Error::generic("backing path has no file name"))
            })?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Some(signal) = classify(&event, &file_name) {
                    let _ = tx.send(signal);
                }
            }
            Err(err) => warn!(error = %err, "file notification error"),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        debug!(dir = %dir.display(), "watching for external edits");

        Ok(Box::pin(NotifySignals {
            _watcher: watcher,
            rx,
        }))
    }
}

fn classify(event: &Event, file_name: &OsString) -> Option<ChangeSignal> {
    let touches_file = event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name.as_os_str()));
    if !touches_file {
        return None;
    }
    match event.kind {
        EventKind::Create(_) => Some(ChangeSignal::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeSignal::Renamed),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) | EventKind::Any => Some(ChangeSignal::Modified),
        EventKind::Access(_) | EventKind::Remove(_) | EventKind::Other => None,
    }
}

// Keeps the OS watcher alive for as long as the stream is held.
struct NotifySignals {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<ChangeSignal>,
}

impl Stream for NotifySignals {
    type Item = ChangeSignal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
