//! Detection of out-of-band edits to the backing file.
//!
//! A [`ChangeSource`] produces a stream of "file possibly changed" signals.
//! The watcher task in [`watcher`] debounces them, re-reads the file and
//! hands differing content to the runtime, which commits it as a new
//! version and wakes long-poll waiters.

/// OS notification backed source.
pub mod notify_source;
/// Debounce and reconcile loop.
pub mod watcher;

use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub use notify_source::NotifySource;
pub use watcher::{WatcherConfig, spawn_file_watcher};

/// Hint that the backing file may have changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSignal {
    /// File contents were written.
    Modified,
    /// File was created.
    Created,
    /// File was renamed into place.
    Renamed,
    /// Re-check requested without a filesystem event.
    Rescan,
}

/// Failures establishing a change source.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The OS notification backend refused the watch.
    #[error("could not watch backing file: {0}")]
    Notify(#[from] notify::Error),
    /// The source can only be subscribed once and already was.
    #[error("change source already consumed")]
    Exhausted,
}

/// Stream of change hints.
pub type SignalStream = BoxStream<'static, ChangeSignal>;

/// Producer of change hints for one file.
///
/// Each call to [`ChangeSource::signals`] starts a fresh sequence; the
/// watcher calls it again when a sequence ends.
pub trait ChangeSource: Send + 'static {
    /// Starts a new signal sequence.
    fn signals(&mut self) -> Result<SignalStream, WatchError>;
}

/// Source fed by hand through an unbounded sender.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Option<mpsc::UnboundedReceiver<ChangeSignal>>,
}

impl ChannelSource {
    /// Creates the source and the sender that drives it.
    pub fn new() -> (mpsc::UnboundedSender<ChangeSignal>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx: Some(rx) })
    }
}

impl ChangeSource for ChannelSource {
    fn signals(&mut self) -> Result<SignalStream, WatchError> {
        let rx = self.rx.take().ok_or(WatchError::Exhausted)?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
