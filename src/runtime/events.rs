//! Runtime event stream payloads.

use crate::types::Version;

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactEvent {
    /// A contact was stored.
    Stored {
        /// Version created by the store.
        version: Version,
        /// Long-poll waiters woken by it.
        woken: usize,
    },
    /// An out-of-band edit of the backing file was folded in.
    ExternalChange {
        /// Version created for the edit.
        version: Version,
        /// Long-poll waiters woken by it.
        woken: usize,
    },
    /// The backing file holds at least this version.
    Persisted {
        /// Highest version known durable.
        version: Version,
    },
    /// Writing a version to the backing file failed.
    PersistFailed {
        /// Version that could not be written.
        version: Version,
        /// Rendered error.
        reason: String,
    },
}
