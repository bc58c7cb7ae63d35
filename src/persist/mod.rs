pub mod json_file;

use std::{io, path::{Path, PathBuf}};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    contact::Contact,
    core::store::{ContactStore, StoreError},
};

/// Failures raised by a [`ContactSink`].
#[derive(Debug, Error)]
pub enum PersistError {
    /// Reading or writing the backing file failed.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The backing file does not hold a contact array.
    #[error("malformed contact data: {0}")]
    Serde(#[from] serde_json::Error),
    /// The persistence queue had no room for another write.
    #[error("persistence queue is full")]
    QueueFull,
    /// Any other failure, already rendered.
    #[error("{0}")]
    Message(String),
}

/// Result alias for sink operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable home of the contact list.
///
/// Sinks store the whole list; every write replaces what was there.
pub trait ContactSink: Send {
    /// Reads the persisted list. `Ok(None)` means nothing has been persisted yet.
    fn load(&self) -> PersistResult<Option<Vec<Contact>>>;

    /// Replaces the persisted list with `json`, a rendered contact array.
    fn write_all(&mut self, json: &str) -> PersistResult<()>;

    /// Forces buffered data down to the medium.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }

    /// File that external editors may modify, if the sink is file-backed.
    fn watch_path(&self) -> Option<&Path> {
        None
    }

    /// Builds the initial store from the persisted list.
    ///
    /// A missing or unreadable list yields an empty store; the failure is
    /// logged and never propagated.
    fn load_store(&self) -> Result<ContactStore, StoreError> {
        let contacts = match self.load() {
            Ok(Some(contacts)) => contacts,
            Ok(None) => {
                debug!("no persisted contacts; starting empty");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "could not load persisted contacts; starting empty");
                Vec::new()
            }
        };
        ContactStore::from_contacts(contacts)
    }
}
