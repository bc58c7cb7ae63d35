//! Whole-file JSON array sink.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use crate::contact::Contact;

use super::{ContactSink, PersistError, PersistResult};

/// File name used when no path is configured.
pub const DEFAULT_FILE_NAME: &str = "contacts.json";

/// [`ContactSink`] that keeps the list as one JSON array on disk.
///
/// Every write overwrites the file in place. There is no temp-file rename,
/// so a crash mid-write can leave a truncated file; loading such a file
/// falls back to an empty list. The file trails memory while writes are
/// queued or after a failed write; the runtime ignores external edits
/// until it catches up.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    /// Sink backed by `path`. Relative paths resolve against the working
    /// directory at call time. Nothing is created until the first write.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir()
                .map_err(|source| PersistError::Io {
                    path: path.to_path_buf(),
                    source,
                })?
                .join(path)
        };
        Ok(Self { path })
    }

    /// Sink backed by [`DEFAULT_FILE_NAME`] in the working directory.
    pub fn in_working_dir() -> PersistResult<Self> {
        Self::open(DEFAULT_FILE_NAME)
    }

    /// Absolute path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContactSink for JsonFileSink {
    fn load(&self) -> PersistResult<Option<Vec<Contact>>> {
        read_contacts(&self.path)
    }

    fn write_all(&mut self, json: &str) -> PersistResult<()> {
        fs::write(&self.path, json).map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn watch_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Reads and parses the contact array at `path`.
///
/// A missing file is `Ok(None)`; a literal `null` is an empty list. An empty
/// or truncated file is a parse error.
pub fn read_contacts(path: &Path) -> PersistResult<Option<Vec<Contact>>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let contacts: Option<Vec<Contact>> = serde_json::from_str(&text)?;
    Ok(Some(contacts.unwrap_or_default()))
}
