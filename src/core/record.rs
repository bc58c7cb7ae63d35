//! Immutable versioned snapshot of the contact list.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    contact::{Contact, contacts_to_json},
    types::{INITIAL_VERSION, Version},
};

/// Full contact list tagged with a version and commit time.
///
/// Records are never mutated. A commit builds a successor with
/// `version + 1` and the previous record stays valid for anyone still
/// holding it. The JSON rendering is computed once at construction so reads
/// never re-serialize and never fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    version: Version,
    timestamp: DateTime<Utc>,
    contacts: Arc<[Contact]>,
    json: Arc<str>,
}

impl VersionedRecord {
    /// Builds the load-time record at [`INITIAL_VERSION`].
    pub fn initial(contacts: Vec<Contact>) -> Result<Self, serde_json::Error> {
        Self::build(INITIAL_VERSION, contacts)
    }

    /// Builds the successor holding `contacts`.
    pub fn successor(&self, contacts: Vec<Contact>) -> Result<Self, serde_json::Error> {
        Self::build(self.version + 1, contacts)
    }

    /// Builds the successor holding this record's contacts plus `contact`.
    pub fn appended(&self, contact: Contact) -> Result<Self, serde_json::Error> {
        let mut contacts = Vec::with_capacity(self.contacts.len() + 1);
        contacts.extend_from_slice(&self.contacts);
        contacts.push(contact);
        self.successor(contacts)
    }

    fn build(version: Version, contacts: Vec<Contact>) -> Result<Self, serde_json::Error> {
        let json = contacts_to_json(&contacts)?;
        Ok(Self {
            version,
            timestamp: Utc::now(),
            contacts: contacts.into(),
            json: json.into(),
        })
    }

    /// Snapshot version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Commit time of this snapshot.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Contacts in append order.
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// JSON array rendering of [`Self::contacts`].
    pub fn json(&self) -> &str {
        &self.json
    }

    /// Order- and length-sensitive structural comparison against `contacts`.
    pub fn same_contacts(&self, contacts: &[Contact]) -> bool {
        *self.contacts == *contacts
    }
}
