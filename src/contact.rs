//! Contact-form submission record.

use serde::{Deserialize, Serialize};

/// One contact-form submission.
///
/// Contacts carry no identity: insertion order is the only ordering and two
/// contacts with the same fields are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    /// Sender display name.
    pub name: String,
    /// Sender email address.
    pub email: String,
    /// Free-form message body.
    pub message: String,
}

impl Contact {
    /// Builds a contact from its three fields.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            message: message.into(),
        }
    }
}

/// Renders a contact sequence as the JSON array used on disk and on the wire.
pub fn contacts_to_json(contacts: &[Contact]) -> Result<String, serde_json::Error> {
    serde_json::to_string(contacts)
}
