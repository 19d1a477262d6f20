//! Location data types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::hierarchy::{Hierarchy, HierarchyLevel};
use crate::crypto::EncryptedBlob;

/// Who may see a named location's label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityMode {
    /// Nobody; the default.
    #[default]
    Private,
    /// Every contact who receives a location.
    All,
    /// Only the listed contacts.
    Selected,
}

/// Visibility of a named location's label.
///
/// Independent of the hierarchy permission: a contact with `planet`
/// permission can still see "Home" if the rule admits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRule {
    /// Visibility mode.
    pub mode: VisibilityMode,

    /// Contacts admitted under [`VisibilityMode::Selected`].
    #[serde(default)]
    pub contact_ids: Vec<String>,
}

impl VisibilityRule {
    /// Visible to nobody.
    #[must_use]
    pub const fn private() -> Self {
        Self {
            mode: VisibilityMode::Private,
            contact_ids: Vec::new(),
        }
    }

    /// Visible to every contact.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            mode: VisibilityMode::All,
            contact_ids: Vec::new(),
        }
    }

    /// Visible to the listed contacts only.
    #[must_use]
    pub fn selected<I, S>(contact_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: VisibilityMode::Selected,
            contact_ids: contact_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns whether `contact_id` may see the label.
    #[must_use]
    pub fn admits(&self, contact_id: &str) -> bool {
        match self.mode {
            VisibilityMode::Private => false,
            VisibilityMode::All => true,
            VisibilityMode::Selected => self.contact_ids.iter().any(|id| id == contact_id),
        }
    }
}

/// The user's named place currently matching their position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedLocation {
    /// Label such as "Home" or "Soccer Field".
    pub label: String,

    /// Who may see the label.
    #[serde(default)]
    pub visibility: VisibilityRule,
}

impl NamedLocation {
    /// Creates a named location.
    #[must_use]
    pub fn new(label: impl Into<String>, visibility: VisibilityRule) -> Self {
        Self {
            label: label.into(),
            visibility,
        }
    }

    /// Returns the label if `contact_id` may see it.
    #[must_use]
    pub fn label_for(&self, contact_id: &str) -> Option<&str> {
        self.visibility
            .admits(contact_id)
            .then_some(self.label.as_str())
    }
}

/// Plaintext location sent to one contact.
///
/// Only ever leaves the device inside an [`EncryptedBlob`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    /// Filtered hierarchy the contact may see.
    pub hierarchy: Hierarchy,

    /// Named-location label, if disclosed to this contact.
    pub named_location: Option<String>,

    /// When the location was published (UTC).
    pub timestamp: DateTime<Utc>,
}

/// An accepted contact as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Opaque contact id.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Base64 X25519 public key. `None` until the contact registers one.
    #[serde(default)]
    pub public_key: Option<String>,

    /// Level the user granted to this contact.
    #[serde(default)]
    pub permission_granted: Option<String>,

    /// Level this contact granted to the user.
    #[serde(default)]
    pub permission_received: Option<String>,
}

impl Contact {
    /// Creates a contact with no key and no grants.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            public_key: None,
            permission_granted: None,
            permission_received: None,
        }
    }

    /// Builder-style public key.
    #[must_use]
    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    /// Builder-style granted level.
    #[must_use]
    pub fn with_permission(mut self, level: HierarchyLevel) -> Self {
        self.permission_granted = Some(level.as_str().to_string());
        self
    }
}

/// One `{contactId, blob}` pair in a batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactBlob {
    /// Recipient contact id.
    pub contact_id: String,

    /// Location encrypted for that contact.
    pub blob: EncryptedBlob,
}

/// A contact's latest location as held by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactEnvelope {
    /// Sender contact id.
    pub contact_id: String,

    /// Sender's base64 public key.
    #[serde(default)]
    pub public_key: Option<String>,

    /// Encrypted location, if the sender has published one.
    #[serde(default)]
    pub blob: Option<EncryptedBlob>,
}

/// Outcome of decrypting one contact's location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationStatus {
    /// Decrypted and parsed.
    Decrypted(LocationPayload),
    /// Present but could not be opened.
    Undecryptable,
    /// No key or no blob to work with.
    Unavailable,
}

/// A contact's location after the receive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactLocation {
    /// Sender contact id.
    pub contact_id: String,

    /// Decryption outcome.
    pub status: LocationStatus,
}

impl ContactLocation {
    /// Returns the decrypted payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&LocationPayload> {
        match &self.status {
            LocationStatus::Decrypted(payload) => Some(payload),
            LocationStatus::Undecryptable | LocationStatus::Unavailable => None,
        }
    }
}

/// Why a contact was left out of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Contact has not registered a public key.
    NoPublicKey,
    /// Public key could not be parsed.
    InvalidPublicKey,
    /// Encryption failed.
    EncryptionFailed,
}

/// Per-contact results of one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Contacts included in the submitted batch.
    pub sent: Vec<String>,

    /// Contacts left out, with the reason.
    pub skipped: BTreeMap<String, SkipReason>,
}

impl PublishReport {
    /// Returns whether `contact_id` was included in the batch.
    #[must_use]
    pub fn was_sent(&self, contact_id: &str) -> bool {
        self.sent.iter().any(|id| id == contact_id)
    }
}

/// Result of a publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// No identity is loaded; nothing was encrypted or sent.
    NoIdentity,
    /// A batch was built (and submitted if non-empty).
    Published(PublishReport),
}
