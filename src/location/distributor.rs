//! Per-contact encryption and batch submission of the user's location.
//!
//! # Publish
//!
//! ```text
//! contacts ─┬─ no public key ──────────────▶ skipped
//!           └─ filter_hierarchy(permission)
//!              + named label if rule admits
//!              → encrypt_for(contact key) ──▶ batch ──▶ DirectoryClient
//! ```
//!
//! A failure for one contact never blocks the others. The whole batch goes
//! to the directory in one call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::error::Result;
use super::hierarchy::{filter_hierarchy, Hierarchy};
use super::types::{
    Contact, ContactBlob, ContactEnvelope, ContactLocation, LocationPayload, LocationStatus,
    NamedLocation, PublishOutcome, PublishReport, SkipReason,
};
use crate::crypto::{decrypt_from, encrypt_for, CryptoError};
use crate::identity::{parse_public_key, Identity};

/// Server-side contact directory and location mailbox.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Returns the user's accepted contacts.
    async fn contacts(&self) -> Result<Vec<Contact>>;

    /// Replaces the user's stored location for each contact in `batch`.
    async fn submit_encrypted_locations(&self, batch: &[ContactBlob]) -> Result<()>;

    /// Registers the user's base64 public key.
    async fn register_public_key(&self, public_key: &str) -> Result<()>;

    /// Returns the latest location envelope from each contact.
    async fn contact_locations(&self) -> Result<Vec<ContactEnvelope>>;
}

/// Builds the plaintext a single contact may receive.
#[must_use]
pub fn payload_for(
    contact: &Contact,
    hierarchy: &Hierarchy,
    named_location: Option<&NamedLocation>,
    timestamp: DateTime<Utc>,
) -> LocationPayload {
    LocationPayload {
        hierarchy: filter_hierarchy(hierarchy, contact.permission_granted.as_deref()),
        named_location: named_location
            .and_then(|named| named.label_for(&contact.id))
            .map(str::to_string),
        timestamp,
    }
}

/// Encrypts a payload for every contact that can receive one.
///
/// Contacts without a usable public key, or whose encryption fails, are
/// recorded in the report and left out of the batch.
#[must_use]
pub fn build_batch(
    contacts: &[Contact],
    hierarchy: &Hierarchy,
    named_location: Option<&NamedLocation>,
    identity: &Identity,
    timestamp: DateTime<Utc>,
) -> (Vec<ContactBlob>, PublishReport) {
    let mut batch = Vec::with_capacity(contacts.len());
    let mut report = PublishReport::default();

    for contact in contacts {
        let Some(encoded_key) = contact.public_key.as_deref() else {
            debug!(contact_id = %contact.id, "skipping contact without public key");
            report.skipped.insert(contact.id.clone(), SkipReason::NoPublicKey);
            continue;
        };

        let public_key = match parse_public_key(encoded_key) {
            Ok(key) => key,
            Err(e) => {
                warn!(contact_id = %contact.id, error = %e, "contact public key is invalid");
                report.skipped.insert(contact.id.clone(), SkipReason::InvalidPublicKey);
                continue;
            }
        };

        let payload = payload_for(contact, hierarchy, named_location, timestamp);
        match encrypt_for(&payload, &public_key, identity) {
            Ok(blob) => {
                batch.push(ContactBlob {
                    contact_id: contact.id.clone(),
                    blob,
                });
                report.sent.push(contact.id.clone());
            }
            Err(e) => {
                warn!(contact_id = %contact.id, error = %e, "failed to encrypt location");
                report.skipped.insert(contact.id.clone(), SkipReason::EncryptionFailed);
            }
        }
    }

    (batch, report)
}

/// Decrypts each contact's envelope independently.
///
/// One bad envelope marks only that contact as undecryptable.
#[must_use]
pub fn decrypt_contact_locations(
    envelopes: &[ContactEnvelope],
    identity: &Identity,
) -> Vec<ContactLocation> {
    envelopes
        .iter()
        .map(|envelope| ContactLocation {
            contact_id: envelope.contact_id.clone(),
            status: decrypt_envelope(envelope, identity),
        })
        .collect()
}

fn decrypt_envelope(envelope: &ContactEnvelope, identity: &Identity) -> LocationStatus {
    let (Some(encoded_key), Some(blob)) = (envelope.public_key.as_deref(), envelope.blob.as_ref())
    else {
        return LocationStatus::Unavailable;
    };

    let result = parse_public_key(encoded_key)
        .and_then(|key| decrypt_from::<LocationPayload>(blob, &key, identity));

    match result {
        Ok(payload) => LocationStatus::Decrypted(payload),
        Err(CryptoError::UnsupportedVersion(version)) => {
            warn!(contact_id = %envelope.contact_id, version, "unsupported location envelope");
            LocationStatus::Undecryptable
        }
        Err(e) => {
            debug!(contact_id = %envelope.contact_id, error = %e, "could not decrypt location");
            LocationStatus::Undecryptable
        }
    }
}

/// Publishes and receives locations through a [`DirectoryClient`].
pub struct LocationDistributor {
    directory: Arc<dyn DirectoryClient>,
}

impl LocationDistributor {
    /// Creates a distributor over `directory`.
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryClient>) -> Self {
        Self { directory }
    }

    /// Registers the identity's public key with the directory.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::Directory`](super::LocationError::Directory)
    /// if the directory rejects the key.
    pub async fn register_identity(&self, identity: &Identity) -> Result<()> {
        let public_key = identity.public_key_base64();
        self.directory.register_public_key(&public_key).await?;
        info!(public_key = %identity.public_key_hex(), "registered public key");
        Ok(())
    }

    /// Encrypts the location for `contacts` and submits the batch.
    ///
    /// Without an identity nothing is encrypted or sent and
    /// [`PublishOutcome::NoIdentity`] is returned. An empty batch is not
    /// submitted.
    ///
    /// # Errors
    ///
    /// Returns a directory error only if the batch submission itself fails.
    pub async fn publish_to(
        &self,
        contacts: &[Contact],
        hierarchy: &Hierarchy,
        named_location: Option<&NamedLocation>,
        identity: Option<&Identity>,
    ) -> Result<PublishOutcome> {
        let Some(identity) = identity else {
            debug!("no identity loaded, skipping publish");
            return Ok(PublishOutcome::NoIdentity);
        };

        let (batch, report) =
            build_batch(contacts, hierarchy, named_location, identity, Utc::now());

        if batch.is_empty() {
            debug!(skipped = report.skipped.len(), "no contacts to publish to");
            return Ok(PublishOutcome::Published(report));
        }

        self.directory.submit_encrypted_locations(&batch).await?;
        info!(
            sent = report.sent.len(),
            skipped = report.skipped.len(),
            "published location"
        );
        Ok(PublishOutcome::Published(report))
    }

    /// Fetches the contact list, then runs [`Self::publish_to`].
    ///
    /// # Errors
    ///
    /// Returns a directory error if the contact list or the submission fails.
    pub async fn publish(
        &self,
        hierarchy: &Hierarchy,
        named_location: Option<&NamedLocation>,
        identity: Option<&Identity>,
    ) -> Result<PublishOutcome> {
        if identity.is_none() {
            debug!("no identity loaded, skipping publish");
            return Ok(PublishOutcome::NoIdentity);
        }
        let contacts = self.directory.contacts().await?;
        self.publish_to(&contacts, hierarchy, named_location, identity)
            .await
    }

    /// Fetches and decrypts every contact's latest location.
    ///
    /// Without an identity every present envelope is reported as
    /// undecryptable.
    ///
    /// # Errors
    ///
    /// Returns a directory error if the envelopes cannot be fetched.
    pub async fn receive(&self, identity: Option<&Identity>) -> Result<Vec<ContactLocation>> {
        let envelopes = self.directory.contact_locations().await?;

        let Some(identity) = identity else {
            debug!(count = envelopes.len(), "no identity loaded, cannot decrypt");
            return Ok(envelopes
                .into_iter()
                .map(|envelope| ContactLocation {
                    status: if envelope.public_key.is_some() && envelope.blob.is_some() {
                        LocationStatus::Undecryptable
                    } else {
                        LocationStatus::Unavailable
                    },
                    contact_id: envelope.contact_id,
                })
                .collect());
        };

        let locations = decrypt_contact_locations(&envelopes, identity);
        debug!(
            total = locations.len(),
            decrypted = locations.iter().filter(|l| l.payload().is_some()).count(),
            "received contact locations"
        );
        Ok(locations)
    }
}

impl std::fmt::Debug for LocationDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationDistributor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::hierarchy::{HierarchyLevel, PLANET_EARTH};
    use crate::location::types::VisibilityRule;
    use crate::location::LocationError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDirectory {
        contacts: Vec<Contact>,
        submissions: Mutex<Vec<Vec<ContactBlob>>>,
        registered: Mutex<Option<String>>,
        envelopes: Vec<ContactEnvelope>,
        offline: bool,
    }

    #[async_trait]
    impl DirectoryClient for RecordingDirectory {
        async fn contacts(&self) -> Result<Vec<Contact>> {
            if self.offline {
                return Err(LocationError::directory("offline"));
            }
            Ok(self.contacts.clone())
        }

        async fn submit_encrypted_locations(&self, batch: &[ContactBlob]) -> Result<()> {
            if self.offline {
                return Err(LocationError::directory("offline"));
            }
            self.submissions.lock().unwrap().push(batch.to_vec());
            Ok(())
        }

        async fn register_public_key(&self, public_key: &str) -> Result<()> {
            *self.registered.lock().unwrap() = Some(public_key.to_string());
            Ok(())
        }

        async fn contact_locations(&self) -> Result<Vec<ContactEnvelope>> {
            Ok(self.envelopes.clone())
        }
    }

    fn hierarchy() -> Hierarchy {
        Hierarchy::new()
            .with(HierarchyLevel::Street, "Main St")
            .with(HierarchyLevel::City, "Springfield")
            .with(HierarchyLevel::Planet, PLANET_EARTH)
    }

    fn contact_for(id: &str, identity: &Identity, level: HierarchyLevel) -> Contact {
        Contact::new(id)
            .with_public_key(identity.public_key_base64())
            .with_permission(level)
    }

    #[test]
    fn payload_for_filters_and_hides_label() {
        let contact = Contact::new("c1").with_permission(HierarchyLevel::City);
        let home = NamedLocation::new("Home", VisibilityRule::private());
        let payload = payload_for(&contact, &hierarchy(), Some(&home), Utc::now());

        assert!(!payload.hierarchy.contains(HierarchyLevel::Street));
        assert_eq!(payload.hierarchy.get(HierarchyLevel::City), Some("Springfield"));
        assert!(payload.named_location.is_none());
    }

    #[test]
    fn build_batch_records_bad_keys() {
        let me = Identity::generate().unwrap();
        let friend = Identity::generate().unwrap();
        let contacts = vec![
            contact_for("good", &friend, HierarchyLevel::City),
            Contact::new("bad").with_public_key("not-a-key"),
            Contact::new("none"),
        ];

        let (batch, report) = build_batch(&contacts, &hierarchy(), None, &me, Utc::now());
        assert_eq!(batch.len(), 1);
        assert_eq!(report.sent, vec!["good".to_string()]);
        assert_eq!(report.skipped.get("bad"), Some(&SkipReason::InvalidPublicKey));
        assert_eq!(report.skipped.get("none"), Some(&SkipReason::NoPublicKey));
    }

    #[tokio::test]
    async fn publish_to_without_identity_is_noop() {
        let directory = Arc::new(RecordingDirectory::default());
        let distributor = LocationDistributor::new(directory.clone());
        let friend = Identity::generate().unwrap();

        let outcome = distributor
            .publish_to(
                &[contact_for("c1", &friend, HierarchyLevel::City)],
                &hierarchy(),
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome, PublishOutcome::NoIdentity);
        assert!(directory.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_not_submitted() {
        let directory = Arc::new(RecordingDirectory::default());
        let distributor = LocationDistributor::new(directory.clone());
        let me = Identity::generate().unwrap();

        let outcome = distributor
            .publish_to(&[Contact::new("c1")], &hierarchy(), None, Some(&me))
            .await
            .unwrap();

        let PublishOutcome::Published(report) = outcome else {
            panic!("expected a report");
        };
        assert!(report.sent.is_empty());
        assert!(directory.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_fetches_contacts_and_submits_once() {
        let me = Identity::generate().unwrap();
        let alice = Identity::generate().unwrap();
        let bob = Identity::generate().unwrap();
        let directory = Arc::new(RecordingDirectory {
            contacts: vec![
                contact_for("alice", &alice, HierarchyLevel::Street),
                contact_for("bob", &bob, HierarchyLevel::Planet),
            ],
            ..RecordingDirectory::default()
        });
        let distributor = LocationDistributor::new(directory.clone());

        distributor.publish(&hierarchy(), None, Some(&me)).await.unwrap();

        let submissions = directory.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].len(), 2);

        let bob_blob = submissions[0].iter().find(|b| b.contact_id == "bob").unwrap();
        let payload: LocationPayload =
            decrypt_from(&bob_blob.blob, &me.public_key_bytes(), &bob).unwrap();
        assert_eq!(payload.hierarchy, Hierarchy::planet_only());
    }

    #[tokio::test]
    async fn submission_failure_is_directory_error() {
        let me = Identity::generate().unwrap();
        let friend = Identity::generate().unwrap();
        let directory = Arc::new(RecordingDirectory {
            offline: true,
            ..RecordingDirectory::default()
        });
        let distributor = LocationDistributor::new(directory);

        let result = distributor
            .publish_to(
                &[contact_for("c1", &friend, HierarchyLevel::City)],
                &hierarchy(),
                None,
                Some(&me),
            )
            .await;
        assert!(matches!(result, Err(LocationError::Directory(_))));
    }

    #[tokio::test]
    async fn register_identity_sends_base64_key() {
        let directory = Arc::new(RecordingDirectory::default());
        let distributor = LocationDistributor::new(directory.clone());
        let me = Identity::generate().unwrap();

        distributor.register_identity(&me).await.unwrap();
        assert_eq!(
            directory.registered.lock().unwrap().as_deref(),
            Some(me.public_key_base64().as_str())
        );
    }

    #[tokio::test]
    async fn receive_isolates_failures() {
        let me = Identity::generate().unwrap();
        let alice = Identity::generate().unwrap();
        let mallory = Identity::generate().unwrap();

        let payload = LocationPayload {
            hierarchy: Hierarchy::planet_only(),
            named_location: Some("Gym".to_string()),
            timestamp: Utc::now(),
        };
        let from_alice = encrypt_for(&payload, &me.public_key_bytes(), &alice).unwrap();
        // Encrypted for someone else.
        let misaddressed = encrypt_for(&payload, &alice.public_key_bytes(), &mallory).unwrap();

        let directory = Arc::new(RecordingDirectory {
            envelopes: vec![
                ContactEnvelope {
                    contact_id: "alice".to_string(),
                    public_key: Some(alice.public_key_base64()),
                    blob: Some(from_alice),
                },
                ContactEnvelope {
                    contact_id: "mallory".to_string(),
                    public_key: Some(mallory.public_key_base64()),
                    blob: Some(misaddressed),
                },
                ContactEnvelope {
                    contact_id: "quiet".to_string(),
                    public_key: None,
                    blob: None,
                },
            ],
            ..RecordingDirectory::default()
        });
        let distributor = LocationDistributor::new(directory);

        let locations = distributor.receive(Some(&me)).await.unwrap();
        assert_eq!(locations.len(), 3);
        assert_eq!(locations[0].payload(), Some(&payload));
        assert_eq!(locations[1].status, LocationStatus::Undecryptable);
        assert_eq!(locations[2].status, LocationStatus::Unavailable);

        let without_identity = distributor.receive(None).await.unwrap();
        assert_eq!(without_identity[0].status, LocationStatus::Undecryptable);
        assert_eq!(without_identity[2].status, LocationStatus::Unavailable);
    }
}
