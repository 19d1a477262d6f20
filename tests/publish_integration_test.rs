//! Integration tests for publishing and receiving locations.
//!
//! Every contact holds a real identity; the test decrypts what the fake
//! directory received exactly as each contact's device would.

mod helpers;

use std::sync::Arc;

use whereish_core::crypto::decrypt_from;
use whereish_core::identity::Identity;
use whereish_core::location::{
    Contact, ContactEnvelope, Hierarchy, HierarchyLevel, LocationDistributor, LocationError,
    LocationPayload, LocationStatus, NamedLocation, PublishOutcome, SkipReason, VisibilityRule,
    PLANET_EARTH,
};

use helpers::{contact_with_key, full_hierarchy, FakeDirectory};

fn main_street() -> Hierarchy {
    Hierarchy::new()
        .with(HierarchyLevel::Address, "1 Main St")
        .with(HierarchyLevel::City, "Springfield")
        .with(HierarchyLevel::Country, "USA")
        .with(HierarchyLevel::Planet, PLANET_EARTH)
}

/// Decrypts what `contact_id` received from `sender`.
fn opened_by(
    directory: &FakeDirectory,
    contact_id: &str,
    contact: &Identity,
    sender: &Identity,
) -> LocationPayload {
    let entry = directory
        .last_blob_for(contact_id)
        .unwrap_or_else(|| panic!("no blob for {contact_id}"));
    decrypt_from(&entry.blob, &sender.public_key_bytes(), contact).unwrap()
}

mod mixed_contacts {
    use super::*;

    #[tokio::test]
    async fn publish_skips_keyless_contact_and_filters_per_grant() {
        let me = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let c = Identity::generate().unwrap();
        let contacts = vec![
            Contact::new("A").with_permission(HierarchyLevel::Address),
            contact_with_key("B", &b, Some("city")),
            contact_with_key("C", &c, Some("address")),
        ];
        let directory = Arc::new(FakeDirectory::default());
        let distributor = LocationDistributor::new(directory.clone());

        let outcome = distributor
            .publish_to(&contacts, &main_street(), None, Some(&me))
            .await
            .unwrap();

        let PublishOutcome::Published(report) = outcome else {
            panic!("expected a publish report");
        };
        assert_eq!(report.sent, vec!["B".to_string(), "C".to_string()]);
        assert_eq!(report.skipped.get("A"), Some(&SkipReason::NoPublicKey));

        assert_eq!(directory.submit_calls(), 1, "one batch call");
        assert_eq!(directory.batches.lock().unwrap()[0].len(), 2, "exactly two blobs");

        let for_b = opened_by(&directory, "B", &b, &me);
        assert_eq!(
            for_b.hierarchy,
            Hierarchy::new()
                .with(HierarchyLevel::City, "Springfield")
                .with(HierarchyLevel::Country, "USA")
                .with(HierarchyLevel::Planet, PLANET_EARTH)
        );
        assert!(!for_b.hierarchy.contains(HierarchyLevel::Address));

        let for_c = opened_by(&directory, "C", &c, &me);
        assert_eq!(for_c.hierarchy, main_street());
    }

    #[tokio::test]
    async fn contact_without_grant_sees_only_planet() {
        let me = Identity::generate().unwrap();
        let d = Identity::generate().unwrap();
        let directory = Arc::new(FakeDirectory::default());
        let distributor = LocationDistributor::new(directory.clone());

        distributor
            .publish_to(
                &[contact_with_key("D", &d, None), contact_with_key("E", &d, Some("bogus"))],
                &full_hierarchy(),
                None,
                Some(&me),
            )
            .await
            .unwrap();

        assert_eq!(opened_by(&directory, "D", &d, &me).hierarchy, Hierarchy::planet_only());
        assert_eq!(opened_by(&directory, "E", &d, &me).hierarchy, Hierarchy::planet_only());
    }

    #[tokio::test]
    async fn malformed_key_does_not_block_others() {
        let me = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let directory = Arc::new(FakeDirectory::default());
        let distributor = LocationDistributor::new(directory.clone());

        let outcome = distributor
            .publish_to(
                &[
                    Contact::new("broken").with_public_key("AAAA"),
                    contact_with_key("B", &b, Some("country")),
                ],
                &main_street(),
                None,
                Some(&me),
            )
            .await
            .unwrap();

        let PublishOutcome::Published(report) = outcome else {
            panic!("expected a publish report");
        };
        assert!(report.was_sent("B"));
        assert_eq!(report.skipped.get("broken"), Some(&SkipReason::InvalidPublicKey));
        assert_eq!(
            opened_by(&directory, "B", &b, &me).hierarchy,
            Hierarchy::new()
                .with(HierarchyLevel::Country, "USA")
                .with(HierarchyLevel::Planet, PLANET_EARTH)
        );
    }

    #[tokio::test]
    async fn one_timestamp_per_publish() {
        let me = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let c = Identity::generate().unwrap();
        let directory = Arc::new(FakeDirectory::default());
        let distributor = LocationDistributor::new(directory.clone());

        distributor
            .publish_to(
                &[
                    contact_with_key("B", &b, Some("city")),
                    contact_with_key("C", &c, Some("city")),
                ],
                &main_street(),
                None,
                Some(&me),
            )
            .await
            .unwrap();

        assert_eq!(
            opened_by(&directory, "B", &b, &me).timestamp,
            opened_by(&directory, "C", &c, &me).timestamp
        );
    }
}

mod named_location_visibility {
    use super::*;

    async fn publish_named(rule: VisibilityRule) -> (Arc<FakeDirectory>, Identity, Identity, Identity) {
        let me = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let c = Identity::generate().unwrap();
        let directory = Arc::new(FakeDirectory::default());
        let distributor = LocationDistributor::new(directory.clone());
        let home = NamedLocation::new("Home", rule);

        distributor
            .publish_to(
                &[
                    contact_with_key("B", &b, Some("address")),
                    contact_with_key("C", &c, Some("planet")),
                ],
                &main_street(),
                Some(&home),
                Some(&me),
            )
            .await
            .unwrap();
        (directory, me, b, c)
    }

    #[tokio::test]
    async fn selected_rule_discloses_only_to_listed_contact() {
        let (directory, me, b, c) = publish_named(VisibilityRule::selected(["C"])).await;

        let for_b = opened_by(&directory, "B", &b, &me);
        let for_c = opened_by(&directory, "C", &c, &me);

        // B has the most specific grant but is not listed.
        assert_eq!(for_b.named_location, None);
        // C is listed, regardless of its coarse grant.
        assert_eq!(for_c.named_location.as_deref(), Some("Home"));
        assert_eq!(for_c.hierarchy, Hierarchy::planet_only());
    }

    #[tokio::test]
    async fn all_rule_discloses_to_everyone() {
        let (directory, me, b, c) = publish_named(VisibilityRule::all()).await;
        assert_eq!(
            opened_by(&directory, "B", &b, &me).named_location.as_deref(),
            Some("Home")
        );
        assert_eq!(
            opened_by(&directory, "C", &c, &me).named_location.as_deref(),
            Some("Home")
        );
    }

    #[tokio::test]
    async fn private_rule_discloses_to_nobody() {
        let (directory, me, b, c) = publish_named(VisibilityRule::private()).await;
        assert_eq!(opened_by(&directory, "B", &b, &me).named_location, None);
        assert_eq!(opened_by(&directory, "C", &c, &me).named_location, None);
    }
}

mod directory_round_trip {
    use super::*;

    #[tokio::test]
    async fn publish_without_identity_sends_nothing() {
        let b = Identity::generate().unwrap();
        let directory = Arc::new(FakeDirectory::with_contacts(vec![contact_with_key(
            "B",
            &b,
            Some("city"),
        )]));
        let distributor = LocationDistributor::new(directory.clone());

        let outcome = distributor.publish(&main_street(), None, None).await.unwrap();
        assert_eq!(outcome, PublishOutcome::NoIdentity);
        assert_eq!(directory.submit_calls(), 0);
    }

    #[tokio::test]
    async fn offline_directory_surfaces_error() {
        let me = Identity::generate().unwrap();
        let directory = Arc::new(FakeDirectory::default());
        directory.set_offline(true);
        let distributor = LocationDistributor::new(directory);

        let result = distributor.publish(&main_street(), None, Some(&me)).await;
        assert!(matches!(result, Err(LocationError::Directory(_))));
    }

    #[tokio::test]
    async fn contacts_read_what_was_published_for_them() {
        let alice = Identity::generate().unwrap();
        let bob = Identity::generate().unwrap();

        // Alice publishes to Bob.
        let alice_directory = Arc::new(FakeDirectory::with_contacts(vec![contact_with_key(
            "bob",
            &bob,
            Some("city"),
        )]));
        LocationDistributor::new(alice_directory.clone())
            .publish(&main_street(), None, Some(&alice))
            .await
            .unwrap();
        let blob = alice_directory.last_blob_for("bob").unwrap().blob;

        // Bob's directory view relays Alice's blob plus a corrupted one.
        let mut corrupted = blob.clone();
        corrupted.ciphertext[0] ^= 0x01;
        let bob_directory = Arc::new(FakeDirectory::default());
        *bob_directory.envelopes.lock().unwrap() = vec![
            ContactEnvelope {
                contact_id: "alice".to_string(),
                public_key: Some(alice.public_key_base64()),
                blob: Some(blob),
            },
            ContactEnvelope {
                contact_id: "mallory".to_string(),
                public_key: Some(alice.public_key_base64()),
                blob: Some(corrupted),
            },
        ];

        let locations = LocationDistributor::new(bob_directory)
            .receive(Some(&bob))
            .await
            .unwrap();

        let from_alice = locations[0].payload().unwrap();
        assert_eq!(from_alice.hierarchy.get(HierarchyLevel::City), Some("Springfield"));
        assert!(!from_alice.hierarchy.contains(HierarchyLevel::Address));
        assert_eq!(locations[1].status, LocationStatus::Undecryptable);
    }

    #[tokio::test]
    async fn register_identity_publishes_public_key() {
        let me = Identity::generate().unwrap();
        let directory = Arc::new(FakeDirectory::default());
        LocationDistributor::new(directory.clone())
            .register_identity(&me)
            .await
            .unwrap();
        assert_eq!(
            *directory.registered_keys.lock().unwrap(),
            vec![me.public_key_base64()]
        );
    }
}
