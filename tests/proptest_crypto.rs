//! Property-based tests for the encryption primitives.
//!
//! These tests focus on:
//! - Public-key encryption round trips and sender authentication
//! - Nonce freshness
//! - Tamper detection on every bit of the ciphertext
//! - PIN key derivation and PIN-protected backups

mod helpers;

use std::collections::HashSet;

use chrono::Utc;
use proptest::prelude::*;
use whereish_core::crypto::{
    decrypt_from, detect_format, encrypt_for, AccountMeta, BackupFormat, CryptoError,
    EncryptedBlob, PinCipher,
};
use whereish_core::identity::Identity;
use whereish_core::location::{Hierarchy, HierarchyLevel, LocationPayload};

use helpers::fast_cipher;

/// Strategy for location payloads with arbitrary labels.
fn payload_strategy() -> impl Strategy<Value = LocationPayload> {
    (
        prop::collection::vec(("[\\p{L}\\p{N} ,.'-]{1,40}", 0usize..9), 0..9),
        prop::option::of("[\\p{L}\\p{N} ]{1,30}"),
    )
        .prop_map(|(levels, named_location)| LocationPayload {
            hierarchy: levels
                .into_iter()
                .map(|(value, index)| (HierarchyLevel::ALL[index], value))
                .collect::<Hierarchy>(),
            named_location,
            timestamp: Utc::now(),
        })
}

/// Strategy for PINs as users type them.
fn pin_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9]{4,8}",
        "[a-zA-Z0-9]{4,16}",
        "[\\p{L}\\p{N}]{1,12}",
    ]
}

#[test]
fn nonces_are_unique_over_ten_thousand_encryptions() {
    let sender = Identity::generate().unwrap();
    let recipient = Identity::generate().unwrap();
    let payload = LocationPayload {
        hierarchy: Hierarchy::planet_only(),
        named_location: None,
        timestamp: Utc::now(),
    };

    let mut seen = HashSet::with_capacity(10_000);
    for _ in 0..10_000 {
        let blob = encrypt_for(&payload, &recipient.public_key_bytes(), &sender).unwrap();
        assert!(seen.insert(blob.nonce), "nonce reused");
    }
}

#[test]
fn identical_payloads_produce_different_ciphertexts() {
    let sender = Identity::generate().unwrap();
    let recipient = Identity::generate().unwrap();
    let payload = "same";

    let a = encrypt_for(&payload, &recipient.public_key_bytes(), &sender).unwrap();
    let b = encrypt_for(&payload, &recipient.public_key_bytes(), &sender).unwrap();
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn future_blob_version_is_rejected_before_decryption() {
    let sender = Identity::generate().unwrap();
    let recipient = Identity::generate().unwrap();
    let mut blob = encrypt_for(&"x", &recipient.public_key_bytes(), &sender).unwrap();
    blob.version = 2;

    let result = decrypt_from::<String>(&blob, &sender.public_key_bytes(), &recipient);
    assert!(matches!(result, Err(CryptoError::UnsupportedVersion(2))));
}

#[test]
fn blob_survives_wire_json() {
    let sender = Identity::generate().unwrap();
    let recipient = Identity::generate().unwrap();
    let blob = encrypt_for(&"hello", &recipient.public_key_bytes(), &sender).unwrap();

    let parsed = EncryptedBlob::from_json(&blob.to_json().unwrap()).unwrap();
    let plaintext: String = decrypt_from(&parsed, &sender.public_key_bytes(), &recipient).unwrap();
    assert_eq!(plaintext, "hello");
}

#[test]
fn kdf_is_deterministic_and_salt_sensitive() {
    let salt = [7u8; 16];
    let a = PinCipher::derive_key("2468", &salt, 1_000);
    let b = PinCipher::derive_key("2468", &salt, 1_000);
    assert_eq!(*a, *b);

    let other_salt = PinCipher::derive_key("2468", &[8u8; 16], 1_000);
    let other_pin = PinCipher::derive_key("2469", &salt, 1_000);
    let other_iterations = PinCipher::derive_key("2468", &salt, 1_001);
    assert_ne!(*a, *other_salt);
    assert_ne!(*a, *other_pin);
    assert_ne!(*a, *other_iterations);
}

#[test]
fn backup_file_detects_as_encrypted_and_hides_key() {
    let identity = Identity::generate().unwrap();
    let file = fast_cipher()
        .encrypt_identity(&identity, &AccountMeta::new("a@example.com", "Alice"), "2468")
        .unwrap();
    let json = file.to_json().unwrap();

    assert!(matches!(detect_format(&json), BackupFormat::EncryptedV2(_)));
    assert!(json.contains("a@example.com"));
    assert!(!json.contains("Alice"), "display name belongs inside the ciphertext");
    assert!(!json.contains(&identity.public_key_base64()));
}

#[test]
fn six_digit_pin_backup_opens_only_with_that_pin() {
    let identity = Identity::generate().unwrap();
    let file = fast_cipher()
        .encrypt_identity(&identity, &AccountMeta::new("a@example.com", "Alice"), "123456")
        .unwrap();

    let recovered = PinCipher::decrypt_identity(&file, "123456").unwrap();
    assert_eq!(recovered.identity, identity);
    assert!(matches!(
        PinCipher::decrypt_identity(&file, "654321"),
        Err(CryptoError::WrongPinOrCorrupted)
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: whatever the payload, the intended recipient recovers it
    /// exactly.
    #[test]
    fn roundtrip_any_payload(payload in payload_strategy()) {
        let sender = Identity::generate().unwrap();
        let recipient = Identity::generate().unwrap();

        let blob = encrypt_for(&payload, &recipient.public_key_bytes(), &sender).unwrap();
        let recovered: LocationPayload =
            decrypt_from(&blob, &sender.public_key_bytes(), &recipient).unwrap();
        prop_assert_eq!(recovered, payload);
    }

    /// Property: flipping any single bit of the ciphertext is detected and
    /// reported with the generic failure.
    #[test]
    fn any_single_bit_flip_is_detected(
        seed in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let sender = Identity::generate().unwrap();
        let recipient = Identity::generate().unwrap();
        let mut blob = encrypt_for(&"Springfield", &recipient.public_key_bytes(), &sender).unwrap();

        let index = seed.index(blob.ciphertext.len());
        blob.ciphertext[index] ^= 1 << bit;

        let result = decrypt_from::<String>(&blob, &sender.public_key_bytes(), &recipient);
        prop_assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    /// Property: a flipped nonce bit is also detected.
    #[test]
    fn nonce_bit_flip_is_detected(
        seed in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let sender = Identity::generate().unwrap();
        let recipient = Identity::generate().unwrap();
        let mut blob = encrypt_for(&"Springfield", &recipient.public_key_bytes(), &sender).unwrap();

        let index = seed.index(blob.nonce.len());
        blob.nonce[index] ^= 1 << bit;

        let result = decrypt_from::<String>(&blob, &sender.public_key_bytes(), &recipient);
        prop_assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    /// Property: only the intended recipient, with the right sender key, can
    /// open a blob.
    #[test]
    fn wrong_keys_fail_generically(text in "[a-zA-Z0-9 ]{0,64}") {
        let sender = Identity::generate().unwrap();
        let recipient = Identity::generate().unwrap();
        let eve = Identity::generate().unwrap();
        let blob = encrypt_for(&text, &recipient.public_key_bytes(), &sender).unwrap();

        let wrong_recipient = decrypt_from::<String>(&blob, &sender.public_key_bytes(), &eve);
        prop_assert!(matches!(wrong_recipient, Err(CryptoError::DecryptionFailed)));

        let wrong_sender = decrypt_from::<String>(&blob, &eve.public_key_bytes(), &recipient);
        prop_assert!(matches!(wrong_sender, Err(CryptoError::DecryptionFailed)));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: the PIN that sealed a backup opens it and yields the same
    /// key pair.
    #[test]
    fn pin_backup_roundtrip(pin in pin_strategy(), name in "[\\p{L} ]{1,30}") {
        let identity = Identity::generate().unwrap();
        let file = fast_cipher()
            .encrypt_identity(&identity, &AccountMeta::new("a@example.com", name.clone()), &pin)
            .unwrap();

        let recovered = PinCipher::decrypt_identity(&file, &pin).unwrap();
        prop_assert_eq!(recovered.identity, identity);
        prop_assert_eq!(recovered.name, name);
        prop_assert_eq!(recovered.email, "a@example.com");
    }

    /// Property: any other PIN fails with the combined wrong-PIN-or-corrupted
    /// error.
    #[test]
    fn wrong_pin_fails(pin in pin_strategy(), other in pin_strategy()) {
        prop_assume!(pin != other);
        let identity = Identity::generate().unwrap();
        let file = fast_cipher()
            .encrypt_identity(&identity, &AccountMeta::new("a@example.com", "A"), &pin)
            .unwrap();

        let result = PinCipher::decrypt_identity(&file, &other);
        prop_assert!(matches!(result, Err(CryptoError::WrongPinOrCorrupted)));
    }

    /// Property: the PIN test vector accepts exactly its own PIN.
    #[test]
    fn test_vector_accepts_only_its_pin(pin in pin_strategy(), other in pin_strategy()) {
        let vector = fast_cipher().encrypt_test_value(&pin).unwrap();
        prop_assert!(PinCipher::verify_pin(&vector, &pin));
        prop_assert_eq!(PinCipher::verify_pin(&vector, &other), pin == other);
    }
}
