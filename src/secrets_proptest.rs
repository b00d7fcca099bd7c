//! Property-based tests for the secrets lifecycle.
//!
//! Wrapping, encryption and output paths must converge when re-applied, and
//! generated strings must satisfy their profile for every requested length.

#[cfg(test)]
mod proptest_tests {
    use std::collections::HashMap;

    use proptest::prelude::*;
    use serde_yaml::Value;

    use crate::document::{deckhand_schema, Document, StoragePolicy, LAYER_SITE};
    use crate::secrets::crypto::SecretKey;
    use crate::secrets::crypto_string::{CryptoString, Profile, MIN_LENGTH};
    use crate::secrets::ManagedDocument;

    const PASSPHRASE: &[u8] = b"ytrr89erARAiPE34692iwUMvWqqBvC";
    const SALT: &[u8] = b"MySecretSalt1234567890][";

    const KINDS: [&str; 8] = [
        "CertificateAuthority",
        "CertificateAuthorityKey",
        "Certificate",
        "CertificateKey",
        "PublicKey",
        "PrivateKey",
        "Passphrase",
        "UnknownSecret",
    ];

    fn secret(kind: &str, name: &str, data: Value) -> Document {
        Document::new(deckhand_schema(kind), name, LAYER_SITE, StoragePolicy::Encrypted, data)
    }

    fn payload() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[ -~]{0,64}".prop_map(Value::String),
            any::<i64>().prop_map(|n| Value::Number(n.into())),
            prop::collection::vec("[a-z]{1,8}", 0..5)
                .prop_map(|items| Value::Sequence(items.into_iter().map(Value::String).collect())),
        ]
    }

    fn profile() -> impl Strategy<Value = Profile> {
        prop_oneof![
            Just(Profile::Default),
            Just(Profile::Alphanumeric),
            Just(Profile::AlphanumericLower),
            Just(Profile::AlphanumericUpper),
            Just(Profile::HexLower),
            Just(Profile::HexUpper),
        ]
    }

    // ============================================================================
    // Envelope properties
    // ============================================================================

    proptest! {
        /// Property: wrapping an envelope returns it unchanged
        #[test]
        fn wrap_is_idempotent(kind in prop::sample::select(KINDS.to_vec()), name in "[a-z][a-z0-9-]{0,20}", data in payload()) {
            let once = ManagedDocument::wrap(secret(kind, &name, data)).unwrap();
            let twice = ManagedDocument::wrap(once.to_document().unwrap()).unwrap();
            prop_assert_eq!(once, twice);
        }

        /// Property: output paths are pure and never contain dashes in the file name
        #[test]
        fn output_path_is_deterministic(kind in prop::sample::select(KINDS.to_vec()), name in "[a-z][a-z0-9-]{0,20}", ca in "[a-z][a-z-]{0,10}") {
            let mut cert_to_ca = HashMap::new();
            cert_to_ca.insert(name.clone(), ca);
            let mut managed = ManagedDocument::wrap(secret(kind, &name, Value::Null)).unwrap();

            let first = managed.output_path("demo", &cert_to_ca);
            let second = managed.output_path("demo", &cert_to_ca);
            prop_assert_eq!(&first, &second);

            let file_name = first.file_name().unwrap().to_string_lossy().into_owned();
            prop_assert!(!file_name.contains('-'), "dash left in {}", file_name);
            prop_assert!(first.starts_with("demo/secrets"));
        }
    }

    // ============================================================================
    // Encryption properties
    // ============================================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Property: decrypt(encrypt(data)) == data for any payload
        #[test]
        fn encrypt_decrypt_round_trip(data in payload()) {
            let key = SecretKey::derive(PASSPHRASE, SALT);
            let original = secret("Passphrase", "p", data);
            let mut managed = ManagedDocument::wrap(original.clone()).unwrap();

            managed.encrypt(&key, "proptest").unwrap();
            prop_assert!(managed.is_encrypted());
            managed.decrypt(&key).unwrap();
            prop_assert_eq!(managed.embedded(), &original);
        }

        /// Property: raw token round trip for arbitrary bytes
        #[test]
        fn token_round_trip(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let key = SecretKey::derive(PASSPHRASE, SALT);
            let token = key.encrypt(&bytes).unwrap();
            let decrypted = key.decrypt(&token).unwrap();
            prop_assert_eq!(decrypted.as_slice(), bytes.as_slice());
        }
    }

    // ============================================================================
    // CryptoString properties
    // ============================================================================

    proptest! {
        /// Property: generated strings have length max(24, requested) and are valid
        #[test]
        fn crypto_string_is_valid(profile in profile(), length in 0usize..96) {
            let generator = CryptoString::new(profile);
            let value = generator.generate(length);
            prop_assert_eq!(value.chars().count(), length.max(MIN_LENGTH));
            prop_assert!(generator.is_valid(&value));

            let pool = profile.pool();
            prop_assert!(value.chars().all(|c| pool.contains(c)));
        }
    }
}
