//! Secrets lifecycle
//!
//! Managed-secret envelopes, their encryption, and the generators that fill
//! a site's `secrets/` directories from its catalogs.
//!
//! - `managed` - the `pegleg/PeglegManagedDocument/v1` envelope
//! - `crypto` - key derivation and authenticated encryption
//! - `management` - encrypt/decrypt over files and document lists
//! - `catalog` - PKI and passphrase catalog documents
//! - `crypto_string` - random strings drawn from character profiles
//! - `pki_utility` - `cfssl` / `openssl` tooling
//! - `pki` - certificate authority, certificate and key pair generation
//! - `passphrase` - passphrase generation

pub mod catalog;
pub mod crypto;
pub mod crypto_string;
pub mod managed;
pub mod management;
pub mod passphrase;
pub mod pki;
pub mod pki_utility;

pub use managed::ManagedDocument;
pub use management::{decrypt_and_unwrap, SecretSource, SecretsManagement};
