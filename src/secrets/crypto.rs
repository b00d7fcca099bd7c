//! Passphrase-derived authenticated encryption (Fernet token format).
//!
//! A 32-byte key is derived with PBKDF2-HMAC-SHA256 (10000 iterations) from
//! the passphrase and salt. The first half signs, the second half encrypts.
//!
//! Token layout, URL-safe base64 encoded:
//!
//! ```text
//! 0x80 | timestamp (u64 BE) | IV (16) | AES-128-CBC ciphertext (PKCS7) | HMAC-SHA256 (32)
//! ```

use aes::Aes128;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::config::Credentials;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub const KEY_DERIVATION_ITERATIONS: u32 = 10_000;

const VERSION: u8 = 0x80;
const TIMESTAMP_LEN: usize = 8;
const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;
const HEADER_LEN: usize = 1 + TIMESTAMP_LEN + IV_LEN;
const BLOCK_LEN: usize = 16;

/// Signing and encryption keys, wiped on drop.
pub struct SecretKey {
    bytes: Zeroizing<[u8; 32]>,
}

impl SecretKey {
    /// Derives the key from a passphrase and salt.
    pub fn derive(passphrase: &[u8], salt: &[u8]) -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, salt, KEY_DERIVATION_ITERATIONS, &mut bytes[..]);
        Self { bytes }
    }

    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self::derive(credentials.passphrase(), credentials.salt())
    }

    /// Accepts a URL-safe base64 encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(URL_SAFE.decode(encoded.trim()).map_err(|e| Error::Crypto {
            message: format!("invalid key encoding: {}", e),
        })?);
        let array: [u8; 32] = decoded.as_slice().try_into().map_err(|_| Error::Crypto {
            message: "key must be 32 bytes".to_string(),
        })?;
        Ok(Self {
            bytes: Zeroizing::new(array),
        })
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(&self.bytes[..])
    }

    fn signing_key(&self) -> &[u8] {
        &self.bytes[..16]
    }

    fn encryption_key(&self) -> &[u8] {
        &self.bytes[16..]
    }

    /// Encrypts `plaintext` into a token stamped with the current time.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        self.encrypt_at(plaintext, timestamp, iv)
    }

    fn encrypt_at(&self, plaintext: &[u8], timestamp: u64, iv: [u8; IV_LEN]) -> Result<String> {
        let ciphertext = Aes128CbcEnc::new_from_slices(self.encryption_key(), &iv)
            .map_err(|e| Error::Crypto {
                message: e.to_string(),
            })?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut token = Vec::with_capacity(HEADER_LEN + ciphertext.len() + MAC_LEN);
        token.push(VERSION);
        token.extend_from_slice(&timestamp.to_be_bytes());
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);

        let mut mac = self.mac()?;
        mac.update(&token);
        token.extend_from_slice(&mac.finalize().into_bytes());

        Ok(URL_SAFE.encode(token))
    }

    /// Verifies and decrypts a token.
    ///
    /// A token that is well formed but signed with another key yields
    /// [`Error::InvalidSignature`].
    pub fn decrypt(&self, token: &str) -> Result<Zeroizing<Vec<u8>>> {
        let raw = URL_SAFE.decode(token.trim()).map_err(|e| Error::Crypto {
            message: format!("invalid token encoding: {}", e),
        })?;

        if raw.len() < HEADER_LEN + BLOCK_LEN + MAC_LEN
            || (raw.len() - HEADER_LEN - MAC_LEN) % BLOCK_LEN != 0
        {
            return Err(Error::Crypto {
                message: "token has an invalid length".to_string(),
            });
        }
        if raw[0] != VERSION {
            return Err(Error::Crypto {
                message: format!("unsupported token version {:#04x}", raw[0]),
            });
        }

        let (signed, signature) = raw.split_at(raw.len() - MAC_LEN);
        let mut mac = self.mac()?;
        mac.update(signed);
        mac.verify_slice(signature)
            .map_err(|_| Error::InvalidSignature)?;

        let iv = &signed[1 + TIMESTAMP_LEN..HEADER_LEN];
        let ciphertext = &signed[HEADER_LEN..];
        let plaintext = Aes128CbcDec::new_from_slices(self.encryption_key(), iv)
            .map_err(|e| Error::Crypto {
                message: e.to_string(),
            })?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::Crypto {
                message: "invalid padding".to_string(),
            })?;

        Ok(Zeroizing::new(plaintext))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.signing_key()).map_err(|e| Error::Crypto {
            message: e.to_string(),
        })
    }
}

/// Encrypts `plaintext` with a key derived from `passphrase` and `salt`.
pub fn encrypt(plaintext: &[u8], passphrase: &[u8], salt: &[u8]) -> Result<String> {
    SecretKey::derive(passphrase, salt).encrypt(plaintext)
}

/// Decrypts a token produced by [`encrypt`] with the same passphrase and salt.
pub fn decrypt(token: &str, passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    SecretKey::derive(passphrase, salt).decrypt(token)
}
