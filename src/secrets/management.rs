//! # Secret Management
//!
//! Encrypts and decrypts the managed documents of one file or one in-memory
//! document list with a key derived from `PEGLEG_PASSPHRASE` and
//! `PEGLEG_SALT`.
//!
//! Both directions are idempotent: encrypted envelopes are never encrypted
//! again, and cleartext envelopes pass through decryption untouched.

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde_yaml::Value;

use crate::config::Credentials;
use crate::document::{Document, StoragePolicy};
use crate::error::{Error, Result};
use crate::files::{self, SiteCatalog};
use crate::secrets::crypto::SecretKey;
use crate::secrets::managed::{is_managed, ManagedDocument};

const SECRETS_SECTION: &str = "secrets";

/// Where the managed documents come from.
#[derive(Debug, Clone)]
pub enum SecretSource {
    File(PathBuf),
    Documents(Vec<Document>),
}

/// Encryption and decryption over a set of managed documents.
pub struct SecretsManagement {
    key: SecretKey,
    documents: Vec<ManagedDocument>,
}

impl SecretsManagement {
    /// Reads credentials from the environment before touching `source`.
    pub fn from_env(source: SecretSource) -> Result<Self> {
        let credentials = Credentials::from_env()?;
        Self::new(source, &credentials)
    }

    pub fn new(source: SecretSource, credentials: &Credentials) -> Result<Self> {
        let key = SecretKey::from_credentials(credentials);
        let documents = match source {
            SecretSource::File(path) => files::read_documents(&path)?,
            SecretSource::Documents(documents) => documents,
        };
        let documents = documents
            .into_iter()
            .map(ManagedDocument::wrap)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { key, documents })
    }

    pub fn documents(&self) -> &[ManagedDocument] {
        &self.documents
    }

    /// Encrypts every envelope whose wrapped document requires it.
    ///
    /// Returns all envelopes (cleartext ones included) and whether anything
    /// was newly encrypted.
    pub fn get_encrypted_secrets(&mut self, author: &str) -> Result<(Vec<ManagedDocument>, bool)> {
        let mut changed = false;
        for document in &mut self.documents {
            if document.is_encrypted() || !document.is_storage_policy_encrypted() {
                continue;
            }
            document.encrypt(&self.key, author)?;
            changed = true;
        }
        Ok((self.documents.clone(), changed))
    }

    /// Encrypts and writes to `save_path`. Nothing is written when every
    /// document was already encrypted or is meant to stay cleartext.
    pub fn encrypt_secrets(&mut self, save_path: &Path, author: &str) -> Result<bool> {
        let (documents, changed) = self.get_encrypted_secrets(author)?;
        if !changed {
            debug!(
                "All documents are already encrypted or cleartext; not writing {}",
                save_path.display()
            );
            return Ok(false);
        }
        files::write_documents(save_path, &documents)?;
        info!("Wrote encrypted data to: {}", save_path.display());
        Ok(true)
    }

    /// Decrypted envelopes, without modifying the tracked documents.
    pub fn decrypted_envelopes(&self) -> Result<Vec<ManagedDocument>> {
        self.documents
            .iter()
            .map(|document| {
                let mut document = document.clone();
                document.decrypt(&self.key).inspect_err(log_decrypt_failure)?;
                Ok(document)
            })
            .collect()
    }

    /// Decrypted wrapped documents. Safe to call on mixed input and on its
    /// own output.
    pub fn get_decrypted_secrets(&self) -> Result<Vec<Document>> {
        Ok(self
            .decrypted_envelopes()?
            .into_iter()
            .map(ManagedDocument::into_embedded)
            .collect())
    }

    /// Decrypts the tracked documents in place and returns the wrapped
    /// documents.
    pub fn decrypt_secrets(&mut self) -> Result<Vec<Document>> {
        for document in &mut self.documents {
            document.decrypt(&self.key).inspect_err(log_decrypt_failure)?;
        }
        Ok(self
            .documents
            .iter()
            .map(|d| d.embedded().clone())
            .collect())
    }
}

fn log_decrypt_failure(err: &Error) {
    if matches!(err, Error::InvalidSignature) {
        error!(
            "Signature verification to decrypt secrets failed. Please check your \
             provided passphrase and salt and try again."
        );
    }
}

/// Replaces each managed document with its decrypted wrapped document,
/// leaving other documents in place.
///
/// Credentials are only read from the environment when an encrypted
/// envelope is present.
pub fn decrypt_and_unwrap(documents: Vec<Document>) -> Result<Vec<Document>> {
    let mut key: Option<SecretKey> = None;
    let mut out = Vec::with_capacity(documents.len());

    for document in documents {
        if !is_managed(&document) {
            out.push(document);
            continue;
        }
        let mut managed = ManagedDocument::from_document(document)?;
        if managed.is_encrypted() {
            if key.is_none() {
                key = Some(SecretKey::from_credentials(&Credentials::from_env()?));
            }
            if let Some(key) = &key {
                managed.decrypt(key).inspect_err(log_decrypt_failure)?;
            }
        }
        out.push(managed.into_embedded());
    }
    Ok(out)
}

/// Encrypts every site file stored under a `secrets/` directory.
///
/// Files are rewritten in place, or at the same repository-relative path
/// under `save_location`. Returns the files that were written.
pub fn encrypt_site(
    catalog: &SiteCatalog,
    save_location: Option<&Path>,
    credentials: &Credentials,
    author: &str,
) -> Result<Vec<PathBuf>> {
    let roots = catalog.workspace().roots();
    let mut written = Vec::new();
    let mut found = false;

    for (repo, path) in catalog.site_files_by_repo() {
        if !files::in_section(&roots, &path, SECRETS_SECTION) {
            continue;
        }
        found = true;
        let target = match (save_location, path.strip_prefix(repo.root())) {
            (Some(save), Ok(relative)) => save.join(relative),
            _ => path.clone(),
        };
        let mut engine = SecretsManagement::new(SecretSource::File(path), credentials)?;
        if engine.encrypt_secrets(&target, author)? {
            written.push(target);
        }
    }

    if !found {
        warn!("No secrets files were found for site {}", catalog.site());
    }
    Ok(written)
}

/// How [`wrap_secret`] builds the wrapped document.
#[derive(Debug, Clone)]
pub struct WrapOptions {
    pub schema: String,
    pub name: String,
    pub layer: String,
    pub encrypt: bool,
}

/// Wraps the text of `source` as the data of a new document and writes the
/// envelope, encrypted when asked, to `output_path`.
pub fn wrap_secret(
    source: &Path,
    output_path: &Path,
    options: &WrapOptions,
    credentials: Option<&Credentials>,
    author: &str,
) -> Result<()> {
    let text = std::fs::read_to_string(source)?;
    let policy = if options.encrypt {
        StoragePolicy::Encrypted
    } else {
        StoragePolicy::Cleartext
    };
    let document = Document::new(
        options.schema.as_str(),
        options.name.as_str(),
        &options.layer,
        policy,
        Value::String(text),
    );
    let mut managed = ManagedDocument::wrap_generated(document, author)?;
    managed.set_specified_path(&source.to_string_lossy());

    if options.encrypt {
        let credentials = credentials.ok_or_else(|| Error::SecretsEnvironment {
            message: "a passphrase and salt are required to encrypt".to_string(),
        })?;
        managed.encrypt(&SecretKey::from_credentials(credentials), author)?;
    }
    files::write_documents(output_path, &[managed])?;
    info!("Wrapped {} into {}", source.display(), output_path.display());
    Ok(())
}
