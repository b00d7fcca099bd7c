//! # Managed Secret Envelopes
//!
//! A managed document wraps an arbitrary secret document inside a
//! `pegleg/PeglegManagedDocument/v1` envelope:
//!
//! ```yaml
//! schema: pegleg/PeglegManagedDocument/v1
//! metadata:
//!   schema: metadata/Document/v1
//!   name: <inner name>
//!   layeringDefinition: {abstract: false, layer: site}
//!   storagePolicy: cleartext
//! data:
//!   managedDocument: <the wrapped document>
//!   generated: {at: ..., by: ..., specifiedBy: {path: ...}}
//!   encrypted: {at: ..., by: ...}
//! ```
//!
//! The envelope itself is always cleartext. When `data.encrypted` is present
//! the wrapped document's `data` holds a token instead of the secret.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::document::{
    Document, LayeringDefinition, Metadata, StoragePolicy, LAYER_SITE, MANAGED_DOCUMENT_SCHEMA,
    METADATA_DOCUMENT_SCHEMA,
};
use crate::error::{Error, Result};
use crate::secrets::crypto::SecretKey;

/// When and by whom a document was generated, and where it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generated {
    pub at: String,
    pub by: String,
    #[serde(rename = "specifiedBy", default)]
    pub specified_by: SpecifiedBy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecifiedBy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

/// Encryption marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encrypted {
    pub at: String,
    pub by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeData {
    #[serde(rename = "managedDocument")]
    pub managed_document: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<Generated>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<Encrypted>,
}

/// A `pegleg/PeglegManagedDocument/v1` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedDocument {
    pub schema: String,
    pub metadata: Metadata,
    pub data: EnvelopeData,
}

/// Current UTC time in the format stamped into envelopes.
pub fn timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

impl ManagedDocument {
    /// Wraps `document`. An envelope is returned unchanged.
    pub fn wrap(document: Document) -> Result<Self> {
        if is_managed(&document) {
            return Self::from_document(document);
        }

        let metadata = Metadata {
            schema: METADATA_DOCUMENT_SCHEMA.to_string(),
            name: document.metadata.name.clone(),
            labels: document.metadata.labels.clone(),
            layering_definition: Some(LayeringDefinition::concrete(LAYER_SITE)),
            storage_policy: Some(StoragePolicy::Cleartext),
            extra: Mapping::new(),
        };

        Ok(Self {
            schema: MANAGED_DOCUMENT_SCHEMA.to_string(),
            metadata,
            data: EnvelopeData {
                managed_document: document,
                generated: None,
                encrypted: None,
            },
        })
    }

    /// Wraps a freshly generated document with provenance.
    pub fn wrap_generated(document: Document, author: &str) -> Result<Self> {
        let mut managed = Self::wrap(document)?;
        if managed.data.generated.is_none() {
            managed.data.generated = Some(Generated {
                at: timestamp(),
                by: author.to_string(),
                specified_by: SpecifiedBy::default(),
            });
        }
        Ok(managed)
    }

    /// Reads an envelope out of a generic document.
    pub fn from_document(document: Document) -> Result<Self> {
        let name = document.metadata.name.clone();
        let value = serde_yaml::to_value(document)?;
        serde_yaml::from_value(value).map_err(|e| Error::MalformedDocument {
            path: name,
            message: format!("invalid managed document: {}", e),
        })
    }

    pub fn to_document(&self) -> Result<Document> {
        Ok(serde_yaml::from_value(serde_yaml::to_value(self)?)?)
    }

    pub fn embedded(&self) -> &Document {
        &self.data.managed_document
    }

    pub fn embedded_mut(&mut self) -> &mut Document {
        &mut self.data.managed_document
    }

    pub fn into_embedded(self) -> Document {
        self.data.managed_document
    }

    pub fn is_encrypted(&self) -> bool {
        self.data.encrypted.is_some()
    }

    pub fn is_generated(&self) -> bool {
        self.data.generated.is_some()
    }

    /// Whether the wrapped document must be stored encrypted.
    pub fn is_storage_policy_encrypted(&self) -> bool {
        self.embedded().storage_policy() == Some(StoragePolicy::Encrypted)
    }

    pub fn set_storage_policy(&mut self, policy: StoragePolicy) {
        self.embedded_mut().metadata.storage_policy = Some(policy);
    }

    pub fn set_encrypted(&mut self, author: &str) {
        self.data.encrypted = Some(Encrypted {
            at: timestamp(),
            by: author.to_string(),
        });
    }

    pub fn set_decrypted(&mut self) {
        self.data.encrypted = None;
    }

    /// Records where the document was written, when it carries provenance.
    pub fn set_specified_path(&mut self, path: &str) {
        if let Some(generated) = self.data.generated.as_mut() {
            generated.specified_by.path = Some(path.to_string());
        }
    }

    /// Replaces the wrapped payload with a token and marks the envelope
    /// encrypted. Already encrypted envelopes are left alone.
    pub fn encrypt(&mut self, key: &SecretKey, author: &str) -> Result<()> {
        if self.is_encrypted() {
            return Ok(());
        }
        let plaintext = zeroize::Zeroizing::new(serde_yaml::to_string(&self.embedded().data)?);
        let token = key.encrypt(plaintext.as_bytes())?;
        self.embedded_mut().data = Value::String(token);
        self.set_encrypted(author);
        Ok(())
    }

    /// Restores the wrapped payload and clears the encrypted marker.
    /// Cleartext envelopes are left alone.
    pub fn decrypt(&mut self, key: &SecretKey) -> Result<()> {
        if !self.is_encrypted() {
            return Ok(());
        }
        let token = self.embedded().data.as_str().ok_or_else(|| Error::Crypto {
            message: format!(
                "encrypted document {} does not hold a token",
                self.embedded().name()
            ),
        })?;
        let plaintext = key.decrypt(token)?;
        let text = std::str::from_utf8(&plaintext).map_err(|e| Error::Crypto {
            message: e.to_string(),
        })?;
        self.embedded_mut().data = serde_yaml::from_str(text)?;
        self.set_decrypted();
        Ok(())
    }

    /// Deterministic location of this secret relative to the site
    /// directory: `<site>/secrets/<category>/<file>.yaml`.
    ///
    /// `cert_to_ca` maps certificate names to the alias of their CA. The path
    /// is also recorded in the generation provenance, when present.
    pub fn output_path(&mut self, site: &str, cert_to_ca: &HashMap<String, String>) -> PathBuf {
        let name = self.embedded().name().to_string();
        let kind = self
            .embedded()
            .schema_kind()
            .unwrap_or_default()
            .to_lowercase();

        let (category, file_name) = if kind.contains("authority") {
            ("certificates", format!("{}_ca.yaml", name))
        } else if kind.contains("certificate") {
            let file_name = match cert_to_ca.get(&name) {
                Some(ca) => format!("{}_{}_certificate.yaml", ca, name),
                None => format!("{}_certificate.yaml", name),
            };
            ("certificates", file_name)
        } else if kind.contains("public") || kind.contains("private") {
            ("keypairs", format!("{}.yaml", name))
        } else if kind.contains("passphrase") {
            ("passphrases", format!("{}.yaml", name))
        } else {
            ("others", format!("{}.yaml", name))
        };

        let path = PathBuf::from(site)
            .join("secrets")
            .join(category)
            .join(file_name.replace('-', "_"));
        self.set_specified_path(&path.to_string_lossy());
        path
    }
}

/// Whether `document` is a managed envelope.
pub fn is_managed(document: &Document) -> bool {
    document.schema == MANAGED_DOCUMENT_SCHEMA
}
