//! Catalog documents: declarations of the secrets a site should have.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::secrets::crypto_string::Profile;

pub const PKI_CATALOG_KIND: &str = "PKICatalog";
pub const PASSPHRASE_CATALOG_KIND: &str = "PassphraseCatalog";

/// Documents whose schema is `pegleg/<kind>/...`.
pub fn find_catalogs<'a>(documents: &'a [Document], kind: &str) -> Vec<&'a Document> {
    documents
        .iter()
        .filter(|doc| doc.schema.starts_with("pegleg/") && doc.schema_kind() == Some(kind))
        .collect()
}

fn parse_catalog<T: for<'de> Deserialize<'de>>(document: &Document) -> Result<T> {
    serde_yaml::from_value(document.data.clone()).map_err(|e| Error::MalformedDocument {
        path: format!("{}/{}", document.schema, document.name()),
        message: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CertificateEntry {
    pub document_name: String,
    pub common_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub kubernetes_service_names: Vec<String>,
}

impl CertificateEntry {
    /// Explicit hosts followed by every dot-separated prefix of each
    /// Kubernetes service name (`a.b.c` gives `a`, `a.b`, `a.b.c`).
    pub fn subject_alt_names(&self) -> Vec<String> {
        let mut names = self.hosts.clone();
        for service in &self.kubernetes_service_names {
            let parts: Vec<&str> = service.split('.').collect();
            for end in 1..=parts.len() {
                names.push(parts[..end].join("."));
            }
        }
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CertificateAuthorityEntry {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub certificates: Vec<CertificateEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeypairEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// `pegleg/PKICatalog/v1`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PkiCatalog {
    #[serde(default)]
    pub certificate_authorities: BTreeMap<String, CertificateAuthorityEntry>,
    #[serde(default)]
    pub keypairs: Vec<KeypairEntry>,
}

impl PkiCatalog {
    pub fn from_document(document: &Document) -> Result<Self> {
        parse_catalog(document)
    }
}

/// Every PKI catalog among `documents`. Having none is normal.
pub fn pki_catalogs(documents: &[Document]) -> Result<Vec<PkiCatalog>> {
    find_catalogs(documents, PKI_CATALOG_KIND)
        .into_iter()
        .map(PkiCatalog::from_document)
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassphraseType {
    #[default]
    Passphrase,
    Uuid,
    Base64,
}

fn default_length() -> usize {
    24
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PassphraseEntry {
    pub document_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_length")]
    pub length: usize,
    /// Stored encrypted unless explicitly `false`.
    #[serde(default = "default_true")]
    pub encrypted: bool,
    #[serde(default, rename = "type")]
    pub passphrase_type: PassphraseType,
    /// Always ask the operator for this value.
    #[serde(default)]
    pub prompt: bool,
    #[serde(default = "default_true")]
    pub regenerable: bool,
    #[serde(default)]
    pub profile: Profile,
}

/// `pegleg/PassphraseCatalog/v1`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PassphraseCatalog {
    #[serde(default)]
    pub passphrases: Vec<PassphraseEntry>,
}

impl PassphraseCatalog {
    pub fn from_document(document: &Document) -> Result<Self> {
        parse_catalog(document)
    }
}

/// Every passphrase catalog among `documents`. Having none is an error.
pub fn passphrase_catalogs(documents: &[Document], site: &str) -> Result<Vec<PassphraseCatalog>> {
    let catalogs = find_catalogs(documents, PASSPHRASE_CATALOG_KIND)
        .into_iter()
        .map(PassphraseCatalog::from_document)
        .collect::<Result<Vec<_>>>()?;
    if catalogs.is_empty() {
        return Err(Error::PassphraseCatalogNotFound {
            site: site.to_string(),
        });
    }
    Ok(catalogs)
}
