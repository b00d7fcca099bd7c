//! # PKI Generation
//!
//! Produces the certificate authorities, certificates and key pairs declared
//! by a site's `pegleg/PKICatalog/v1` documents.
//!
//! Each item is found or generated. Material already present in the site is
//! reused when both halves of its pair exist; one half alone is an error.
//! Material produced earlier in the same run is reused too, so a CA
//! declared twice is generated once. Every document, reused or new, is
//! written back encrypted to `<save>/site/<site>/secrets/...`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use log::{debug, info};
use serde_yaml::Value;

use crate::config::Credentials;
use crate::document::{deckhand_schema, Document, StoragePolicy, LAYER_SITE};
use crate::error::{Error, Result};
use crate::files;
use crate::secrets::catalog::{pki_catalogs, CertificateEntry};
use crate::secrets::managed::ManagedDocument;
use crate::secrets::management::{SecretSource, SecretsManagement};
use crate::secrets::pki_utility::{CertAndKey, CertificateRequest, CertificateTool};

pub const CA_KINDS: (&str, &str) = ("CertificateAuthority", "CertificateAuthorityKey");
pub const CERTIFICATE_KINDS: (&str, &str) = ("Certificate", "CertificateKey");
pub const KEYPAIR_KINDS: (&str, &str) = ("PublicKey", "PrivateKey");

/// Generator state for one run.
pub struct PkiGenerator {
    site: String,
    author: String,
    regenerate_all: bool,
    credentials: Credentials,
    tool: Box<dyn CertificateTool>,
    existing: Vec<ManagedDocument>,
    catalog_documents: Vec<Document>,
    outputs: BTreeMap<(String, String), ManagedDocument>,
    cert_to_ca: HashMap<String, String>,
}

impl PkiGenerator {
    /// `documents` are the site's documents. Encrypted envelopes among them
    /// are decrypted so their material can sign new certificates.
    pub fn new(
        site: &str,
        documents: Vec<Document>,
        tool: Box<dyn CertificateTool>,
        credentials: Credentials,
        author: &str,
        regenerate_all: bool,
    ) -> Result<Self> {
        let existing =
            SecretsManagement::new(SecretSource::Documents(documents.clone()), &credentials)?
                .decrypted_envelopes()?;
        Ok(Self {
            site: site.to_string(),
            author: author.to_string(),
            regenerate_all,
            credentials,
            tool,
            existing,
            catalog_documents: documents,
            outputs: BTreeMap::new(),
            cert_to_ca: HashMap::new(),
        })
    }

    /// Finds or generates everything the catalogs declare and writes it
    /// under `save_location`. Returns the distinct files written.
    pub fn generate(&mut self, save_location: &Path) -> Result<Vec<PathBuf>> {
        for catalog in pki_catalogs(&self.catalog_documents)? {
            for (ca_name, authority) in &catalog.certificate_authorities {
                let (ca_cert, ca_key) = self.get_or_gen_ca(ca_name)?;
                let ca = CertAndKey {
                    cert: payload(&ca_cert)?,
                    key: payload(&ca_key)?,
                };
                for certificate in &authority.certificates {
                    self.cert_to_ca
                        .insert(certificate.document_name.clone(), ca_name.clone());
                    self.get_or_gen_cert(certificate, &ca)?;
                }
            }
            for keypair in &catalog.keypairs {
                self.get_or_gen_keypair(&keypair.name)?;
            }
        }
        self.write(save_location)
    }

    fn get_or_gen_ca(&mut self, name: &str) -> Result<(ManagedDocument, ManagedDocument)> {
        self.find_or_generate(CA_KINDS, name, |tool| {
            let ca = tool.generate_ca(name)?;
            Ok((ca.cert, ca.key))
        })
    }

    fn get_or_gen_cert(&mut self, entry: &CertificateEntry, ca: &CertAndKey) -> Result<(ManagedDocument, ManagedDocument)> {
        let request = CertificateRequest {
            common_name: entry.common_name.clone(),
            hosts: entry.subject_alt_names(),
            groups: entry.groups.clone(),
        };
        self.find_or_generate(CERTIFICATE_KINDS, &entry.document_name, |tool| {
            let cert = tool.generate_certificate(ca, &request)?;
            Ok((cert.cert, cert.key))
        })
    }

    fn get_or_gen_keypair(&mut self, name: &str) -> Result<(ManagedDocument, ManagedDocument)> {
        self.find_or_generate(KEYPAIR_KINDS, name, |tool| {
            let keypair = tool.generate_keypair()?;
            Ok((keypair.public_key, keypair.private_key))
        })
    }

    fn find_or_generate<F>(&mut self, kinds: (&str, &str), name: &str, generate: F) -> Result<(ManagedDocument, ManagedDocument)>
    where
        F: FnOnce(&dyn CertificateTool) -> Result<(String, String)>,
    {
        let found = match self.find_in_outputs(kinds, name) {
            Some(pair) => Some(pair),
            None if self.regenerate_all => None,
            None => find_pair(&self.existing, kinds, name)?,
        };

        let (first, second) = match found {
            Some(pair) => {
                debug!("Found existing {}/{} pair for {}", kinds.0, kinds.1, name);
                pair
            }
            None => {
                info!("Generating {}/{} pair for {}", kinds.0, kinds.1, name);
                let (first, second) = generate(self.tool.as_ref())?;
                (
                    ManagedDocument::wrap_generated(secret_document(kinds.0, name, first), &self.author)?,
                    ManagedDocument::wrap_generated(secret_document(kinds.1, name, second), &self.author)?,
                )
            }
        };

        for document in [&first, &second] {
            self.outputs.insert(
                (document.embedded().schema.clone(), name.to_string()),
                document.clone(),
            );
        }
        Ok((first, second))
    }

    fn find_in_outputs(&self, kinds: (&str, &str), name: &str) -> Option<(ManagedDocument, ManagedDocument)> {
        let first = self.outputs.get(&(deckhand_schema(kinds.0), name.to_string()))?;
        let second = self.outputs.get(&(deckhand_schema(kinds.1), name.to_string()))?;
        Some((first.clone(), second.clone()))
    }

    /// Deletes stale files, then appends every tracked document encrypted.
    fn write(&mut self, save_location: &Path) -> Result<Vec<PathBuf>> {
        let site_root = save_location.join("site");
        let mut planned = Vec::with_capacity(self.outputs.len());
        for document in self.outputs.values_mut() {
            let path = site_root.join(document.output_path(&self.site, &self.cert_to_ca));
            planned.push((path, document.clone()));
        }

        let mut written: Vec<PathBuf> = Vec::new();
        for (path, _) in &planned {
            if !written.contains(path) {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                written.push(path.clone());
            }
        }

        for (path, mut document) in planned {
            document.set_storage_policy(StoragePolicy::Encrypted);
            let mut engine = SecretsManagement::new(
                SecretSource::Documents(vec![document.to_document()?]),
                &self.credentials,
            )?;
            let (encrypted, _) = engine.get_encrypted_secrets(&self.author)?;
            files::append_documents(&path, &encrypted)?;
        }

        for path in &written {
            info!("Wrote PKI material to {}", path.display());
        }
        Ok(written)
    }
}

fn secret_document(kind: &str, name: &str, pem: String) -> Document {
    let policy = if kind.ends_with("Key") {
        StoragePolicy::Encrypted
    } else {
        StoragePolicy::Cleartext
    };
    Document::new(deckhand_schema(kind), name, LAYER_SITE, policy, Value::String(pem))
}

fn payload(document: &ManagedDocument) -> Result<String> {
    document
        .embedded()
        .data
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedDocument {
            path: format!("{}/{}", document.embedded().schema, document.embedded().name()),
            message: "expected a PEM string".to_string(),
        })
}

/// Looks for both halves of a pair. One half without the other is an error.
fn find_pair(
    documents: &[ManagedDocument],
    kinds: (&str, &str),
    name: &str,
) -> Result<Option<(ManagedDocument, ManagedDocument)>> {
    let find = |kind: &str| {
        let schema = deckhand_schema(kind);
        documents
            .iter()
            .find(|d| d.embedded().schema == schema && d.embedded().name() == name)
            .cloned()
    };

    match (find(kinds.0), find(kinds.1)) {
        (Some(first), Some(second)) => Ok(Some((first, second))),
        (None, None) => Ok(None),
        _ => Err(Error::IncompleteKeypair {
            kinds: vec![kinds.0.to_string(), kinds.1.to_string()],
            name: name.to_string(),
        }),
    }
}

/// Expiry of one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateExpiry {
    pub name: String,
    pub not_after: chrono::DateTime<Utc>,
    /// Expires within the checked window.
    pub expired: bool,
}

/// Whether `cert` expires within `days` from now.
pub fn check_expiry(tool: &dyn CertificateTool, name: &str, cert: &str, days: i64) -> Result<CertificateExpiry> {
    if days < 0 {
        return Err(Error::InvalidDuration { days });
    }
    let not_after = tool.not_after(cert)?;
    Ok(CertificateExpiry {
        name: name.to_string(),
        not_after,
        expired: Utc::now() + Duration::days(days) > not_after,
    })
}

/// Checks every certificate among `documents`, decrypting envelopes when
/// needed.
pub fn check_certificates(
    documents: Vec<Document>,
    tool: &dyn CertificateTool,
    days: i64,
) -> Result<Vec<CertificateExpiry>> {
    let certificate_schema = deckhand_schema(CERTIFICATE_KINDS.0);
    let certificates: Vec<Document> = documents
        .into_iter()
        .filter(|doc| {
            doc.schema == certificate_schema
                || doc
                    .data
                    .get("managedDocument")
                    .and_then(|m| m.get("schema"))
                    .and_then(Value::as_str)
                    == Some(certificate_schema.as_str())
        })
        .collect();

    crate::secrets::management::decrypt_and_unwrap(certificates)?
        .iter()
        .map(|doc| {
            let pem = doc.data.as_str().ok_or_else(|| Error::MalformedDocument {
                path: doc.name().to_string(),
                message: "certificate data is not a PEM string".to_string(),
            })?;
            check_expiry(tool, doc.name(), pem, days)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::pki_utility::Keypair;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    const PASSPHRASE: &str = "ytrr89erARAiPE34692iwUMvWqqBvC";
    const SALT: &str = "MySecretSalt1234567890][";

    type Calls = Rc<RefCell<Vec<String>>>;

    /// Mock certificate tooling for testing
    struct MockCertificateTool {
        calls: Calls,
        not_after: chrono::DateTime<Utc>,
    }

    impl MockCertificateTool {
        fn new() -> (Self, Calls) {
            let calls = Calls::default();
            (
                Self {
                    calls: calls.clone(),
                    not_after: Utc::now() + Duration::days(30),
                },
                calls,
            )
        }
    }

    impl CertificateTool for MockCertificateTool {
        fn generate_ca(&self, common_name: &str) -> Result<CertAndKey> {
            self.calls.borrow_mut().push(format!("ca:{}", common_name));
            Ok(CertAndKey {
                cert: format!("CA CERT {}", common_name),
                key: format!("CA KEY {}", common_name),
            })
        }

        fn generate_certificate(&self, ca: &CertAndKey, request: &CertificateRequest) -> Result<CertAndKey> {
            self.calls
                .borrow_mut()
                .push(format!("cert:{}:{}", request.common_name, request.hosts.join(",")));
            Ok(CertAndKey {
                cert: format!("CERT {} signed by {}", request.common_name, ca.cert),
                key: format!("KEY {}", request.common_name),
            })
        }

        fn generate_keypair(&self) -> Result<Keypair> {
            self.calls.borrow_mut().push("keypair".to_string());
            Ok(Keypair {
                public_key: "PUBLIC".to_string(),
                private_key: "PRIVATE".to_string(),
            })
        }

        fn not_after(&self, _cert: &str) -> Result<chrono::DateTime<Utc>> {
            Ok(self.not_after)
        }
    }

    fn credentials() -> Credentials {
        Credentials::new(PASSPHRASE, SALT).unwrap()
    }

    fn catalog(keypairs: bool) -> Document {
        let mut text = r#"
schema: pegleg/PKICatalog/v1
metadata:
  schema: metadata/Document/v1
  name: cluster-certificates
  layeringDefinition: {abstract: false, layer: site}
  storagePolicy: cleartext
data:
  certificate_authorities:
    kubernetes:
      description: CA for Kubernetes components
      certificates:
        - document_name: kubelet-n3
          common_name: system:node:n3
          hosts: [n3, 192.168.77.13]
"#
        .to_string();
        if keypairs {
            text.push_str("  keypairs:\n    - name: service-account\n");
        }
        serde_yaml::from_str(&text).unwrap()
    }

    fn read_envelopes(path: &Path) -> Vec<ManagedDocument> {
        files::read_documents(path)
            .unwrap()
            .into_iter()
            .map(|d| ManagedDocument::from_document(d).unwrap())
            .collect()
    }

    #[test]
    fn test_generate_from_catalog() {
        let save = TempDir::new().unwrap();
        let (tool, calls) = MockCertificateTool::new();
        let mut generator =
            PkiGenerator::new("demo", vec![catalog(false)], Box::new(tool), credentials(), "tester", false)
                .unwrap();

        let paths = generator.generate(save.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&save.path().join("site/demo/secrets/certificates/kubernetes_ca.yaml")));
        assert!(paths.contains(
            &save
                .path()
                .join("site/demo/secrets/certificates/kubernetes_kubelet_n3_certificate.yaml")
        ));
        assert_eq!(
            calls.borrow().as_slice(),
            &["ca:kubernetes", "cert:system:node:n3:n3,192.168.77.13"]
        );

        let mut schemas = Vec::new();
        for path in &paths {
            for envelope in read_envelopes(path) {
                assert_eq!(envelope.metadata.storage_policy, Some(StoragePolicy::Cleartext));
                assert!(envelope.is_encrypted());
                assert!(envelope.is_storage_policy_encrypted());
                assert!(envelope.is_generated());
                schemas.push(envelope.embedded().schema.clone());
            }
        }
        schemas.sort();
        assert_eq!(
            schemas,
            vec![
                "deckhand/Certificate/v1",
                "deckhand/CertificateAuthority/v1",
                "deckhand/CertificateAuthorityKey/v1",
                "deckhand/CertificateKey/v1",
            ]
        );
    }

    #[test]
    fn test_certificate_is_signed_by_ca() {
        let save = TempDir::new().unwrap();
        let (tool, _calls) = MockCertificateTool::new();
        let mut generator =
            PkiGenerator::new("demo", vec![catalog(false)], Box::new(tool), credentials(), "tester", false)
                .unwrap();
        generator.generate(save.path()).unwrap();

        let engine = SecretsManagement::new(
            SecretSource::File(
                save.path()
                    .join("site/demo/secrets/certificates/kubernetes_kubelet_n3_certificate.yaml"),
            ),
            &credentials(),
        )
        .unwrap();
        let docs = engine.get_decrypted_secrets().unwrap();
        assert_eq!(docs[0].data, Value::String("CERT system:node:n3 signed by CA CERT kubernetes".to_string()));
    }

    #[test]
    fn test_keypairs_are_generated() {
        let save = TempDir::new().unwrap();
        let (tool, calls) = MockCertificateTool::new();
        let mut generator =
            PkiGenerator::new("demo", vec![catalog(true)], Box::new(tool), credentials(), "tester", false)
                .unwrap();

        let paths = generator.generate(save.path()).unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths.contains(&save.path().join("site/demo/secrets/keypairs/service_account.yaml")));
        assert!(calls.borrow().contains(&"keypair".to_string()));
    }

    fn existing_ca() -> Vec<Document> {
        vec![
            secret_document("CertificateAuthority", "kubernetes", "OLD CA CERT".to_string()),
            secret_document("CertificateAuthorityKey", "kubernetes", "OLD CA KEY".to_string()),
        ]
    }

    #[test]
    fn test_existing_material_is_reused() {
        let save = TempDir::new().unwrap();
        let (tool, calls) = MockCertificateTool::new();
        let mut documents = vec![catalog(false)];
        documents.extend(existing_ca());
        let mut generator =
            PkiGenerator::new("demo", documents, Box::new(tool), credentials(), "tester", false).unwrap();

        generator.generate(save.path()).unwrap();
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("cert:"));
    }

    #[test]
    fn test_regenerate_all_ignores_existing_material() {
        let save = TempDir::new().unwrap();
        let (tool, calls) = MockCertificateTool::new();
        let mut documents = vec![catalog(false)];
        documents.extend(existing_ca());
        let mut generator =
            PkiGenerator::new("demo", documents, Box::new(tool), credentials(), "tester", true).unwrap();

        generator.generate(save.path()).unwrap();
        assert_eq!(calls.borrow()[0], "ca:kubernetes");
    }

    #[test]
    fn test_half_a_pair_is_an_error() {
        let save = TempDir::new().unwrap();
        let (tool, _calls) = MockCertificateTool::new();
        let mut documents = vec![catalog(false)];
        documents.push(secret_document("CertificateAuthority", "kubernetes", "ORPHAN".to_string()));
        let mut generator =
            PkiGenerator::new("demo", documents, Box::new(tool), credentials(), "tester", false).unwrap();

        let err = generator.generate(save.path()).unwrap_err();
        assert!(matches!(err, Error::IncompleteKeypair { .. }));
    }

    #[test]
    fn test_rerun_replaces_files_instead_of_appending() {
        let save = TempDir::new().unwrap();
        for _ in 0..2 {
            let (tool, _calls) = MockCertificateTool::new();
            let mut generator =
                PkiGenerator::new("demo", vec![catalog(false)], Box::new(tool), credentials(), "tester", false)
                    .unwrap();
            generator.generate(save.path()).unwrap();
        }
        let path = save.path().join("site/demo/secrets/certificates/kubernetes_ca.yaml");
        assert_eq!(read_envelopes(&path).len(), 2);
        assert_eq!(fs::read_to_string(path).unwrap().lines().filter(|l| *l == "---").count(), 2);
    }

    #[test]
    fn test_check_expiry_window() {
        let (tool, _calls) = MockCertificateTool::new();
        assert!(!check_expiry(&tool, "c", "PEM", 10).unwrap().expired);
        assert!(check_expiry(&tool, "c", "PEM", 60).unwrap().expired);
        assert!(matches!(
            check_expiry(&tool, "c", "PEM", -1),
            Err(Error::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_check_certificates_only_checks_certificates() {
        let (tool, _calls) = MockCertificateTool::new();
        let cert = secret_document("Certificate", "kubelet-n3", "PEM".to_string());
        let wrapped = ManagedDocument::wrap(cert).unwrap().to_document().unwrap();
        let key = secret_document("CertificateKey", "kubelet-n3", "KEY".to_string());

        let results = check_certificates(vec![wrapped, key], &tool, 60).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "kubelet-n3");
        assert!(results[0].expired);
    }
}
