//! # Site Linting
//!
//! Checks a site's files for layout, formatting and secret-handling
//! problems, optionally renders the site, and classifies every finding.
//!
//! | Code | Finding |
//! |------|---------|
//! | P001 | Secret document not stored with `storagePolicy: encrypted` |
//! | P002 | Rendering incomplete |
//! | P003 | Expected directory missing, or existing directory unused |
//! | P004 | Duplicate `DataSchema` declaration |
//! | P005 | Render engine failure |
//! | P006 | Secret document outside a `secrets/` directory |
//! | P007 | File does not start with `---` |
//! | P008 | Invalid YAML |
//! | P009 | Document layer differs from its directory's layer |
//!
//! Codes in the warn list are reported without failing; codes in the
//! exclude list are dropped. A code in both lists is a warning.

use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::Serialize;

use crate::document::{self, Document, StoragePolicy, LAYER_GLOBAL, LAYER_SITE, LAYER_TYPE};
use crate::error::{Error, Result};
use crate::files::{self, SiteCatalog};
use crate::render::{self, Renderer};
use crate::secrets::ManagedDocument;

pub const SECRET_NOT_ENCRYPTED_POLICY: &str = "P001";
pub const RENDER_INCOMPLETE: &str = "P002";
pub const DIRECTORY_LAYOUT: &str = "P003";
pub const DUPLICATE_SCHEMA: &str = "P004";
pub const RENDER_EXCEPTION: &str = "P005";
pub const SECRET_NOT_IN_SECRETS_DIR: &str = "P006";
pub const MISSING_DOCUMENT_MARKER: &str = "P007";
pub const INVALID_YAML: &str = "P008";
pub const LAYER_MISMATCH: &str = "P009";

/// Schemas that must always be stored encrypted.
pub const MANDATORY_ENCRYPTED_TYPES: [&str; 4] = [
    "deckhand/CertificateAuthorityKey/v1",
    "deckhand/CertificateKey/v1",
    "deckhand/Passphrase/v1",
    "deckhand/PrivateKey/v1",
];

const SECRETS_SECTION: &str = "secrets";

/// A lint problem: a `Pnnn` code and a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintFinding {
    pub code: String,
    pub message: String,
}

impl LintFinding {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LintFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Which codes are excluded and which only warn.
#[derive(Debug, Clone, Default)]
pub struct LintPolicy {
    pub exclude: Vec<String>,
    pub warn: Vec<String>,
}

impl LintPolicy {
    /// Splits `findings` into (errors, warnings). Excluded findings are
    /// dropped unless the code also warns.
    pub fn classify(&self, findings: Vec<LintFinding>) -> (Vec<LintFinding>, Vec<LintFinding>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for finding in findings {
            if self.warn.contains(&finding.code) {
                warnings.push(finding);
            } else if self.exclude.contains(&finding.code) {
                debug!("Excluding lint finding {}", finding);
            } else {
                errors.push(finding);
            }
        }
        (errors, warnings)
    }
}

/// Lints a site and returns its warnings.
///
/// Fails with [`Error::Lint`] when any finding is classified as an error.
/// The site is rendered only when a renderer is given and every file parsed.
pub fn lint(catalog: &SiteCatalog, renderer: Option<&dyn Renderer>, policy: &LintPolicy) -> Result<Vec<LintFinding>> {
    let (errors, warnings) = policy.classify(site_findings(catalog, renderer)?);
    for finding in &warnings {
        warn!("{}", finding);
    }
    if !errors.is_empty() {
        return Err(Error::Lint { errors });
    }
    Ok(warnings)
}

/// Every finding for a site, unclassified.
pub fn site_findings(catalog: &SiteCatalog, renderer: Option<&dyn Renderer>) -> Result<Vec<LintFinding>> {
    let mut findings = directory_findings(catalog);

    let roots = catalog.workspace().roots();
    for path in catalog.site_files() {
        findings.extend(file_findings(&roots, &path)?);
    }

    if let Some(renderer) = renderer {
        if findings.iter().any(|f| f.code == INVALID_YAML) {
            debug!("Skipping render: some files are not valid YAML");
        } else {
            let (_, render_findings) = render::render(catalog.documents()?, renderer, true)?;
            findings.extend(render_findings);
        }
    }
    Ok(findings)
}

/// Checks that every repository contributes to the site and holds no
/// documents outside the layer directories.
pub fn directory_findings(catalog: &SiteCatalog) -> Vec<LintFinding> {
    let mut findings = Vec::new();
    for repo in catalog.workspace().repositories() {
        let expected = catalog.directories_for(repo.root());
        if !expected.iter().any(|dir| dir.is_dir()) {
            let names: Vec<String> = expected.iter().map(|d| d.display().to_string()).collect();
            findings.push(LintFinding::new(
                DIRECTORY_LAYOUT,
                format!(
                    "{} expected at least one of these directories but all were missing: {}",
                    repo.name(),
                    names.join(", ")
                ),
            ));
        }

        let Ok(entries) = fs::read_dir(repo.root()) else {
            continue;
        };
        let mut unused: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.') && name != "tools")
            .filter(|name| ![LAYER_GLOBAL, LAYER_TYPE, LAYER_SITE].contains(&name.as_str()))
            .filter(|name| files::search(&repo.root().join(name)).next().is_some())
            .collect();
        unused.sort();
        for name in unused {
            findings.push(LintFinding::new(
                DIRECTORY_LAYOUT,
                format!(
                    "{} holds documents in {} which is never used",
                    repo.name(),
                    repo.root().join(name).display()
                ),
            ));
        }
    }
    findings
}

/// Formatting, placement, layer and storage-policy checks for one file.
pub fn file_findings(roots: &[&Path], path: &Path) -> Result<Vec<LintFinding>> {
    let mut findings = Vec::new();
    let text = fs::read_to_string(path)?;
    let display = path.display();

    if !text.starts_with("---") {
        findings.push(LintFinding::new(
            MISSING_DOCUMENT_MARKER,
            format!("{} does not begin with YAML beginning of document marker \"---\".", display),
        ));
    }

    let values = match document::load_stream(&text) {
        Ok(values) => values,
        Err(e) => {
            findings.push(LintFinding::new(INVALID_YAML, format!("{} is not valid yaml: {}", display, e)));
            return Ok(findings);
        }
    };

    let expected_layer = files::expected_layer(roots, path);
    for value in values.into_iter().filter(document::is_manifest_document) {
        let doc = match Document::from_value(value) {
            Ok(doc) => doc,
            Err(e) => {
                findings.push(LintFinding::new(
                    INVALID_YAML,
                    format!("{} holds a malformed document: {}", display, e),
                ));
                continue;
            }
        };
        let label = format!("{} (document {}/{})", display, doc.schema, doc.name());

        if let (Some(layer), Some(expected)) = (doc.layer(), expected_layer.as_deref()) {
            if layer != expected {
                findings.push(LintFinding::new(
                    LAYER_MISMATCH,
                    format!("{} had unexpected layer \"{}\", expected \"{}\"", label, layer, expected),
                ));
            }
        }

        let secret = match secret_document(doc) {
            Ok(Some(secret)) => secret,
            Ok(None) => continue,
            Err(e) => {
                findings.push(LintFinding::new(
                    INVALID_YAML,
                    format!("{} holds a malformed managed document: {}", label, e),
                ));
                continue;
            }
        };
        if secret.storage_policy() != Some(StoragePolicy::Encrypted) {
            findings.push(LintFinding::new(
                SECRET_NOT_ENCRYPTED_POLICY,
                format!(
                    "{} is a secret, but has unexpected storagePolicy: \"{}\"",
                    label,
                    secret.storage_policy().map(|p| p.as_str()).unwrap_or("none")
                ),
            ));
        }
        if !files::in_section(roots, path, SECRETS_SECTION) {
            findings.push(LintFinding::new(
                SECRET_NOT_IN_SECRETS_DIR,
                format!("{} is a secret, but is not stored in a secrets path", label),
            ));
        }
    }
    Ok(findings)
}

/// The document whose storage policy matters: the wrapped document of an
/// envelope, or the document itself. `None` when it is not a secret kind.
fn secret_document(doc: Document) -> Result<Option<Document>> {
    let doc = if crate::secrets::managed::is_managed(&doc) {
        ManagedDocument::from_document(doc)?.into_embedded()
    } else {
        doc
    };
    Ok(MANDATORY_ENCRYPTED_TYPES
        .contains(&doc.schema.as_str())
        .then_some(doc))
}
