//! # Passphrase Generation
//!
//! Generates one `deckhand/Passphrase/v1` document per entry of a site's
//! passphrase catalogs and writes it to
//! `<save>/site/<site>/secrets/passphrases/<document_name>.yaml`.
//!
//! Entries marked `regenerable: false` whose file already exists are never
//! touched. Values are either entered by an operator (interactive runs, or
//! entries with `prompt: true`) or drawn at random.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dialoguer::{theme::ColorfulTheme, Password};
use log::{debug, info, warn};
use regex::Regex;
use serde_yaml::Value;

use crate::config::Credentials;
use crate::document::{deckhand_schema, Document, StoragePolicy, LAYER_SITE};
use crate::error::{Error, Result};
use crate::files;
use crate::secrets::catalog::{passphrase_catalogs, PassphraseCatalog, PassphraseEntry, PassphraseType};
use crate::secrets::crypto_string::CryptoString;
use crate::secrets::managed::ManagedDocument;
use crate::secrets::management::{SecretSource, SecretsManagement};

pub const PASSPHRASE_KIND: &str = "Passphrase";

const UUID_PATTERN: &str =
    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";
const BASE64_PATTERN: &str = r"^[A-Za-z0-9+/]+={0,2}$";

/// Source of operator-entered values.
pub trait Prompter {
    /// Asks for a value. An empty answer means "generate one".
    fn prompt(&self, message: &str) -> Result<String>;
}

/// Hidden-input prompt on the terminal.
pub struct ConsolePrompter;

impl Prompter for ConsolePrompter {
    fn prompt(&self, message: &str) -> Result<String> {
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .allow_empty_password(true)
            .interact()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
    }
}

pub struct PassphraseGenerator {
    site: String,
    save_location: PathBuf,
    author: String,
    catalogs: Vec<PassphraseCatalog>,
    credentials: Option<Credentials>,
    prompter: Box<dyn Prompter>,
}

impl PassphraseGenerator {
    /// Fails with [`Error::PassphraseCatalogNotFound`] when `documents` hold
    /// no passphrase catalog.
    ///
    /// `credentials` are only needed when some entry is stored encrypted.
    pub fn new(
        site: &str,
        documents: &[Document],
        save_location: &Path,
        author: &str,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        Ok(Self {
            site: site.to_string(),
            save_location: save_location.to_path_buf(),
            author: author.to_string(),
            catalogs: passphrase_catalogs(documents, site)?,
            credentials,
            prompter: Box::new(ConsolePrompter),
        })
    }

    pub fn with_prompter(mut self, prompter: Box<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Path of an entry relative to `<save>/site`.
    fn relative_path(&self, document_name: &str) -> PathBuf {
        PathBuf::from(&self.site)
            .join("secrets")
            .join("passphrases")
            .join(format!("{}.yaml", document_name))
    }

    /// Generates every catalog entry. Returns the files written.
    pub fn generate(&self, interactive: bool, force_cleartext: bool) -> Result<Vec<PathBuf>> {
        if force_cleartext {
            warn!("Passphrases for {} will be generated in clear text.", self.site);
        }

        let mut written = Vec::new();
        for entry in self.catalogs.iter().flat_map(|c| &c.passphrases) {
            let relative = self.relative_path(&entry.document_name);
            let path = self.save_location.join("site").join(&relative);
            if !entry.regenerable && path.exists() {
                debug!(
                    "Passphrase {} is not regenerable and already exists; skipping",
                    entry.document_name
                );
                continue;
            }

            let value = match self.solicit(entry, interactive)? {
                Some(value) => value,
                None => generate_value(entry),
            };

            let policy = if entry.encrypted && !force_cleartext {
                StoragePolicy::Encrypted
            } else {
                StoragePolicy::Cleartext
            };
            let document = Document::new(
                deckhand_schema(PASSPHRASE_KIND),
                entry.document_name.as_str(),
                LAYER_SITE,
                policy,
                Value::String(value),
            );
            let mut managed = ManagedDocument::wrap_generated(document, &self.author)?;
            managed.set_specified_path(&relative.to_string_lossy());

            if policy == StoragePolicy::Encrypted {
                let credentials = self.credentials.as_ref().ok_or_else(|| Error::SecretsEnvironment {
                    message: format!(
                        "passphrase {} must be encrypted but no passphrase and salt were provided",
                        entry.document_name
                    ),
                })?;
                let mut engine = SecretsManagement::new(
                    SecretSource::Documents(vec![managed.to_document()?]),
                    credentials,
                )?;
                engine.encrypt_secrets(&path, &self.author)?;
            } else {
                files::write_documents(&path, &[managed])?;
            }
            info!("Generated passphrase {}", entry.document_name);
            written.push(path);
        }
        Ok(written)
    }

    /// Asks the operator until the answer is blank or valid for the entry's
    /// type. A blank answer yields `None`.
    fn solicit(&self, entry: &PassphraseEntry, interactive: bool) -> Result<Option<String>> {
        if !interactive && !entry.prompt {
            return Ok(None);
        }
        let (pattern, type_name) = match entry.passphrase_type {
            PassphraseType::Uuid => (Some(Regex::new(UUID_PATTERN)?), "uuid"),
            PassphraseType::Base64 => (Some(Regex::new(BASE64_PATTERN)?), "base64"),
            PassphraseType::Passphrase => (None, "passphrase"),
        };

        let mut message = format!(
            "Input passphrase for {}. Leave blank to auto-generate",
            entry.document_name
        );
        loop {
            let answer = self.prompter.prompt(&message)?;
            let answer = answer.trim();
            if answer.is_empty() {
                return Ok(None);
            }
            match &pattern {
                Some(re) if !re.is_match(answer) => {
                    message = format!(
                        "Not a valid {} value for {}. Try again or leave blank to auto-generate",
                        type_name, entry.document_name
                    );
                }
                _ => return Ok(Some(answer.to_string())),
            }
        }
    }
}

/// A random value for `entry`.
fn generate_value(entry: &PassphraseEntry) -> String {
    let strings = CryptoString::new(entry.profile);
    match entry.passphrase_type {
        PassphraseType::Uuid => uuid::Uuid::new_v4().to_string(),
        PassphraseType::Base64 => STANDARD.encode(strings.generate(entry.length)),
        PassphraseType::Passphrase => strings.generate(entry.length),
    }
}
