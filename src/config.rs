//! # Command Configuration
//!
//! Every command builds one [`ConfigContext`] from its flags and passes it by
//! reference to the repository resolver, the document catalog and the secret
//! generators. Nothing changes it after construction.
//!
//! [`Credentials`] holds the passphrase and salt used to derive the secrets
//! encryption key. They are read from `PEGLEG_PASSPHRASE` and `PEGLEG_SALT`
//! and validated before any file is touched.

use std::env;
use std::fmt;
use std::path::PathBuf;

use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Environment variable holding the secrets passphrase.
pub const ENV_PASSPHRASE: &str = "PEGLEG_PASSPHRASE";

/// Environment variable holding the secrets salt.
pub const ENV_SALT: &str = "PEGLEG_SALT";

/// Shortest passphrase accepted for key derivation.
pub const MIN_PASSPHRASE_LENGTH: usize = 24;

/// Immutable configuration for a single command invocation.
#[derive(Debug, Clone)]
pub struct ConfigContext {
    /// Primary site repository: a local path or URL, optionally `@revision`.
    pub site_repository: String,
    /// Auxiliary repository overrides in `alias=url[@revision]` form.
    pub extra_repositories: Vec<String>,
    /// SSH key used for cloning over ssh.
    pub repo_key: Option<PathBuf>,
    /// Substituted for `REPO_USERNAME` in repository URLs.
    pub repo_username: Option<String>,
    /// Persistent location for clones; temporary directories are used when unset.
    pub clone_path: Option<PathBuf>,
    /// Decrypt managed secrets when collecting documents.
    pub decrypt_repos: bool,
    /// HTTP proxy passed to `git clone`.
    pub proxy_server: Option<String>,
}

impl Default for ConfigContext {
    fn default() -> Self {
        Self {
            site_repository: "./".to_string(),
            extra_repositories: Vec::new(),
            repo_key: None,
            repo_username: None,
            clone_path: None,
            decrypt_repos: false,
            proxy_server: None,
        }
    }
}

impl ConfigContext {
    pub fn new(site_repository: impl Into<String>) -> Self {
        Self {
            site_repository: site_repository.into(),
            ..Self::default()
        }
    }

    pub fn with_extra_repositories(mut self, extra: Vec<String>) -> Self {
        self.extra_repositories = extra;
        self
    }

    pub fn with_repo_key(mut self, key: Option<PathBuf>) -> Self {
        self.repo_key = key;
        self
    }

    pub fn with_repo_username(mut self, username: Option<String>) -> Self {
        self.repo_username = username;
        self
    }

    pub fn with_clone_path(mut self, clone_path: Option<PathBuf>) -> Self {
        self.clone_path = clone_path;
        self
    }

    pub fn with_decrypt_repos(mut self, decrypt: bool) -> Self {
        self.decrypt_repos = decrypt;
        self
    }

    pub fn with_proxy_server(mut self, proxy: Option<String>) -> Self {
        self.proxy_server = proxy;
        self
    }

    /// Ensures the site repository was actually specified.
    pub fn validate(&self) -> Result<()> {
        if self.site_repository.trim().is_empty() {
            return Err(Error::Config {
                message: "Site repository directory must be specified".to_string(),
                hint: Some("Pass the site repository with -r <path-or-url>".to_string()),
            });
        }
        if let Some(clone_path) = &self.clone_path {
            if clone_path.exists() && !clone_path.is_dir() {
                return Err(Error::Config {
                    message: format!("Clone path {} is not a directory", clone_path.display()),
                    hint: None,
                });
            }
        }
        Ok(())
    }
}

/// Passphrase and salt used to derive the secrets encryption key.
///
/// Both values are wiped from memory when dropped.
#[derive(Clone)]
pub struct Credentials {
    passphrase: Zeroizing<String>,
    salt: Zeroizing<String>,
}

impl Credentials {
    /// Builds credentials, rejecting an empty salt or a passphrase shorter
    /// than [`MIN_PASSPHRASE_LENGTH`].
    pub fn new(passphrase: impl Into<String>, salt: impl Into<String>) -> Result<Self> {
        let passphrase = Zeroizing::new(passphrase.into());
        let salt = Zeroizing::new(salt.into());

        if passphrase.is_empty() || salt.is_empty() {
            return Err(Error::SecretsEnvironment {
                message: format!("{} and {} must both be set", ENV_PASSPHRASE, ENV_SALT),
            });
        }
        if passphrase.chars().count() < MIN_PASSPHRASE_LENGTH {
            return Err(Error::SecretsEnvironment {
                message: format!(
                    "{} must be at least {} characters long",
                    ENV_PASSPHRASE, MIN_PASSPHRASE_LENGTH
                ),
            });
        }

        Ok(Self { passphrase, salt })
    }

    /// Reads `PEGLEG_PASSPHRASE` and `PEGLEG_SALT`.
    pub fn from_env() -> Result<Self> {
        let passphrase = env::var(ENV_PASSPHRASE).unwrap_or_default();
        let salt = env::var(ENV_SALT).unwrap_or_default();
        Self::new(passphrase, salt)
    }

    pub fn passphrase(&self) -> &[u8] {
        self.passphrase.as_bytes()
    }

    pub fn salt(&self) -> &[u8] {
        self.salt.as_bytes()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("passphrase", &"<redacted>")
            .field("salt", &"<redacted>")
            .finish()
    }
}
