//! # Error Handling
//!
//! This module defines the centralized error type for `pegleg`. It uses the
//! `thiserror` library to build one `Error` enum covering every failure mode
//! of repository resolution, document loading, secrets management and
//! generation.
//!
//! The variants fall into a handful of families, and callers are expected to
//! treat them differently:
//!
//! - **Configuration** errors (bad repository references, missing secrets
//!   environment, invalid durations, non-Git local paths) fail fast before
//!   anything is mutated.
//! - **Authentication** and **proxy** errors are kept apart from generic clone
//!   failures so tooling can give credential-specific advice.
//! - **Data-integrity** errors (half a keypair, duplicate schemas, a missing
//!   passphrase catalog) are always fatal and never repaired.
//! - **Cryptographic** errors, in particular [`Error::InvalidSignature`], mean
//!   the passphrase/salt pair does not match the one used to encrypt.
//!
//! Conditions that are successful no-ops (already encrypted, already
//! generated, already at the requested revision) are not represented here.

use thiserror::Error;

use crate::lint::LintFinding;

/// Main error type for pegleg operations
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value is missing or malformed.
    #[error("Configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Config {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// An `alias=url[@revision]` repository override could not be parsed.
    #[error("The repository {value} must be in the form of name=repoUrl[@revision]")]
    InvalidRepositoryOverride { value: String },

    /// The passphrase or salt environment variables are missing or too short.
    #[error("Secrets environment error: {message}")]
    SecretsEnvironment { message: String },

    /// A certificate validity window was not a positive number of days.
    #[error("Invalid certificate duration: {days} days (must be a positive integer)")]
    InvalidDuration { days: i64 },

    /// A local path was given as a repository but it is not inside a Git
    /// working tree.
    #[error("{path} is not a valid Git repository")]
    NotARepository { path: String },

    /// A repository URL used a scheme other than http, https or ssh.
    #[error("repo_url must be a valid Git URL (http/https/ssh) or a valid local path: {url}")]
    UnsupportedScheme { url: String },

    /// The site definition document for a site could not be found.
    #[error("{path} not found. Pegleg must be run from the root of a configuration repository")]
    SiteDefinitionNotFound { path: String },

    /// Cloning failed because the credentials were rejected.
    #[error("Failed to authenticate for repo {url} with ssh-key at path {}", ssh_key.as_deref().unwrap_or("<none>"))]
    GitAuth {
        url: String,
        ssh_key: Option<String>,
    },

    /// An SSH key was configured but does not exist on disk.
    #[error("Failed to find specified SSH key: {path}")]
    GitSshKeyMissing { path: String },

    /// Cloning failed because the proxy could not be resolved.
    #[error("Could not resolve proxy {} while cloning {url}", proxy.as_deref().unwrap_or("<from environment>"))]
    GitProxy { url: String, proxy: Option<String> },

    /// An error occurred while cloning a Git repository.
    #[error("Git clone error for {url}@{revision}: {message}")]
    GitClone {
        url: String,
        revision: String,
        message: String,
    },

    /// An error occurred while executing a Git command.
    #[error("Git command failed for {location}: {command} - {stderr}")]
    GitCommand {
        command: String,
        location: String,
        stderr: String,
    },

    /// Any other failure while materializing a repository, carrying the cause.
    #[error("Failed to process repository {location}: {source}")]
    Repository {
        location: String,
        #[source]
        source: Box<Error>,
    },

    /// Only one half of a certificate/key pair was found.
    #[error("Incomplete PKI pair for {name}: expected documents of kinds {kinds:?}")]
    IncompleteKeypair { kinds: Vec<String>, name: String },

    /// More than one `DataSchema` document declared the same name.
    #[error("Duplicate schema specified for: {name}")]
    DuplicateSchema { name: String },

    /// A site has no passphrase catalog but passphrase generation was asked for.
    #[error("Could not find a passphrase catalog for site {site}")]
    PassphraseCatalogNotFound { site: String },

    /// A document passed the manifest filter but is not a well-formed document.
    #[error("Malformed document in {path}: {message}")]
    MalformedDocument { path: String, message: String },

    /// A managed document's ciphertext failed authentication.
    #[error("Signature verification failed while decrypting; check that PEGLEG_PASSPHRASE and PEGLEG_SALT match the values used to encrypt")]
    InvalidSignature,

    /// Any other cryptographic failure (malformed token, bad padding, ...).
    #[error("Cryptographic error: {message}")]
    Crypto { message: String },

    /// An external certificate or key tool failed.
    #[error("{tool} failed: {message}")]
    CertTool { tool: String, message: String },

    /// The external render program could not be run or failed.
    #[error("Renderer {program} failed: {message}")]
    Renderer { program: String, message: String },

    /// Lint found problems classified as errors.
    #[error("Linting failed:\n{}", errors.iter().map(|f| format!("  {}", f)).collect::<Vec<_>>().join("\n"))]
    Lint { errors: Vec<LintFinding> },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON parsing error, wrapped from `serde_json::Error`.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Wraps a failure that happened while materializing `location`.
    ///
    /// Errors that already carry a precise classification (authentication,
    /// proxy, configuration) pass through untouched.
    pub fn repository(location: &str, err: Error) -> Error {
        match err {
            Error::GitAuth { .. }
            | Error::GitSshKeyMissing { .. }
            | Error::GitProxy { .. }
            | Error::NotARepository { .. }
            | Error::UnsupportedScheme { .. }
            | Error::Repository { .. } => err,
            other => Error::Repository {
                location: location.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
