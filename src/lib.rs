//! # Pegleg Library
//!
//! This library aggregates layered YAML site manifests spread across several
//! Git repositories, and manages the secrets those manifests carry. It backs
//! the `pegleg` command-line tool.
//!
//! ## Quick Example
//!
//! ```
//! use pegleg::document::{self, Document};
//! use pegleg::secrets::ManagedDocument;
//!
//! let stream = r#"
//! ---
//! schema: deckhand/Passphrase/v1
//! metadata:
//!   schema: metadata/Document/v1
//!   name: db-password
//!   layeringDefinition: {abstract: false, layer: site}
//!   storagePolicy: encrypted
//! data: s3cr3t
//! "#;
//!
//! let values = document::load_stream(stream).unwrap();
//! let doc = Document::from_value(values[0].clone()).unwrap();
//!
//! // Wrapping is idempotent.
//! let envelope = ManagedDocument::wrap(doc).unwrap();
//! let again = ManagedDocument::wrap(envelope.to_document().unwrap()).unwrap();
//! assert_eq!(envelope, again);
//! assert!(envelope.is_storage_policy_encrypted());
//! ```
//!
//! ## Core Concepts
//!
//! - **Repositories (`repository`, `git`, `definition`)**: A site lives in a
//!   site repository, whose `site/<site>/site-definition.yaml` names the
//!   auxiliary repositories it layers on. Each is cloned or copied into a
//!   scratch directory and pinned to a revision.
//! - **Documents (`document`, `files`)**: The documents of a site are every
//!   YAML file under `global/`, `type/<site_type>/` and `site/<site>/` of
//!   every repository.
//! - **Secrets (`secrets`)**: Secret documents are wrapped in managed
//!   envelopes, encrypted with a key derived from `PEGLEG_PASSPHRASE` and
//!   `PEGLEG_SALT`, and generated from PKI and passphrase catalogs.
//! - **Render and lint (`render`, `lint`)**: Sites are rendered by an external
//!   layering engine and checked for layout and secret-handling problems.
//!
//! ## Execution Flow
//!
//! Every command follows the same steps:
//!
//! 1.  **Configure**: Build one immutable [`config::ConfigContext`] from flags
//!     and environment.
//! 2.  **Resolve**: Materialize the site repository and its auxiliary
//!     repositories into a [`repository::Workspace`].
//! 3.  **Catalog**: Collect the site's documents with a
//!     [`files::SiteCatalog`].
//! 4.  **Act**: Render, lint, collect, generate, encrypt or decrypt.
//!
//! Scratch directories are owned by the workspace and removed when it is
//! dropped.

pub mod config;
pub mod definition;
pub mod document;
pub mod error;
pub mod files;
pub mod git;
pub mod lint;
pub mod output;
pub mod render;
pub mod repository;
pub mod secrets;

#[cfg(test)]
mod secrets_proptest;
