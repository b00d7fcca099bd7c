//! Shared test utilities for E2E tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new().with_site_repository();
//!     fixture.command().args(["site", "list"]).assert().success();
//! }
//! ```

use assert_fs::prelude::*;
use std::env;
use std::path::{Path, PathBuf};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::documents;
    #[allow(unused_imports)]
    pub use super::should_skip_network_tests;
    #[allow(unused_imports)]
    pub use super::{TestFixture, PASSPHRASE, SALT};
}

/// Encryption passphrase accepted by `PEGLEG_PASSPHRASE`.
pub const PASSPHRASE: &str = "ytrr89erARAiPE34692iwUMvWqqBvC";

/// Salt accepted by `PEGLEG_SALT`.
pub const SALT: &str = "MySecretSalt1234567890][";

/// Document snippets used to populate site repositories.
#[allow(dead_code)]
pub mod documents {
    /// Site definition of the `demo` site of type `foundry`.
    pub const SITE_DEFINITION: &str = r#"---
schema: pegleg/SiteDefinition/v1
metadata:
  schema: metadata/Document/v1
  name: demo
  layeringDefinition:
    abstract: false
    layer: site
  storagePolicy: cleartext
data:
  site_type: foundry
"#;

    pub const GLOBAL_LAYERING_POLICY: &str = r#"---
schema: deckhand/LayeringPolicy/v1
metadata:
  schema: metadata/Control/v1
  name: layering-policy
  layeringDefinition:
    abstract: false
    layer: global
  storagePolicy: cleartext
data:
  layerOrder:
    - global
    - type
    - site
"#;

    pub const TYPE_CHART: &str = r#"---
schema: armada/Chart/v1
metadata:
  schema: metadata/Document/v1
  name: ucp-chart
  layeringDefinition:
    abstract: false
    layer: type
  storagePolicy: cleartext
data:
  release: ucp
"#;

    /// A passphrase catalog declaring one passphrase.
    pub const PASSPHRASE_CATALOG: &str = r#"---
schema: pegleg/PassphraseCatalog/v1
metadata:
  schema: metadata/Document/v1
  name: cluster-passphrases
  layeringDefinition:
    abstract: false
    layer: site
  storagePolicy: cleartext
data:
  passphrases:
    - description: keystone admin password
      document_name: ucp_keystone_admin_password
      encrypted: true
"#;

    /// A passphrase stored in clear text inside `secrets/`.
    pub const CLEARTEXT_SECRET: &str = r#"---
schema: deckhand/Passphrase/v1
metadata:
  schema: metadata/Document/v1
  name: ipmi_admin_password
  layeringDefinition:
    abstract: false
    layer: site
  storagePolicy: encrypted
data: hunter2-hunter2-hunter2
"#;

    /// A certificate placed outside any `secrets/` directory.
    pub const MISPLACED_CERTIFICATE: &str = r#"---
schema: deckhand/Certificate/v1
metadata:
  schema: metadata/Document/v1
  name: apiserver
  layeringDefinition:
    abstract: false
    layer: site
  storagePolicy: cleartext
data: not-really-a-certificate
"#;
}

/// Check if network tests should be skipped.
///
/// Returns `true` if the `SKIP_NETWORK_TESTS` environment variable is set.
#[allow(dead_code)]
pub fn should_skip_network_tests() -> bool {
    env::var("SKIP_NETWORK_TESTS").is_ok()
}

/// A temporary directory laid out as a site repository.
///
/// The repository is recognized through an empty `.git` directory; no Git
/// binary is needed for local, revision-less repositories.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Lay out the `demo` site with one document per layer.
    pub fn with_site_repository(self) -> Self {
        self.temp_dir
            .child(".git")
            .create_dir_all()
            .expect("Failed to create .git");
        self.with_file("site/demo/site-definition.yaml", documents::SITE_DEFINITION)
            .with_file("global/common/layering-policy.yaml", documents::GLOBAL_LAYERING_POLICY)
            .with_file("type/foundry/charts/ucp.yaml", documents::TYPE_CHART)
    }

    /// Add a file with the given path and content.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    /// Get the path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Absolute path of a file inside the fixture.
    #[allow(dead_code)]
    pub fn file(&self, path: &str) -> PathBuf {
        self.temp_dir.path().join(path)
    }

    /// Create a child path in the temp directory.
    #[allow(dead_code)]
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// A `pegleg` command running inside the fixture with the secrets
    /// environment cleared.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pegleg");
        cmd.current_dir(self.path())
            .env_remove("PEGLEG_PASSPHRASE")
            .env_remove("PEGLEG_SALT")
            .env_remove("PEGLEG_SITE_REPOSITORY")
            .env_remove("PEGLEG_RENDERER")
            .env("USER", "tester");
        cmd
    }

    /// Like [`TestFixture::command`] with `PEGLEG_PASSPHRASE` and
    /// `PEGLEG_SALT` set.
    #[allow(dead_code)]
    pub fn secrets_command(&self) -> assert_cmd::Command {
        let mut cmd = self.command();
        cmd.env("PEGLEG_PASSPHRASE", PASSPHRASE)
            .env("PEGLEG_SALT", SALT);
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
