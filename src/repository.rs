//! # Repository Resolution
//!
//! This module turns the primary site repository reference and any
//! `alias=url[@revision]` overrides into a [`Workspace`]: a set of
//! revision-pinned, locally materialized repositories that the document
//! catalog can scan.
//!
//! ## Design
//!
//! Resolution always starts with the primary repository. Its site definition
//! declares the auxiliary repositories by alias, and explicit overrides win
//! over those declarations.
//!
//! Git work goes through the [`GitOperations`] trait so the resolution logic
//! can be tested without a network or a `git` binary. [`DefaultGitOperations`]
//! wraps the system `git` command from [`crate::git`].
//!
//! A caller's local checkout is never mutated: local repositories are copied
//! into a temporary directory first and all checkouts happen on the copy.
//! Each [`MaterializedRepo`] owns its temporary directory, so everything is
//! removed when the workspace is dropped, on success and error paths alike.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::config::ConfigContext;
use crate::definition;
use crate::error::{Error, Result};
use crate::git::{self, GitAuth};

/// Alias reserved for the primary repository.
pub const SITE_ALIAS: &str = "site";

/// Placeholder in repository URLs replaced by the configured username.
pub const USERNAME_TOKEN: &str = "REPO_USERNAME";

/// Trait for git operations - allows mocking in tests
pub trait GitOperations {
    /// Clones `url` into `target_dir`, checking out `revision` when given.
    fn clone_repo(&self, url: &str, revision: Option<&str>, target_dir: &Path, auth: &GitAuth) -> Result<()>;

    /// Checks out `revision` in an existing working copy.
    fn checkout(&self, repo_dir: &Path, revision: &str, location: &str, auth: &GitAuth) -> Result<()>;
}

/// The default implementation of `GitOperations`, which uses the system's
/// `git` command to perform real Git operations.
pub struct DefaultGitOperations;

impl GitOperations for DefaultGitOperations {
    fn clone_repo(&self, url: &str, revision: Option<&str>, target_dir: &Path, auth: &GitAuth) -> Result<()> {
        git::clone(url, revision, target_dir, auth)
    }

    fn checkout(&self, repo_dir: &Path, revision: &str, location: &str, auth: &GitAuth) -> Result<()> {
        git::checkout(repo_dir, revision, location, auth)
    }
}

/// A repository reference: where it lives and which revision to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub alias: String,
    pub location: String,
    pub revision: Option<String>,
}

impl RepositoryRef {
    /// Parses `location[@revision]`.
    pub fn parse(alias: &str, reference: &str) -> Self {
        let (location, revision) = split_revision(reference);
        Self {
            alias: alias.to_string(),
            location,
            revision,
        }
    }

    /// Parses an `alias=url[@revision]` override.
    pub fn parse_override(value: &str) -> Result<Self> {
        let invalid = || Error::InvalidRepositoryOverride {
            value: value.to_string(),
        };
        let (alias, reference) = value.split_once('=').ok_or_else(invalid)?;
        let (alias, reference) = (alias.trim(), reference.trim());
        if alias.is_empty() || reference.is_empty() {
            return Err(invalid());
        }
        Ok(Self::parse(alias, reference))
    }

    /// Replaces `REPO_USERNAME` in the location with `username`.
    fn with_username(mut self, username: Option<&str>) -> Self {
        if let Some(username) = username {
            if self.location.contains(USERNAME_TOKEN) {
                self.location = self.location.replace(USERNAME_TOKEN, username);
            } else {
                warn!(
                    "A repository username was specified but no {} placeholder was found in {}",
                    USERNAME_TOKEN, self.location
                );
            }
        }
        self
    }
}

/// Splits `location[@revision]` on the last `@` after the URL authority, so
/// that the `git@` of an SSH URL is never taken for a revision. A trailing `/`
/// is dropped first and `.git` is stripped from both halves.
pub fn split_revision(reference: &str) -> (String, Option<String>) {
    let trimmed = reference.trim_end_matches('/');
    let start = authority_end(trimmed);

    match trimmed[start..].rfind('@') {
        Some(offset) => {
            let at = start + offset;
            let revision = strip_git_suffix(&trimmed[at + 1..]);
            let location = strip_git_suffix(&trimmed[..at]);
            (location, Some(revision).filter(|r| !r.is_empty()))
        }
        None => (strip_git_suffix(trimmed), None),
    }
}

fn authority_end(reference: &str) -> usize {
    if let Some(scheme_end) = reference.find("://") {
        let rest = &reference[scheme_end + 3..];
        return scheme_end + 3 + rest.find('/').unwrap_or(rest.len());
    }
    // scp-like `user@host:path`
    match (reference.find(':'), reference.find('/')) {
        (Some(colon), Some(slash)) if colon < slash && reference[..colon].contains('@') => colon + 1,
        (Some(colon), None) if reference[..colon].contains('@') => colon + 1,
        _ => 0,
    }
}

fn strip_git_suffix(value: &str) -> String {
    value.strip_suffix(".git").unwrap_or(value).to_string()
}

fn is_local(location: &str) -> bool {
    Path::new(location).exists()
}

/// A repository checked out locally for the duration of one command.
#[derive(Debug)]
pub struct MaterializedRepo {
    pub alias: String,
    /// Location as given, before copying or cloning.
    pub location: String,
    pub revision: Option<String>,
    root: PathBuf,
    _temp: Option<TempDir>,
}

impl MaterializedRepo {
    /// Effective root for document lookups (Git root plus any sub-path).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Short repository name, used to group collected documents.
    ///
    /// Relative locations such as `./` are named after the directory they
    /// point at.
    pub fn name(&self) -> String {
        let name = git::repo_name(&self.location);
        if !matches!(name.as_str(), "" | "." | "..") {
            return name;
        }
        Path::new(&self.location)
            .canonicalize()
            .ok()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| self.alias.clone())
    }

    /// Wraps a directory that is used in place, without copying or Git.
    pub fn in_place(alias: &str, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            alias: alias.to_string(),
            location: root.display().to_string(),
            revision: None,
            root,
            _temp: None,
        }
    }
}

/// The primary repository and every auxiliary repository of a site.
#[derive(Debug)]
pub struct Workspace {
    pub site: MaterializedRepo,
    pub extras: Vec<MaterializedRepo>,
}

impl Workspace {
    pub fn site_root(&self) -> &Path {
        self.site.root()
    }

    /// All repositories, primary first.
    pub fn repositories(&self) -> impl Iterator<Item = &MaterializedRepo> {
        std::iter::once(&self.site).chain(self.extras.iter())
    }

    pub fn roots(&self) -> Vec<&Path> {
        self.repositories().map(MaterializedRepo::root).collect()
    }
}

/// Resolves repository references into a [`Workspace`].
pub struct RepositoryResolver<'a> {
    config: &'a ConfigContext,
    git_ops: Box<dyn GitOperations>,
}

impl<'a> RepositoryResolver<'a> {
    pub fn new(config: &'a ConfigContext) -> Self {
        Self {
            config,
            git_ops: Box::new(DefaultGitOperations),
        }
    }

    /// Creates a resolver with a custom `GitOperations` implementation.
    ///
    /// This is primarily used for testing to inject mock operations.
    #[cfg(test)]
    pub fn with_operations(config: &'a ConfigContext, git_ops: Box<dyn GitOperations>) -> Self {
        Self { config, git_ops }
    }

    fn auth(&self) -> GitAuth {
        GitAuth {
            ssh_key: self.config.repo_key.clone(),
            proxy_server: self.config.proxy_server.clone(),
        }
    }

    /// Materializes only the primary repository.
    pub fn resolve_site_repository(&self) -> Result<MaterializedRepo> {
        let reference = RepositoryRef::parse(SITE_ALIAS, &self.config.site_repository)
            .with_username(self.config.repo_username.as_deref());
        self.materialize(&reference)
    }

    /// Materializes the primary repository and every auxiliary repository
    /// that `site` needs.
    pub fn resolve(&self, site: &str) -> Result<Workspace> {
        let site_repo = self.resolve_site_repository()?;
        let definition = definition::load(site_repo.root(), site)?;

        let mut selected: BTreeMap<String, RepositoryRef> = BTreeMap::new();
        for (alias, entry) in &definition.repositories {
            if alias == SITE_ALIAS {
                warn!(
                    "The primary site repository path must be specified via the -r flag. \
                     Ignoring the provided site-definition entry: {}",
                    entry.url
                );
                continue;
            }
            selected.insert(
                alias.clone(),
                RepositoryRef {
                    alias: alias.clone(),
                    location: entry.url.clone(),
                    revision: Some(entry.revision.clone()),
                },
            );
        }

        for value in &self.config.extra_repositories {
            let reference = RepositoryRef::parse_override(value)?;
            if reference.alias == SITE_ALIAS {
                warn!(
                    "The primary site repository path must be specified via the -r flag. \
                     Ignoring the provided -e override: {}",
                    value
                );
                continue;
            }
            if !definition.repositories.contains_key(&reference.alias) {
                debug!(
                    "Repository alias {} is not declared by site {}; using the override anyway",
                    reference.alias, site
                );
            }
            selected.insert(reference.alias.clone(), reference);
        }

        let mut extras = Vec::with_capacity(selected.len());
        for reference in selected.into_values() {
            let reference = reference.with_username(self.config.repo_username.as_deref());
            extras.push(self.materialize(&reference)?);
        }

        Ok(Workspace {
            site: site_repo,
            extras,
        })
    }

    fn materialize(&self, reference: &RepositoryRef) -> Result<MaterializedRepo> {
        info!(
            "Processing repository {} from {}{}",
            reference.alias,
            reference.location,
            reference
                .revision
                .as_deref()
                .map(|r| format!(" at revision {}", r))
                .unwrap_or_default()
        );

        let result = if is_local(&reference.location) {
            self.materialize_local(reference)
        } else {
            self.materialize_remote(reference)
        };
        result.map_err(|e| Error::repository(&reference.location, e))
    }

    fn materialize_local(&self, reference: &RepositoryRef) -> Result<MaterializedRepo> {
        let (git_root, sub_path) = git::normalize_repo_path(Path::new(&reference.location))?;
        let temp = TempDir::new()?;
        let copy_root = temp.path().join(git::repo_name(&git_root.display().to_string()));
        copy_tree(&git_root, &copy_root)?;
        debug!(
            "Copied {} to {} for checkout",
            git_root.display(),
            copy_root.display()
        );

        if let Some(revision) = &reference.revision {
            self.git_ops
                .checkout(&copy_root, revision, &reference.location, &self.auth())?;
        }

        Ok(MaterializedRepo {
            alias: reference.alias.clone(),
            location: reference.location.clone(),
            revision: reference.revision.clone(),
            root: copy_root.join(sub_path),
            _temp: Some(temp),
        })
    }

    fn materialize_remote(&self, reference: &RepositoryRef) -> Result<MaterializedRepo> {
        let name = git::repo_name(&reference.location);
        let auth = self.auth();

        let (target, temp) = match &self.config.clone_path {
            Some(clone_path) => (clone_path.join(&name), None),
            None => {
                let temp = TempDir::new()?;
                (temp.path().join(&name), Some(temp))
            }
        };

        if git::is_repository(&target) {
            debug!("Reusing existing clone at {}", target.display());
            if let Some(revision) = &reference.revision {
                self.git_ops
                    .checkout(&target, revision, &reference.location, &auth)?;
            }
        } else {
            self.git_ops
                .clone_repo(&reference.location, reference.revision.as_deref(), &target, &auth)?;
        }

        Ok(MaterializedRepo {
            alias: reference.alias.clone(),
            location: reference.location.clone(),
            revision: reference.revision.clone(),
            root: target,
            _temp: temp,
        })
    }
}

/// Recursively copies `src` to `dst`, recreating symlinks instead of
/// following them.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            copy_symlink(&link, &target)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let resolved = target.parent().map(|p| p.join(link)).unwrap_or_else(|| link.to_path_buf());
    if resolved.is_file() {
        fs::copy(resolved, target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<(String, String, Option<String>)>>>;

    /// Mock git operations for testing
    struct MockGitOperations {
        calls: Calls,
        should_fail: bool,
    }

    impl MockGitOperations {
        fn new() -> (Self, Calls) {
            let calls = Calls::default();
            (
                Self {
                    calls: calls.clone(),
                    should_fail: false,
                },
                calls,
            )
        }

        fn failing() -> Self {
            Self {
                calls: Calls::default(),
                should_fail: true,
            }
        }
    }

    impl GitOperations for MockGitOperations {
        fn clone_repo(&self, url: &str, revision: Option<&str>, target_dir: &Path, _auth: &GitAuth) -> Result<()> {
            self.calls.lock().unwrap().push((
                "clone".to_string(),
                url.to_string(),
                revision.map(str::to_string),
            ));
            if self.should_fail {
                return Err(Error::GitClone {
                    url: url.to_string(),
                    revision: revision.unwrap_or("HEAD").to_string(),
                    message: "Network error".to_string(),
                });
            }
            fs::create_dir_all(target_dir.join(".git"))?;
            Ok(())
        }

        fn checkout(&self, _repo_dir: &Path, revision: &str, location: &str, _auth: &GitAuth) -> Result<()> {
            self.calls.lock().unwrap().push((
                "checkout".to_string(),
                location.to_string(),
                Some(revision.to_string()),
            ));
            Ok(())
        }
    }

    fn site_repo(repositories: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();
        let site_dir = temp.path().join("site/demo");
        fs::create_dir_all(&site_dir).unwrap();
        fs::write(
            site_dir.join("site-definition.yaml"),
            format!(
                "schema: pegleg/SiteDefinition/v1\nmetadata: {{schema: metadata/Document/v1, name: demo}}\ndata:\n  site_type: foundry\n{}",
                repositories
            ),
        )
        .unwrap();
        temp
    }

    #[test]
    fn test_split_revision() {
        assert_eq!(
            split_revision("https://opendev.org/airship/treasuremap.git@v1.0"),
            ("https://opendev.org/airship/treasuremap".to_string(), Some("v1.0".to_string()))
        );
        assert_eq!(
            split_revision("ssh://git@example.com:29418/global"),
            ("ssh://git@example.com:29418/global".to_string(), None)
        );
        assert_eq!(
            split_revision("ssh://git@example.com:29418/global@refs/changes/12/3/4"),
            (
                "ssh://git@example.com:29418/global".to_string(),
                Some("refs/changes/12/3/4".to_string())
            )
        );
        assert_eq!(
            split_revision("/opt/site-repo/@master"),
            ("/opt/site-repo/".to_string(), Some("master".to_string()))
        );
        assert_eq!(
            split_revision("/opt/site-repo/"),
            ("/opt/site-repo".to_string(), None)
        );
        assert_eq!(
            split_revision("git@github.com:org/repo.git"),
            ("git@github.com:org/repo".to_string(), None)
        );
    }

    #[test]
    fn test_parse_override() {
        let reference = RepositoryRef::parse_override("global=https://example.com/global@v2").unwrap();
        assert_eq!(reference.alias, "global");
        assert_eq!(reference.location, "https://example.com/global");
        assert_eq!(reference.revision.as_deref(), Some("v2"));
    }

    #[test]
    fn test_parse_override_malformed() {
        for value in ["https://example.com/global", "=https://x", "global="] {
            let err = RepositoryRef::parse_override(value).unwrap_err();
            assert!(matches!(err, Error::InvalidRepositoryOverride { .. }), "{}", value);
        }
    }

    #[test]
    fn test_username_substitution() {
        let reference = RepositoryRef::parse("global", "ssh://REPO_USERNAME@example.com/global")
            .with_username(Some("deployer"));
        assert_eq!(reference.location, "ssh://deployer@example.com/global");
    }

    #[test]
    fn test_username_without_token_warns() {
        testing_logger::setup();
        let reference = RepositoryRef::parse("global", "https://example.com/global")
            .with_username(Some("deployer"));
        assert_eq!(reference.location, "https://example.com/global");
        testing_logger::validate(|logs| {
            assert!(logs
                .iter()
                .any(|l| l.level == log::Level::Warn && l.body.contains(USERNAME_TOKEN)));
        });
    }

    #[test]
    fn test_override_precedence_over_site_definition() {
        let repo = site_repo(
            "  repositories:\n    global:\n      url: https://example.com/a\n      revision: v1\n",
        );
        let config = ConfigContext::new(repo.path().display().to_string())
            .with_extra_repositories(vec!["global=https://example.com/b@v2".to_string()]);
        let (git_ops, calls) = MockGitOperations::new();
        let resolver = RepositoryResolver::with_operations(&config, Box::new(git_ops));

        let workspace = resolver.resolve("demo").unwrap();
        assert_eq!(workspace.extras.len(), 1);
        assert_eq!(workspace.extras[0].location, "https://example.com/b");
        assert_eq!(workspace.extras[0].revision.as_deref(), Some("v2"));

        let calls = calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[(
                "clone".to_string(),
                "https://example.com/b".to_string(),
                Some("v2".to_string())
            )]
        );
    }

    #[test]
    fn test_declared_repositories_used_without_overrides() {
        let repo = site_repo(
            "  repositories:\n    global:\n      url: https://example.com/a\n      revision: v1\n",
        );
        let config = ConfigContext::new(repo.path().display().to_string());
        let (git_ops, calls) = MockGitOperations::new();
        let resolver = RepositoryResolver::with_operations(&config, Box::new(git_ops));

        let workspace = resolver.resolve("demo").unwrap();
        assert_eq!(workspace.extras[0].alias, "global");
        assert_eq!(calls.lock().unwrap()[0].2.as_deref(), Some("v1"));
        assert!(workspace.extras[0].root().ends_with("a"));
    }

    #[test]
    fn test_site_override_is_ignored() {
        testing_logger::setup();
        let repo = site_repo("");
        let config = ConfigContext::new(repo.path().display().to_string())
            .with_extra_repositories(vec!["site=https://example.com/other".to_string()]);
        let (git_ops, calls) = MockGitOperations::new();
        let resolver = RepositoryResolver::with_operations(&config, Box::new(git_ops));

        let workspace = resolver.resolve("demo").unwrap();
        assert!(workspace.extras.is_empty());
        assert!(calls.lock().unwrap().is_empty());
        testing_logger::validate(|logs| {
            assert!(logs
                .iter()
                .any(|l| l.level == log::Level::Warn && l.body.contains("-e override")));
        });
    }

    #[test]
    fn test_undeclared_override_is_honored() {
        let repo = site_repo("");
        let config = ConfigContext::new(repo.path().display().to_string())
            .with_extra_repositories(vec!["secrets=https://example.com/secrets@main".to_string()]);
        let (git_ops, _calls) = MockGitOperations::new();
        let resolver = RepositoryResolver::with_operations(&config, Box::new(git_ops));

        let workspace = resolver.resolve("demo").unwrap();
        assert_eq!(workspace.extras.len(), 1);
        assert_eq!(workspace.extras[0].alias, "secrets");
    }

    #[test]
    fn test_local_repository_is_copied_not_mutated() {
        let repo = site_repo("");
        let config = ConfigContext::new(format!("{}@feature", repo.path().display()));
        let (git_ops, calls) = MockGitOperations::new();
        let resolver = RepositoryResolver::with_operations(&config, Box::new(git_ops));

        let site = resolver.resolve_site_repository().unwrap();
        assert_ne!(site.root(), repo.path());
        assert!(site.root().join("site/demo/site-definition.yaml").is_file());
        assert_eq!(calls.lock().unwrap()[0].0, "checkout");

        let copy = site.root().to_path_buf();
        drop(site);
        assert!(!copy.exists());
    }

    #[test]
    fn test_local_sub_directory_keeps_sub_path() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();
        fs::create_dir_all(temp.path().join("deployment_files/site")).unwrap();
        let config = ConfigContext::new(temp.path().join("deployment_files").display().to_string());
        let (git_ops, _calls) = MockGitOperations::new();
        let resolver = RepositoryResolver::with_operations(&config, Box::new(git_ops));

        let site = resolver.resolve_site_repository().unwrap();
        assert!(site.root().ends_with("deployment_files"));
        assert!(site.root().join("site").is_dir());
    }

    #[test]
    fn test_repository_name() {
        let temp = TempDir::new().unwrap();
        let named = MaterializedRepo::in_place("global", temp.path().join("global-manifests"));
        assert_eq!(named.name(), "global-manifests");

        let mut relative = MaterializedRepo::in_place("site", temp.path());
        relative.location = ".".to_string();
        let cwd_name = std::env::current_dir()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert_eq!(relative.name(), cwd_name);
    }

    #[test]
    fn test_local_path_not_a_repository() {
        let temp = TempDir::new().unwrap();
        let config = ConfigContext::new(temp.path().display().to_string());
        let (git_ops, _calls) = MockGitOperations::new();
        let resolver = RepositoryResolver::with_operations(&config, Box::new(git_ops));

        let err = resolver.resolve_site_repository().unwrap_err();
        assert!(matches!(err, Error::NotARepository { .. }));
    }

    #[test]
    fn test_clone_error_is_wrapped() {
        let config = ConfigContext::new("https://example.com/site@v1");
        let resolver = RepositoryResolver::with_operations(&config, Box::new(MockGitOperations::failing()));

        let err = resolver.resolve_site_repository().unwrap_err();
        assert!(matches!(err, Error::Repository { .. }));
        assert!(err.to_string().contains("Network error"));
    }

    #[test]
    fn test_clone_path_reuses_existing_clone() {
        let clone_root = TempDir::new().unwrap();
        fs::create_dir_all(clone_root.path().join("site-repo/.git")).unwrap();
        let config = ConfigContext::new("https://example.com/site-repo.git@v3")
            .with_clone_path(Some(clone_root.path().to_path_buf()));
        let (git_ops, calls) = MockGitOperations::new();
        let resolver = RepositoryResolver::with_operations(&config, Box::new(git_ops));

        let site = resolver.resolve_site_repository().unwrap();
        assert_eq!(site.root(), clone_root.path().join("site-repo"));
        assert_eq!(calls.lock().unwrap()[0].0, "checkout");

        drop(site);
        assert!(clone_root.path().join("site-repo").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_preserves_symlinks() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("real.yaml"), "a: 1\n").unwrap();
        std::os::unix::fs::symlink("real.yaml", src.path().join("link.yaml")).unwrap();
        let dst = TempDir::new().unwrap();
        let target = dst.path().join("copy");

        copy_tree(src.path(), &target).unwrap();
        let meta = fs::symlink_metadata(target.join("link.yaml")).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(target.join("link.yaml")).unwrap(), PathBuf::from("real.yaml"));
    }
}
