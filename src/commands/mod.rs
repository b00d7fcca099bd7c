//! # CLI Command Implementations
//!
//! Each subcommand group lives in its own file with an `Args` struct derived
//! with `clap` and an `execute` function that calls into the `pegleg`
//! library.
//!
//! Commands that work on a site share [`RepoArgs`], which becomes the
//! immutable [`ConfigContext`] handed to the repository resolver.

pub mod generate;
pub mod secrets;
pub mod site;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;

use pegleg::config::ConfigContext;
use pegleg::files::SiteCatalog;
use pegleg::repository::{split_revision, RepositoryResolver, Workspace};

/// Repository selection shared by every site command.
#[derive(Args, Debug, Clone)]
pub struct RepoArgs {
    /// Site repository: a local path or Git URL, optionally suffixed with @revision
    #[arg(short = 'r', long = "site-repository", value_name = "REPO", env = "PEGLEG_SITE_REPOSITORY", default_value = "./")]
    pub site_repository: String,

    /// Override an auxiliary repository: alias=url[@revision]
    #[arg(short = 'e', long = "extra-repository", value_name = "ALIAS=REPO")]
    pub extra_repositories: Vec<String>,

    /// SSH key used to clone repositories over ssh
    #[arg(short = 'k', long = "repo-key", value_name = "FILE", env = "PEGLEG_REPO_KEY")]
    pub repo_key: Option<PathBuf>,

    /// Substituted for REPO_USERNAME in repository URLs
    #[arg(short = 'u', long = "repo-username", value_name = "USER", env = "PEGLEG_REPO_USERNAME")]
    pub repo_username: Option<String>,

    /// Keep clones under this directory instead of temporary directories
    #[arg(long, value_name = "DIR", env = "PEGLEG_CLONE_PATH")]
    pub clone_path: Option<PathBuf>,

    /// Decrypt managed secrets in collected output
    #[arg(long)]
    pub decrypt_repos: bool,

    /// HTTP proxy used when cloning
    #[arg(long, value_name = "URL")]
    pub proxy_server: Option<String>,
}

impl RepoArgs {
    pub fn config(&self) -> Result<ConfigContext> {
        let config = ConfigContext::new(self.site_repository.clone())
            .with_extra_repositories(self.extra_repositories.clone())
            .with_repo_key(self.repo_key.clone())
            .with_repo_username(self.repo_username.clone())
            .with_clone_path(self.clone_path.clone())
            .with_decrypt_repos(self.decrypt_repos)
            .with_proxy_server(self.proxy_server.clone());
        config.validate()?;
        Ok(config)
    }
}

/// Materializes the site repository and every repository the site uses.
pub fn resolve(config: &ConfigContext, site: &str) -> Result<Workspace> {
    Ok(RepositoryResolver::new(config).resolve(site)?)
}

/// Convenience for commands that only read a site's documents.
pub fn with_catalog<T>(repo: &RepoArgs, site: &str, f: impl FnOnce(&SiteCatalog) -> Result<T>) -> Result<T> {
    let config = repo.config()?;
    let workspace = resolve(&config, site)?;
    let catalog = SiteCatalog::new(&workspace, site)?;
    f(&catalog)
}

/// Where generated or encrypted files go when `--save-location` is absent:
/// the local site repository itself. Remote site repositories need an
/// explicit location.
pub fn default_save_location(config: &ConfigContext, save_location: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(save_location) = save_location {
        return Ok(save_location);
    }
    let (location, _) = split_revision(&config.site_repository);
    let path = PathBuf::from(&location);
    if !path.is_dir() {
        bail!(
            "--save-location is required when the site repository is not a local directory ({})",
            location
        );
    }
    Ok(path)
}
