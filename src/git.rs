//! Git operations backed by the system `git` command
//!
//! Using the system binary means SSH agents, credential helpers and
//! `~/.gitconfig` settings all apply. An explicit SSH key is passed through
//! `GIT_SSH_COMMAND`, and terminal prompts are always disabled so a missing
//! credential fails instead of hanging.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};

use crate::error::{Error, Result};

/// Schemes accepted for remote repositories.
const CLONE_SCHEMES: [&str; 3] = ["http", "https", "ssh"];

/// Identity used for the synthetic commit of uncommitted changes.
const SYNTHETIC_COMMIT_AUTHOR: [&str; 4] = [
    "-c",
    "user.name=pegleg",
    "-c",
    "user.email=pegleg@localhost",
];

/// Authentication and network settings for clone and fetch.
#[derive(Debug, Clone, Default)]
pub struct GitAuth {
    pub ssh_key: Option<PathBuf>,
    pub proxy_server: Option<String>,
}

impl GitAuth {
    /// Environment for git child processes.
    ///
    /// Fails when an SSH key is configured but missing on disk.
    pub fn env_vars(&self) -> Result<Vec<(String, String)>> {
        let mut vars = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];
        if let Some(key) = &self.ssh_key {
            if !key.exists() {
                log::error!("The auth_key path '{}' was not found", key.display());
                return Err(Error::GitSshKeyMissing {
                    path: key.display().to_string(),
                });
            }
            vars.push(("GIT_SSH_COMMAND".to_string(), self.ssh_command(key)));
        }
        Ok(vars)
    }

    fn ssh_command(&self, key: &Path) -> String {
        format!(
            "ssh -i {} -o ConnectionAttempts=20 -o ConnectTimeout=10 -o StrictHostKeyChecking=no",
            key.display()
        )
    }
}

/// Runs `git <args>` in `dir`, returning trimmed stdout.
fn run_git(dir: &Path, args: &[&str], env: &[(String, String)], location: &str) -> Result<String> {
    debug!("git {} (in {})", args.join(" "), dir.display());
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .output()
        .map_err(|e| Error::GitCommand {
            command: args.join(" "),
            location: location.to_string(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::GitCommand {
            command: args.join(" "),
            location: location.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Whether `path` is the root of a Git working tree.
pub fn is_repository(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Finds the Git root above `path`.
///
/// Returns `(git_root, sub_path)` where `sub_path` is `path` relative to the
/// root (empty when `path` is the root itself).
pub fn normalize_repo_path(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let original = path.canonicalize().map_err(|_| Error::NotARepository {
        path: path.display().to_string(),
    })?;

    let mut candidate = original.as_path();
    loop {
        if is_repository(candidate) {
            let sub_path = original
                .strip_prefix(candidate)
                .map(Path::to_path_buf)
                .unwrap_or_default();
            return Ok((candidate.to_path_buf(), sub_path));
        }
        candidate = match candidate.parent() {
            Some(parent) => parent,
            None => {
                return Err(Error::NotARepository {
                    path: path.display().to_string(),
                })
            }
        };
    }
}

/// Short name of a repository: the last path component without `.git`.
pub fn repo_name(url_or_path: &str) -> String {
    let trimmed = url_or_path.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

/// Clones `url` into `target_dir` and checks out `revision` when given.
pub fn clone(url: &str, revision: Option<&str>, target_dir: &Path, auth: &GitAuth) -> Result<()> {
    let parsed = url::Url::parse(url).map_err(|_| Error::UnsupportedScheme {
        url: url.to_string(),
    })?;
    if !CLONE_SCHEMES.contains(&parsed.scheme()) {
        return Err(Error::UnsupportedScheme {
            url: url.to_string(),
        });
    }

    let env = auth.env_vars()?;

    if let Some(parent) = target_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!("Cloning {} into {}", url, target_dir.display());
    let mut command = Command::new("git");
    if let Some(proxy) = &auth.proxy_server {
        command.args(["-c", &format!("http.proxy={}", proxy)]);
    }
    let output = command
        .args(["clone", url])
        .arg(target_dir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .output()
        .map_err(|e| Error::GitClone {
            url: url.to_string(),
            revision: revision.unwrap_or("HEAD").to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        log::error!("Failed to clone repo_url={} using ref={:?}", url, revision);
        return Err(classify_clone_failure(url, revision, &stderr, auth));
    }

    if let Some(revision) = revision {
        checkout(target_dir, revision, url, auth)?;
    }
    Ok(())
}

/// Maps `git clone` stderr to the matching error kind.
fn classify_clone_failure(url: &str, revision: Option<&str>, stderr: &str, auth: &GitAuth) -> Error {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied")
        || lower.contains("authentication failed")
        || (auth.ssh_key.is_some() && lower.contains("could not read from remote repository"))
    {
        Error::GitAuth {
            url: url.to_string(),
            ssh_key: auth.ssh_key.as_ref().map(|k| k.display().to_string()),
        }
    } else if lower.contains("could not resolve proxy") {
        Error::GitProxy {
            url: url.to_string(),
            proxy: auth.proxy_server.clone(),
        }
    } else {
        Error::GitClone {
            url: url.to_string(),
            revision: revision.unwrap_or("HEAD").to_string(),
            message: stderr.trim().to_string(),
        }
    }
}

/// Checks out `revision` in an existing working copy.
///
/// Uncommitted or untracked changes are first committed to a synthetic local
/// commit. A revision already known locally is checked out without touching
/// the network; otherwise it is fetched from `origin` and local branches named
/// after both the revision and the fetched commit SHA are created, so a later
/// checkout of either form resolves offline.
pub fn checkout(repo_dir: &Path, revision: &str, location: &str, auth: &GitAuth) -> Result<()> {
    commit_local_changes(repo_dir, location)?;

    if let Some(commit) = resolve_local(repo_dir, revision, location) {
        let head = run_git(repo_dir, &["rev-parse", "HEAD"], &[], location).ok();
        if head.as_deref() == Some(commit.as_str()) {
            debug!("{} is already at revision {}", location, revision);
            return Ok(());
        }
        debug!("Checking out local revision {} in {}", revision, location);
        run_git(repo_dir, &["checkout", "-q", revision], &[], location)?;
        return Ok(());
    }

    debug!("Fetching ref={} from remote repo_url={}", revision, location);
    let env = auth.env_vars()?;
    run_git(repo_dir, &["fetch", "-q", "origin", revision], &env, location)?;
    let sha = run_git(repo_dir, &["rev-parse", "FETCH_HEAD"], &[], location)?;

    if sha != revision {
        run_git(repo_dir, &["branch", "-f", &sha, "FETCH_HEAD"], &[], location)?;
    }
    run_git(repo_dir, &["checkout", "-q", "-B", revision, "FETCH_HEAD"], &[], location)?;
    Ok(())
}

/// Resolves `revision` to a commit using only local refs.
fn resolve_local(repo_dir: &Path, revision: &str, location: &str) -> Option<String> {
    let spec = format!("{}^{{commit}}", revision);
    run_git(repo_dir, &["rev-parse", "--verify", "--quiet", &spec], &[], location).ok()
}

/// Commits any uncommitted or untracked changes so refs can be switched.
fn commit_local_changes(repo_dir: &Path, location: &str) -> Result<()> {
    let status = run_git(repo_dir, &["status", "--porcelain"], &[], location)?;
    if status.is_empty() {
        return Ok(());
    }

    info!("Committing local changes in {} before checkout", location);
    run_git(repo_dir, &["add", "--all"], &[], location)?;
    let mut args: Vec<&str> = SYNTHETIC_COMMIT_AUTHOR.to_vec();
    args.extend(["commit", "-q", "--no-verify", "-m", "Temporary pegleg commit"]);
    run_git(repo_dir, &args, &[], location)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_repo_name() {
        assert_eq!(repo_name("https://opendev.org/airship/treasuremap.git"), "treasuremap");
        assert_eq!(repo_name("https://opendev.org/airship/treasuremap"), "treasuremap");
        assert_eq!(repo_name("/opt/repos/site-manifests/"), "site-manifests");
        assert_eq!(repo_name("ssh://git@example.com:29418/airship/global"), "global");
    }

    #[test]
    fn test_normalize_repo_path_root() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();

        let (root, sub) = normalize_repo_path(temp.path()).unwrap();
        assert_eq!(root, temp.path().canonicalize().unwrap());
        assert_eq!(sub, PathBuf::new());
    }

    #[test]
    fn test_normalize_repo_path_sub_directory() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();
        fs::create_dir_all(temp.path().join("deployment_files/site")).unwrap();

        let (root, sub) = normalize_repo_path(&temp.path().join("deployment_files")).unwrap();
        assert_eq!(root, temp.path().canonicalize().unwrap());
        assert_eq!(sub, PathBuf::from("deployment_files"));
    }

    #[test]
    fn test_normalize_repo_path_missing() {
        let err = normalize_repo_path(Path::new("/nonexistent/pegleg/repo")).unwrap_err();
        assert!(matches!(err, Error::NotARepository { .. }));
    }

    #[test]
    fn test_clone_rejects_unsupported_scheme() {
        let temp = TempDir::new().unwrap();
        let err = clone(
            "ftp://example.com/repo.git",
            None,
            &temp.path().join("repo"),
            &GitAuth::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme { .. }));
    }

    #[test]
    fn test_env_vars_missing_ssh_key() {
        let auth = GitAuth {
            ssh_key: Some(PathBuf::from("/nonexistent/id_rsa")),
            proxy_server: None,
        };
        let err = auth.env_vars().unwrap_err();
        assert!(matches!(err, Error::GitSshKeyMissing { .. }));
    }

    #[test]
    fn test_env_vars_with_ssh_key() {
        let temp = TempDir::new().unwrap();
        let key = temp.path().join("id_rsa");
        fs::write(&key, "key").unwrap();
        let auth = GitAuth {
            ssh_key: Some(key.clone()),
            proxy_server: None,
        };
        let vars = auth.env_vars().unwrap();
        assert!(vars.contains(&("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())));
        let ssh = vars.iter().find(|(k, _)| k == "GIT_SSH_COMMAND").unwrap();
        assert!(ssh.1.contains(&key.display().to_string()));
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .current_dir(dir)
            .args(["-c", "user.name=tester", "-c", "user.email=tester@example.com"])
            .args(args)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&output.stderr));
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn commit_file(dir: &Path, name: &str, message: &str) {
        fs::write(dir.join(name), message).unwrap();
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-q", "-m", message]);
    }

    /// An origin with two commits on `main` and a change ref whose commit is
    /// not reachable from any branch. Returns the change's commit SHA.
    fn origin_with_change_ref(origin: &Path) -> String {
        git(origin, &["init", "-q"]);
        git(origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        commit_file(origin, "a.txt", "one");
        commit_file(origin, "a.txt", "two");
        git(origin, &["checkout", "-q", "-b", "review"]);
        commit_file(origin, "b.txt", "change");
        git(origin, &["update-ref", "refs/changes/12/34/5", "HEAD"]);
        let sha = git(origin, &["rev-parse", "HEAD"]);
        git(origin, &["checkout", "-q", "main"]);
        git(origin, &["branch", "-q", "-D", "review"]);
        sha
    }

    #[test]
    fn test_checkout_fetches_change_ref_and_keeps_local_changes() {
        let temp = TempDir::new().unwrap();
        let origin = temp.path().join("origin");
        let work = temp.path().join("work");
        fs::create_dir(&origin).unwrap();
        let change_sha = origin_with_change_ref(&origin);
        git(
            temp.path(),
            &["clone", "-q", &format!("file://{}", origin.display()), "work"],
        );

        fs::write(work.join("a.txt"), "edited").unwrap();
        fs::write(work.join("untracked.txt"), "new").unwrap();

        let change_ref = "refs/changes/12/34/5";
        let auth = GitAuth::default();
        checkout(&work, change_ref, "origin", &auth).unwrap();

        assert_eq!(git(&work, &["rev-parse", "HEAD"]), change_sha);
        assert_eq!(
            git(&work, &["log", "--format=%s", "main"]).lines().collect::<Vec<_>>(),
            vec!["Temporary pegleg commit", "two", "one"]
        );
        assert_eq!(git(&work, &["status", "--porcelain"]), "");

        git(&work, &["remote", "remove", "origin"]);

        checkout(&work, "main", "work", &auth).unwrap();
        assert_eq!(fs::read_to_string(work.join("untracked.txt")).unwrap(), "new");

        checkout(&work, &change_sha, "work", &auth).unwrap();
        assert_eq!(git(&work, &["rev-parse", "HEAD"]), change_sha);

        checkout(&work, "main", "work", &auth).unwrap();
        checkout(&work, change_ref, "work", &auth).unwrap();
        assert_eq!(git(&work, &["rev-parse", "HEAD"]), change_sha);
    }

    #[test]
    fn test_checkout_clean_tree_adds_no_commit() {
        let temp = TempDir::new().unwrap();
        let origin = temp.path().join("origin");
        fs::create_dir(&origin).unwrap();
        origin_with_change_ref(&origin);
        let before = git(&origin, &["rev-parse", "HEAD"]);

        checkout(&origin, "main", "origin", &GitAuth::default()).unwrap();
        assert_eq!(git(&origin, &["rev-parse", "HEAD"]), before);
        assert_eq!(git(&origin, &["rev-list", "--count", "main"]), "2");
    }

    #[test]
    fn test_checkout_unknown_revision_without_origin_fails() {
        let temp = TempDir::new().unwrap();
        let origin = temp.path().join("origin");
        fs::create_dir(&origin).unwrap();
        origin_with_change_ref(&origin);

        let err = checkout(&origin, "no-such-tag", "origin", &GitAuth::default()).unwrap_err();
        assert!(matches!(err, Error::GitCommand { .. }));
    }

    #[test]
    fn test_classify_clone_failure() {
        let auth = GitAuth::default();
        let url = "https://example.com/repo";

        let err = classify_clone_failure(url, None, "fatal: Authentication failed for", &auth);
        assert!(matches!(err, Error::GitAuth { .. }));

        let err = classify_clone_failure(url, None, "fatal: Could not resolve proxy: squid", &auth);
        assert!(matches!(err, Error::GitProxy { .. }));

        let err = classify_clone_failure(url, Some("v1"), "fatal: repository not found", &auth);
        assert!(matches!(err, Error::GitClone { .. }));
    }
}
