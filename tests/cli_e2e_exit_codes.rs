//! End-to-end tests for CLI exit codes.
//!
//! - Exit code 0: Success
//! - Exit code 1: Any error raised while running a command
//! - Exit code 2: Invalid command-line usage (handled by clap)

#[allow(dead_code)]
mod common;
use common::prelude::*;

#[test]
fn test_exit_code_success() {
    let fixture = TestFixture::new().with_site_repository();

    fixture.command().args(["site", "list"]).assert().code(0);
}

#[test]
fn test_exit_code_help() {
    let mut cmd = cargo_bin_cmd!("pegleg");
    cmd.arg("--help").assert().code(0);
}

#[test]
fn test_exit_code_version() {
    let mut cmd = cargo_bin_cmd!("pegleg");
    cmd.arg("--version")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("pegleg"));
}

#[test]
fn test_exit_code_unknown_subcommand() {
    let mut cmd = cargo_bin_cmd!("pegleg");
    cmd.arg("frobnicate").assert().code(2);
}

#[test]
fn test_exit_code_missing_site_argument() {
    let mut cmd = cargo_bin_cmd!("pegleg");
    cmd.args(["site", "render"]).assert().code(2);
}

#[test]
fn test_exit_code_lint_errors() {
    let fixture = TestFixture::new()
        .with_site_repository()
        .with_file("site/demo/certs/apiserver.yaml", documents::MISPLACED_CERTIFICATE);

    fixture
        .command()
        .args(["site", "lint", "demo", "--no-render"])
        .assert()
        .code(1);
}

#[test]
fn test_exit_code_missing_secrets_environment() {
    let fixture = TestFixture::new().with_file("secret.yaml", documents::CLEARTEXT_SECRET);

    fixture
        .command()
        .args(["site", "secrets", "decrypt", "--path", "secret.yaml"])
        .assert()
        .code(1);
}

#[test]
fn test_exit_code_invalid_extra_repository() {
    let fixture = TestFixture::new().with_site_repository();

    fixture
        .command()
        .args(["site", "-e", "no-equals-sign", "show", "demo"])
        .assert()
        .code(1);
}
