//! Integration tests for the dropkeep binary.
//!
//! These run the real executable with an in-memory store, so nothing here
//! touches the network or the developer's configuration.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn dropkeep(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dropkeep"));
    cmd.arg("--config")
        .arg(dir.join("dropkeep.toml"))
        .arg("--ephemeral")
        .env("DROPKEEP_CLIENT_ID", "app-key")
        .env("DROPKEEP_CLIENT_SECRET", "app-secret")
        .env_remove("DROPKEEP_ACCESS_CODE")
        .env_remove("RUST_LOG");
    cmd
}

fn run(cmd: &mut Command) -> (Output, String, String) {
    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    (output, stdout, stderr)
}

#[test]
fn test_authorize_url_requests_offline_access() {
    let temp = TempDir::new().unwrap();
    let (output, stdout, _) = run(dropkeep(temp.path()).arg("authorize-url"));

    assert!(output.status.success());
    assert!(stdout.contains("https://www.dropbox.com/oauth2/authorize"));
    assert!(stdout.contains("client_id=app-key"));
    assert!(stdout.contains("token_access_type=offline"));
    assert!(!stdout.contains("app-secret"));
}

#[test]
fn test_status_without_token() {
    let temp = TempDir::new().unwrap();
    let (output, stdout, _) = run(dropkeep(temp.path()).arg("status"));

    assert!(output.status.success());
    assert!(stdout.contains("No token stored"));
}

#[test]
fn test_token_without_access_code_fails() {
    let temp = TempDir::new().unwrap();
    let (output, _, stderr) = run(dropkeep(temp.path()).arg("token"));

    assert!(!output.status.success());
    assert!(stderr.contains("no access code configured"));
}

#[test]
fn test_check_reports_diagnostic() {
    let temp = TempDir::new().unwrap();
    let (output, _, stderr) = run(dropkeep(temp.path()).arg("check"));

    assert!(!output.status.success());
    assert!(stderr.contains("The Dropbox client failed with:"));
}

#[test]
fn test_missing_client_id_is_reported() {
    let temp = TempDir::new().unwrap();
    let (output, _, stderr) = run(dropkeep(temp.path())
        .env_remove("DROPKEEP_CLIENT_ID")
        .arg("status"));

    assert!(!output.status.success());
    assert!(stderr.contains("client ID"));
}
