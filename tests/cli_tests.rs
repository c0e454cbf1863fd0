//! CLI tests for the `aidw` binary.
//!
//! Every test points `AIDW_HOME` at a fresh temp directory and strips
//! credentials from the environment so nothing touches the network.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn aidw(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("aidw");
    cmd.current_dir(home.path())
        .env("AIDW_HOME", home.path())
        .env_remove("AIDW_WEBHOOK_SECRET")
        .env_remove("GH_TOKEN")
        .env_remove("GITHUB_TOKEN")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("CLAUDE_CODE_OAUTH_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

// =============================================================================
// Basics
// =============================================================================

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("server"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("sessions"));
}

#[test]
fn test_version() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_help_lists_workflows() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("codereview"));
}

// =============================================================================
// Config
// =============================================================================

#[test]
fn test_config_writes_default_file() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created default config"))
        .stdout(predicate::str::contains("bot_name = \"aidw\""))
        .stdout(predicate::str::contains("GH_TOKEN"));

    let written = fs::read_to_string(home.path().join("config.yml")).unwrap();
    assert!(written.contains("bot_name"));

    // Second run keeps the existing file.
    aidw(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created default config").not());
}

#[test]
fn test_config_reads_overrides() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join("config.yml"),
        "github:\n  bot_name: helper\nauth:\n  allowed_users: [alice]\n",
    )
    .unwrap();

    aidw(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("bot_name = \"helper\""))
        .stdout(predicate::str::contains("alice"));
}

// =============================================================================
// Sessions
// =============================================================================

#[test]
fn test_status_unknown_session_fails() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .args(["status", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Session nope not found"));
}

#[test]
fn test_sessions_empty() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions found."));
}

#[test]
fn test_sessions_rejects_unknown_status() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .args(["sessions", "--status", "bogus"])
        .assert()
        .failure();
}

#[test]
fn test_cleanup_on_empty_store() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .args(["cleanup", "--days", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted 0 sessions older than 7 days."));
}

#[test]
fn test_logs_without_file() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .arg("logs")
        .assert()
        .success()
        .stdout(predicate::str::contains("No log file"));
}

#[test]
fn test_logs_tails_file() {
    let home = TempDir::new().unwrap();
    let lines: Vec<String> = (1..=5).map(|i| format!("line {}", i)).collect();
    fs::write(home.path().join("aidw.log"), lines.join("\n")).unwrap();

    aidw(&home)
        .args(["logs", "-n", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("line 4"))
        .stdout(predicate::str::contains("line 5"))
        .stdout(predicate::str::contains("line 3").not());
}

// =============================================================================
// Credentials
// =============================================================================

#[test]
fn test_run_requires_github_token() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .args(["run", "plan", "--repo", "acme/widgets", "--issue", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GH_TOKEN"));
}

#[test]
fn test_run_requires_agent_credentials() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .env("GH_TOKEN", "ghp_test")
        .args(["run", "build", "--repo", "acme/widgets", "--pr", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ANTHROPIC_API_KEY"));
}

#[test]
fn test_server_requires_credentials() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .args(["server", "--port", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("AIDW_WEBHOOK_SECRET"));
}

#[test]
fn test_webhook_requires_github_token() {
    let home = TempDir::new().unwrap();
    aidw(&home)
        .args(["webhook", "list", "--repo", "acme/widgets"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GH_TOKEN"));
}
