//! Integration tests for `trialdb init` and global options.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn trialdb(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("trialdb").unwrap();
    cmd.current_dir(temp_dir.path()).env_remove("TRIALDB_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_init_creates_database() {
    let temp_dir = TempDir::new().unwrap();

    trialdb(&temp_dir)
        .arg("--database")
        .arg("ledger.sqlite3")
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized ledger"));

    assert!(temp_dir.path().join("ledger.sqlite3").exists());
}

#[test]
fn test_init_uses_default_path() {
    let temp_dir = TempDir::new().unwrap();
    trialdb(&temp_dir).arg("init").assert().success();
    assert!(temp_dir.path().join("trialdb.sqlite3").exists());
}

#[test]
fn test_init_write_config_round_trips() {
    let temp_dir = TempDir::new().unwrap();

    trialdb(&temp_dir)
        .args(["--database", "custom.sqlite3", "init", "--write-config"])
        .assert()
        .success();
    let written = std::fs::read_to_string(temp_dir.path().join("trialdb.toml")).unwrap();
    assert!(written.contains("custom.sqlite3"));

    // The local config is now discovered without --database
    trialdb(&temp_dir).args(["trial", "add", "1"]).assert().success();
    trialdb(&temp_dir)
        .args(["--database", "custom.sqlite3", "trial", "show", "1"])
        .assert()
        .success();

    trialdb(&temp_dir)
        .args(["init", "--write-config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_explicit_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("ledger.toml");
    std::fs::write(&config_path, "[database]\npath = \"from-config.sqlite3\"\n").unwrap();

    trialdb(&temp_dir).arg("--config").arg(&config_path).arg("init").assert().success();
    assert!(temp_dir.path().join("from-config.sqlite3").exists());
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    trialdb(&temp_dir)
        .args(["--config", "absent.toml", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_help_lists_commands() {
    let temp_dir = TempDir::new().unwrap();
    trialdb(&temp_dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("checkpoint"))
        .stdout(predicate::str::contains("validation"));
}
