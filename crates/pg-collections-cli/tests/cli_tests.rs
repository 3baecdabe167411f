//! CLI integration tests for pg-collections.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for error conditions that need no database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;

/// Get a command for the pg-collections binary.
fn cmd() -> Command {
    Command::cargo_bin("pg-collections").unwrap()
}

/// Write a valid config whose migrations directory is `dir`.
fn config_for(dir: &Path) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "database:").unwrap();
    writeln!(file, "  host: localhost").unwrap();
    writeln!(file, "  database: app").unwrap();
    writeln!(file, "  user: app").unwrap();
    writeln!(file, "migrations:").unwrap();
    writeln!(file, "  dir: {:?}", dir.to_str().unwrap()).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pg-collections"));
}

#[test]
fn test_check_subcommand_help() {
    cmd()
        .args(["check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dir"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_and_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "migrate"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "status"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_ssl_mode_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "database:").unwrap();
    writeln!(file, "  host: localhost").unwrap();
    writeln!(file, "  database: app").unwrap();
    writeln!(file, "  user: app").unwrap();
    writeln!(file, "  ssl_mode: sometimes").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

// =============================================================================
// Check Command Tests (no database)
// =============================================================================

#[test]
fn test_check_lists_migrations_in_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("2024-02-01 08-00 add todos.sql"), "SELECT 1;").unwrap();
    std::fs::write(dir.path().join("2024-01-01 08-00 init.sql"), "SELECT 1;").unwrap();
    let config = config_for(dir.path());

    cmd()
        .args(["--config", config.path().to_str().unwrap(), "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 migrations"))
        .stdout(predicate::str::is_match("(?s)init.*add todos").unwrap());
}

#[test]
fn test_check_json_output() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("2024-01-01 08-00 init.sql"), "SELECT 1;").unwrap();
    let config = config_for(dir.path());

    cmd()
        .args(["--config", config.path().to_str().unwrap(), "--output-json", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"migrations\":[\"init\"]"));
}

#[test]
fn test_check_bad_filename_exits_with_code_3() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("init.sql"), "SELECT 1;").unwrap();
    let config = config_for(dir.path());

    cmd()
        .args(["--config", config.path().to_str().unwrap(), "check"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Incorrect migration filename: init.sql"));
}

#[test]
fn test_check_dir_override_missing_exits_with_code_7() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());

    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "check",
            "--dir",
            dir.path().join("missing").to_str().unwrap(),
        ])
        .assert()
        .code(7);
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
