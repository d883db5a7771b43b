//! CLI integration tests for mssql-table-sync.
//!
//! These cover argument parsing, help output, offline validation and exit
//! codes for configuration errors. Nothing here needs a database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the mssql-table-sync binary.
fn cmd() -> Command {
    Command::cargo_bin("mssql-table-sync").unwrap()
}

const VALID_JOB: &str = r#"
source:
  host: erp-db
  database: Erp
  user: reader
  password: hunter2
  schema: erp
destination:
  host: shop-db
  database: Shop
  user: writer
job:
  prune_missing: true
mappings:
  - source: { table: Orders }
    destination: { table: EcomOrders }
    columns:
      - { source: No, destination: OrderID, key: true }
      - { source: Name, destination: OrderCustomerName }
    conditions:
      - { column: Status, operator: equal_to, value: Open }
"#;

fn job_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
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
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mssql-table-sync"));
}

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
        .stdout(predicate::str::contains("[default: job.yaml]"));
}

#[test]
fn test_plan_command_exists() {
    cmd()
        .args(["plan", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("without writing"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    cmd()
        .args(["--config", "nonexistent_job_file.yaml", "validate"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let file = job_file("invalid: yaml: content: [\n");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = job_file("");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let file = job_file("source:\n  host: erp-db\n");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("YAML error"));
}

#[test]
fn test_job_without_mappings_exits_with_code_1() {
    let file = job_file(VALID_JOB.split("mappings:").next().unwrap());
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("at least one mapping"));
}

// =============================================================================
// Offline Validation
// =============================================================================

#[test]
fn test_validate_accepts_valid_job() {
    let file = job_file(VALID_JOB);
    cmd()
        .args(["-c", file.path().to_str().unwrap(), "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Mappings: 1"));
}

#[test]
fn test_validate_json_lists_warnings() {
    let job = VALID_JOB.replace("operator: equal_to", "operator: roughly");
    let file = job_file(&job);
    cmd()
        .args(["-c", file.path().to_str().unwrap(), "--output-json", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\":true"))
        .stdout(predicate::str::contains("treated as equal_to"));
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
