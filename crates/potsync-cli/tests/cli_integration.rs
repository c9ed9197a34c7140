//! CLI Integration Tests
//!
//! Each command runs as a separate process against a shared temporary data
//! directory, so these also cover identity reload and record-log
//! persistence between invocations.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Create a CLI command with a temporary data directory
fn cli_cmd(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("potsync").expect("Failed to find potsync binary");
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

#[test]
fn test_info_command() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("Potsync"))
        .stdout(predicate::str::contains("Identity:"))
        .stdout(predicate::str::contains("Record log:"));
}

#[test]
fn test_pot_create_and_list() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["pot", "create", "tomato-1", "--name", "Balcony Tomato"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created plant pot"))
        .stdout(predicate::str::contains("tomato-1"));

    // Separate process: the pot must come back from the persisted log.
    cli_cmd(&data_dir)
        .args(["pot", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tomato-1"))
        .stdout(predicate::str::contains("Balcony Tomato"));
}

#[test]
fn test_pot_list_empty() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["pot", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No plant pots"));
}

#[test]
fn test_pot_show_unknown_fails() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["pot", "show", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_task_add_and_complete() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["pot", "create", "basil"])
        .assert()
        .success();

    cli_cmd(&data_dir)
        .args(["task", "add", "basil", "30"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued watering for 30s"))
        .stdout(predicate::str::contains("water for 30s"));

    cli_cmd(&data_dir)
        .args(["task", "complete", "basil"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed: water for 30s"))
        .stdout(predicate::str::contains("no queued tasks"));

    cli_cmd(&data_dir)
        .args(["log", "list", "basil"])
        .assert()
        .success()
        .stdout(predicate::str::contains("water for 30s"));
}

#[test]
fn test_task_add_rejects_zero_duration() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["pot", "create", "basil"])
        .assert()
        .success();

    cli_cmd(&data_dir)
        .args(["task", "add", "basil", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 1 second"));
}

#[test]
fn test_task_remove() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["pot", "create", "basil"])
        .assert()
        .success();
    cli_cmd(&data_dir)
        .args(["task", "add", "basil", "30"])
        .assert()
        .success();
    cli_cmd(&data_dir)
        .args(["task", "add", "basil", "5"])
        .assert()
        .success();

    cli_cmd(&data_dir)
        .args(["task", "remove", "basil", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("water for 5s"))
        .stdout(predicate::str::contains("water for 30s").not());
}

#[test]
fn test_pot_secret_exports_both_forms() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["pot", "create", "tomato-1"])
        .assert()
        .success();

    cli_cmd(&data_dir)
        .args(["pot", "secret", "tomato-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hex:"))
        .stdout(predicate::str::contains("nsec1"));
}

#[test]
fn test_pot_delete_removes_from_list() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["pot", "create", "basil"])
        .assert()
        .success();
    cli_cmd(&data_dir)
        .args(["pot", "delete", "basil"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted plant pot"));

    cli_cmd(&data_dir)
        .args(["pot", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No plant pots"));
}

#[test]
fn test_pot_rename() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["pot", "create", "basil"])
        .assert()
        .success();

    cli_cmd(&data_dir)
        .args(["pot", "rename", "basil", "Kitchen Basil"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Kitchen Basil"));
}

#[test]
fn test_weather_stations_empty() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["weather", "stations"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No weather stations"));
}

#[test]
fn test_identity_persists_across_invocations() {
    let data_dir = TempDir::new().unwrap();

    let first = cli_cmd(&data_dir).arg("info").assert().success();
    let first_out = String::from_utf8(first.get_output().stdout.clone()).unwrap();
    let identity_line = first_out
        .lines()
        .find(|l| l.starts_with("Identity:"))
        .expect("info prints the identity")
        .to_string();

    cli_cmd(&data_dir)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains(identity_line));
}
