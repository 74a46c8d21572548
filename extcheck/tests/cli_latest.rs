//! CLI tests for the `extcheck` binary.
//!
//! Spawns the binary and verifies exit codes for check queries and runs.

use std::process::Command;

use extcheck::core::types::{AssetKey, ExternalCheckDefinition, RunStatus};
use extcheck::exit_codes;
use extcheck::io::snapshot::{SnapshotStore, write_snapshot};
use extcheck::test_support::{evaluated_for, materialization, run};

fn snapshot(latest_storage_id: i64) -> SnapshotStore {
    let orders = AssetKey::parse("warehouse/orders");
    SnapshotStore::default()
        .with_check(ExternalCheckDefinition::new(orders.clone(), "fresh"))
        .with_run(run("r1", RunStatus::Success, 10))
        .with_execution(evaluated_for(&orders, "fresh", 50, "r1", true, Some(42)))
        .with_materialization(orders, materialization(latest_storage_id, "r1"))
}

fn latest(snapshot: &SnapshotStore) -> std::process::Output {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("snapshot.json");
    write_snapshot(&path, snapshot).expect("write snapshot");

    Command::new(env!("CARGO_BIN_EXE_extcheck"))
        .args(["latest", "--snapshot"])
        .arg(&path)
        .args(["--asset", "warehouse/orders", "--check", "fresh"])
        .output()
        .expect("extcheck latest")
}

#[test]
fn latest_prints_current_execution() {
    let output = latest(&snapshot(42));

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let printed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(printed["id"], 50);
    assert_eq!(printed["resolved_status"], "SUCCEEDED");
}

#[test]
fn latest_without_current_execution_exits_with_code() {
    let output = latest(&snapshot(43));
    assert_eq!(output.status.code(), Some(exit_codes::NO_CURRENT_EXECUTION));
    assert!(output.stdout.is_empty());
}

#[test]
fn unknown_check_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("snapshot.json");
    write_snapshot(&path, &snapshot(42)).expect("write snapshot");

    let status = Command::new(env!("CARGO_BIN_EXE_extcheck"))
        .args(["latest", "--snapshot"])
        .arg(&path)
        .args(["--asset", "warehouse/orders", "--check", "missing"])
        .status()
        .expect("extcheck latest");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[cfg(unix)]
#[test]
fn failing_command_maps_to_external_failed() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = Command::new(env!("CARGO_BIN_EXE_extcheck"))
        .current_dir(temp.path())
        .args(["run", "--", "sh", "-c", "exit 3"])
        .status()
        .expect("extcheck run");

    assert_eq!(status.code(), Some(exit_codes::EXTERNAL_FAILED));
}
