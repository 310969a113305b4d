//! Integration tests for the tk binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tk() -> Command {
    let mut cmd = Command::cargo_bin("tk").expect("tk binary should build");
    cmd.env_remove("MAX_CONCURRENT_EXECUTIONS").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cycle_text_report() {
    let temp_dir = TempDir::new().unwrap();

    tk().current_dir(temp_dir.path())
        .args(["cycle", "a", "b", "c", "--fail", "c"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cycle 1"))
        .stdout(predicate::str::contains("completed=2 failed=1"))
        .stdout(predicate::str::contains("simulated failure for task c"));
}

#[test]
fn test_cycle_json_report() {
    let temp_dir = TempDir::new().unwrap();

    let output = tk()
        .current_dir(temp_dir.path())
        .args(["-j", "1", "cycle", "x", "x", "y", "-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["cycle"], 1);
    assert_eq!(report["stats"]["completed"], 2);
    assert_eq!(report["stats"]["skipped"], 1);
    assert_eq!(report["tasks"].as_array().unwrap().len(), 2);
}

#[test]
fn test_cycle_writes_event_log() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("events.jsonl");
    let config_path = temp_dir.path().join("keeper.yml");
    std::fs::write(&config_path, format!("logging:\n  event-log: {}\n", log_path.display())).unwrap();

    tk().current_dir(temp_dir.path())
        .args(["-c", config_path.to_str().unwrap(), "cycle", "t1"])
        .assert()
        .success();

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(log.lines().count(), 3);
    assert!(log.contains("CycleComplete"));
}

#[test]
fn test_zero_concurrency_from_environment_rejected() {
    let temp_dir = TempDir::new().unwrap();

    tk().current_dir(temp_dir.path())
        .env("MAX_CONCURRENT_EXECUTIONS", "0")
        .args(["cycle", "a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid queue configuration"));
}

#[test]
fn test_config_shows_resolved_ceiling() {
    let temp_dir = TempDir::new().unwrap();

    tk().current_dir(temp_dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max-concurrent: 3"))
        .stdout(predicate::str::contains("poll-interval-secs: 10"));

    tk().current_dir(temp_dir.path())
        .env("MAX_CONCURRENT_EXECUTIONS", "7")
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max-concurrent: 7"));
}

#[test]
fn test_missing_config_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();

    tk().current_dir(temp_dir.path())
        .args(["-c", "does-not-exist.yml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
