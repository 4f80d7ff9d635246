use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;
use tempfile::TempDir;

fn kvbench() -> Command {
    Command::cargo_bin("kvbench").unwrap()
}

#[test]
fn put_get_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("kv");

    kvbench()
        .args(["put", "db_key", "some-value", "--levels", "2", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("Put key: db_key"));

    kvbench()
        .args(["get", "db_key", "--levels", "2", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("some-value"));

    kvbench()
        .args(["get", "other", "--levels", "2", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("Key not found: other"));
}

#[test]
fn check_transactional_backend() {
    let temp_dir = TempDir::new().unwrap();

    kvbench()
        .args(["check", "--backend", "transactional", "--wal", "--path"])
        .arg(temp_dir.path().join("single.sqlite"))
        .assert()
        .success()
        .stdout(contains("honours the get/put contract"));
}

#[test]
fn run_prints_preload_then_workers() {
    let temp_dir = TempDir::new().unwrap();

    kvbench()
        .args(["run", "--backend", "sharded", "--levels", "0"])
        .args(["--parallelism", "2", "--iterations", "1", "--preload", "1"])
        .args(["--key-range", "1", "--first-key", "1", "--path"])
        .arg(temp_dir.path().join("l0"))
        .assert()
        .success()
        .stdout(contains("Preloading"))
        .stdout(contains("preload: {time_ms"))
        .stdout(contains("hit_rate: 0,"))
        .stdout(contains("worker 0: {"))
        .stdout(contains("worker 1: {"))
        .stdout(contains("hit_rate: 1,"))
        .stdout(contains("combined (2 workers)"));
}

#[test]
fn run_rejects_invalid_configuration() {
    kvbench()
        .args(["run", "--backend", "in-memory", "--parallelism", "0"])
        .assert()
        .failure();
}

#[test]
fn init_suite_writes_reference_configurations() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("suite.json");

    kvbench()
        .args(["init-suite", "--output"])
        .arg(&output)
        .arg("--data-dir")
        .arg(temp_dir.path().join("data"))
        .assert()
        .success()
        .stdout(contains("6 backends"));

    let json = std::fs::read_to_string(&output).unwrap();
    assert!(json.contains("\"backend\": \"sharded\""));
    assert!(json.contains("\"use_wal\": true"));
}

#[test]
fn suite_runs_every_backend_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("suite.json");
    let suite = serde_json::json!({
        "bench": {
            "parallelism": 2,
            "iterations": 20,
            "key_range": 10,
            "preload": 5,
            "progress_interval": 0
        },
        "backends": [
            { "backend": "in_memory" },
            { "backend": "sharded", "base_path": temp_dir.path().join("l1"), "levels": 1 }
        ]
    });
    std::fs::write(&output, serde_json::to_string(&suite).unwrap()).unwrap();

    kvbench()
        .args(["suite", "--config"])
        .arg(&output)
        .assert()
        .success()
        .stdout(contains("Testing: in_memory"))
        .stdout(contains("Testing: sharded"));
}
