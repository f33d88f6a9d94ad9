//! CLI integration tests

use std::io::Write;
use std::process::Command;

fn tarema() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_tarema"));
    // Keep a developer's config file out of the tests
    command.env("HOME", std::env::temp_dir());
    command.env_remove("TAREMA_API_URL");
    command
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = tarema()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Tarema"), "Should show app name");
    assert!(stdout.contains("replay"), "Should show replay command");
    assert!(stdout.contains("labels"), "Should show labels command");
    assert!(stdout.contains("estimations"), "Should show estimations command");
    assert!(stdout.contains("status"), "Should show status command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = tarema()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("tarema"), "Should show binary name");
}

/// Test replay subcommand help
#[test]
fn test_replay_help() {
    let output = tarema()
        .args(["replay", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Replay help should succeed");
    assert!(stdout.contains("--input"), "Should show input option");
    assert!(stdout.contains("--out-dir"), "Should show out-dir option");
    assert!(
        stdout.contains("--expected-nodes"),
        "Should show expected-nodes option"
    );
    assert!(stdout.contains("--benchmarks"), "Should show benchmarks option");
}

/// Test that replay requires an input file
#[test]
fn test_replay_requires_input() {
    let output = tarema()
        .arg("replay")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Replay without input should fail");
}

/// Test a full replay in benchmark mode writes the CSV files
#[test]
fn test_replay_with_benchmarks() {
    let dir = tempfile::TempDir::new().unwrap();

    let benchmarks = dir.path().join("benchmarks.json");
    std::fs::write(
        &benchmarks,
        r#"{"n1": {"cpu": 1, "mem": 1, "read": 1, "write": 1},
            "n2": {"cpu": 8, "mem": 8, "read": 8, "write": 8}}"#,
    )
    .unwrap();

    let input = dir.path().join("run.jsonl");
    let mut file = std::fs::File::create(&input).unwrap();
    for (id, node, cpu) in [("t1", "n1", 20.0), ("t2", "n2", 180.0)] {
        writeln!(
            file,
            r#"{{"task_instance_id": "{id}", "node": "{node}", "task": "task-{id}", "trace": {{"%cpu": {cpu}, "rss": 100, "read_bytes": 10, "write_bytes": 10, "rchar": 10, "realtime": 1000}}}}"#
        )
        .unwrap();
    }
    drop(file);

    let out_dir = dir.path().join("out");
    let output = tarema()
        .args(["--format", "json", "replay", "--input"])
        .arg(&input)
        .arg("--out-dir")
        .arg(&out_dir)
        .arg("--benchmarks")
        .arg(&benchmarks)
        .output()
        .expect("Failed to execute command");

    assert!(
        output.status.success(),
        "Replay should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["accepted"], 2);
    assert_eq!(summary["node_labels"]["mode"], "benchmark");

    assert!(out_dir.join("node_labels.csv").exists());
    assert!(out_dir.join("task_labels.csv").exists());
}

/// Test that querying an unreachable service fails cleanly
#[test]
fn test_labels_unreachable_service() {
    let output = tarema()
        .args(["--api-url", "http://127.0.0.1:9", "labels"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Unreachable service should fail");
}
