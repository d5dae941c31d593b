// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the `tool-backplane` binary.

use assert_cmd::Command;
use predicates::str::contains;

fn tool_backplane() -> Command {
    Command::cargo_bin("tool-backplane").expect("binary `tool-backplane` should be built")
}

#[test]
fn help_flag_prints_usage() {
    tool_backplane()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Contract-first tool execution Planner"))
        .stdout(contains("--mode"));
}

#[test]
fn version_flag_prints_version() {
    tool_backplane().arg("--version").assert().success().stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn answer_mode_prints_ok_true_json() {
    let output = tool_backplane()
        .args(["take a note about lunch", "--mode", "answer"])
        .output()
        .expect("execute tool-backplane");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON on stdout");
    assert_eq!(json["ok"], serde_json::json!(true));
    assert!(json["enqueued"].as_array().unwrap().is_empty());
}

#[test]
fn enqueue_mode_with_worker_resolves_a_receipt() {
    // The worker's poll interval defaults to the config-level 5s cadence
    // (spec.md §6), and its very first poll can land just before the
    // Planner enqueues the call, so the wait budget has to comfortably
    // clear one full poll cycle plus execution time.
    let output = tool_backplane()
        .args(["please leave a note", "--mode", "enqueue-and-wait", "--with-worker", "--wait-timeout-ms", "8000"])
        .timeout(std::time::Duration::from_secs(15))
        .output()
        .expect("execute tool-backplane");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON on stdout");
    assert_eq!(json["ok"], serde_json::json!(true));
    assert_eq!(json["receipts"].as_array().unwrap().len(), 1);
}

#[test]
fn bad_context_json_fails_with_nonzero_exit() {
    tool_backplane().args(["hi", "--context", "not json"]).assert().failure();
}

#[test]
fn health_flag_prints_resolved_config_without_planning() {
    tool_backplane()
        .args(["unused message", "--health"])
        .assert()
        .success()
        .stdout(contains("poll_interval_ms"));
}

#[test]
fn missing_registry_file_fails_with_nonzero_exit() {
    tool_backplane().args(["hi", "--registry", "/no/such/registry.json"]).assert().failure();
}
