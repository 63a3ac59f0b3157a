//! CLI integration tests

use std::process::{Command, Output};

fn perfmon(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_perfmon"))
        .args(args)
        .env_remove("PERFMON_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = perfmon(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Performance Monitor"), "Should show app name");
    for command in [
        "status",
        "dashboard",
        "current",
        "history",
        "analyze",
        "predict",
        "collectors",
        "collect",
    ] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = perfmon(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("perfmon"), "Should show binary name");
}

/// Test history subcommand help
#[test]
fn test_history_help() {
    let output = perfmon(&["history", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "History help should succeed");
    assert!(stdout.contains("--since"), "Should show since option");
    assert!(stdout.contains("--collectors"), "Should show collectors option");
    assert!(stdout.contains("--aggregation"), "Should show aggregation option");
}

/// Test analyze subcommand help
#[test]
fn test_analyze_help() {
    let output = perfmon(&["analyze", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Analyze help should succeed");
    assert!(stdout.contains("--skip-trends"), "Should show skip-trends option");
    assert!(
        stdout.contains("--skip-anomalies"),
        "Should show skip-anomalies option"
    );
}

/// Test predict subcommand help
#[test]
fn test_predict_help() {
    let output = perfmon(&["predict", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Predict help should succeed");
    assert!(stdout.contains("--horizon"), "Should show horizon option");
    assert!(stdout.contains("--metric"), "Should show metric option");
    assert!(stdout.contains("--confidence"), "Should show confidence option");
}

/// Test collectors enable subcommand help
#[test]
fn test_collectors_enable_help() {
    let output = perfmon(&["collectors", "enable", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Collectors enable help should succeed");
    assert!(stdout.contains("name"), "Should show name argument");
}

/// Test format and api-url options
#[test]
fn test_global_options() {
    let output = perfmon(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("PERFMON_API_URL"), "Should show env var");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = perfmon(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Test invalid aggregation value
#[test]
fn test_invalid_aggregation() {
    let output = perfmon(&["history", "--aggregation", "fortnight"]);

    assert!(!output.status.success(), "Unknown aggregation should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fortnight"), "Should echo the bad value");
}

/// Test missing required argument error handling
#[test]
fn test_missing_argument() {
    let output = perfmon(&["collectors", "enable"]);

    assert!(!output.status.success(), "Missing argument should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "Should show error about missing argument"
    );
}

/// Test that an unreachable daemon fails with a non-zero exit
#[test]
fn test_unreachable_api() {
    let output = perfmon(&["--api-url", "http://127.0.0.1:1", "status"]);

    assert!(!output.status.success(), "Unreachable API should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Failed to send request"),
        "Should report the connection failure"
    );
}
