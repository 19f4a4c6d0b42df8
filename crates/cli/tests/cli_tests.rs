//! CLI integration tests

use std::process::Command;

fn placerctl(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "placer-cli", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = placerctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Edge Placer"), "Should show app name");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("spread"), "Should show spread command");
    assert!(stdout.contains("teardown"), "Should show teardown command");
    assert!(stdout.contains("scaler"), "Should show scaler command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = placerctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("placerctl"), "Should show binary name");
}

/// Test spread subcommand help
#[test]
fn test_spread_help() {
    let output = placerctl(&["spread", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Spread help should succeed");
    assert!(stdout.contains("--dry-run"), "Should show dry-run option");
}

/// Test teardown subcommand help
#[test]
fn test_teardown_help() {
    let output = placerctl(&["teardown", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Teardown help should succeed");
    assert!(stdout.contains("--yes"), "Should show confirmation option");
}

/// Test scaler probe subcommand help
#[test]
fn test_scaler_probe_help() {
    let output = placerctl(&["scaler", "probe", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Scaler probe help should succeed");
    assert!(stdout.contains("--endpoint"), "Should show endpoint option");
    assert!(stdout.contains("--name"), "Should show name option");
    assert!(
        stdout.contains("--namespace"),
        "Should show namespace option"
    );
}

/// Test format option
#[test]
fn test_format_option() {
    let output = placerctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
}

/// Test api-url option
#[test]
fn test_api_url_option() {
    let output = placerctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("PLACER_API_URL"), "Should show env var");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = placerctl(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Test missing subcommand error handling
#[test]
fn test_missing_scaler_subcommand() {
    let output = placerctl(&["scaler"]);

    assert!(!output.status.success(), "Missing subcommand should fail");
}

/// Status against an unreachable daemon fails with an error
#[test]
fn test_status_unreachable_daemon() {
    let output = placerctl(&["--api-url", "http://127.0.0.1:1", "status"]);

    assert!(!output.status.success(), "Status should fail without a daemon");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to send request"));
}
