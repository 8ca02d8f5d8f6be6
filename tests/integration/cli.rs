//! The `drainpool` binary.

use std::io::Write;
use std::process::Command;

fn drainpool() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_drainpool"));
    command
        .env_remove("DRAINPOOL_LIMIT")
        .env_remove("DRAINPOOL_RETRY_ATTEMPTS")
        .env_remove("DRAINPOOL_RETRY_DELAY_MS")
        .env_remove("DRAINPOOL_STAGE");
    command
}

#[test]
fn test_cli_run_success() {
    let output = drainpool()
        .args(["run", "--tasks", "8", "--limit", "2", "--work-ms", "1"])
        .output()
        .expect("Failed to run drainpool");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {}", stdout);
    assert!(stdout.contains("drained outputs  8"));
    assert!(stdout.contains("invocations      8"));
}

#[test]
fn test_cli_run_failure_exits_nonzero() {
    let output = drainpool()
        .args(["run", "--tasks", "6", "--fail-every", "3", "--work-ms", "0"])
        .output()
        .expect("Failed to run drainpool");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stdout.contains("[2] task 2 failed"));
    assert!(stdout.contains("[5] task 5 failed"));
    assert!(stderr.contains("task 2 failed"));
}

#[test]
fn test_cli_flaky_tasks_recover() {
    let output = drainpool()
        .args(["run", "--tasks", "4", "--flaky-every", "2", "--work-ms", "0"])
        .output()
        .expect("Failed to run drainpool");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {}", stdout);
    assert!(stdout.contains("invocations      6"));
}

#[test]
fn test_cli_config_layers() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "limit = 3\n\n[retry]\nattempts = 2").unwrap();

    let output = drainpool()
        .arg("config")
        .arg("--config")
        .arg(file.path())
        .args(["--attempts", "5"])
        .env("DRAINPOOL_RETRY_DELAY_MS", "7")
        .output()
        .expect("Failed to run drainpool");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("limit = 3"));
    assert!(stdout.contains("attempts = 5"));
    assert!(stdout.contains("base_delay_ms = 7"));
}

#[test]
fn test_cli_stage_test_forces_limit() {
    let output = drainpool()
        .args(["config", "--limit", "12"])
        .env("DRAINPOOL_STAGE", "TEST")
        .output()
        .expect("Failed to run drainpool");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("limit = 1"));
}

#[test]
fn test_cli_rejects_zero_limit() {
    let output = drainpool()
        .args(["config", "--limit", "0"])
        .output()
        .expect("Failed to run drainpool");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("limit"));
}
