//! The binary surface: exit codes and the persisted layout, driven
//! through the real CLI.

#![cfg(unix)]

use std::path::Path;
use std::process::Command;

fn canary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_canary"))
}

fn write_suite(dir: &Path) {
    std::fs::write(
        dir.join("pass.canary"),
        "command = [\"/bin/sh\", \"-c\", \"echo ok\"]\nkeywords = [\"smoke\"]\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("fail.canary"),
        "command = [\"/bin/sh\", \"-c\", \"exit 1\"]\nkeywords = [\"nightly\"]\n",
    )
    .unwrap();
}

#[test]
fn run_reports_failures_with_exit_thirty() {
    let suite = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    write_suite(suite.path());

    let output = canary()
        .args(["run", "-d"])
        .arg(results.path())
        .arg(suite.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(30));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pass"), "{stdout}");
    assert!(stdout.contains("fail"), "{stdout}");
    assert!(results.path().join(".canary/config").is_file());
    assert!(results.path().join("pass/canary-out.txt").is_file());
}

#[test]
fn keyword_filter_turns_the_run_green() {
    let suite = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    write_suite(suite.path());

    let output = canary()
        .args(["run", "-k", "smoke", "-d"])
        .arg(results.path())
        .arg(suite.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn status_reprints_a_finished_session() {
    let suite = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    write_suite(suite.path());

    let run = canary()
        .args(["run", "-d"])
        .arg(results.path())
        .arg(suite.path())
        .output()
        .unwrap();
    assert_eq!(run.status.code(), Some(30));

    let status = canary()
        .args(["status", "-d"])
        .arg(results.path())
        .output()
        .unwrap();
    assert_eq!(status.status.code(), Some(30));
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("2 cases"), "{stdout}");
}

#[test]
fn find_lists_cases_without_running() {
    let suite = tempfile::tempdir().unwrap();
    write_suite(suite.path());

    let output = canary().arg("find").arg(suite.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pass"));
    assert!(stdout.contains("[smoke]"));
    // Nothing executed, nothing persisted.
    assert!(!suite.path().join("TestResults").exists());
}

#[test]
fn until_freeze_stops_the_pipeline() {
    let suite = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    write_suite(suite.path());

    let output = canary()
        .args(["run", "--until", "freeze", "-d"])
        .arg(results.path())
        .arg(suite.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(results.path().join(".canary/config").is_file());
    assert!(!results.path().join("pass").exists());
}

#[test]
fn bad_batch_option_is_a_driver_error() {
    let suite = tempfile::tempdir().unwrap();
    write_suite(suite.path());

    let output = canary()
        .args(["run", "-b", "spec=weekly:2"])
        .arg(suite.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid batch option"), "{stderr}");
}
