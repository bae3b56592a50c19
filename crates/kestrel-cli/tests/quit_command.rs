use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

#[allow(deprecated)]
fn get_kestrel_bin() -> PathBuf {
    assert_cmd::cargo::cargo_bin("kestrel")
}

#[test]
fn test_quit_command_help() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("quit").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Terminate a previously launched app"))
        .stdout(predicate::str::contains("--descriptor"))
        .stdout(predicate::str::contains("--timeout-ms"));
}

#[test]
fn test_quit_missing_descriptor_fails() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("quit")
        .arg("--descriptor")
        .arg("/nonexistent/launch.json");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("E_INTERNAL"));
}

#[test]
fn test_quit_dead_pid_descriptor_succeeds() {
    // Termination is idempotent; quitting an app that already exited is
    // still a clean success.
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    let _ = child.wait();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("launch.json");
    std::fs::write(
        &path,
        format!(
            r#"{{"wsUrl":"ws://127.0.0.1:1/devtools/browser/x","pid":{},"cdpPort":1,"artifactDir":"{}"}}"#,
            pid,
            dir.path().display()
        ),
    )
    .unwrap();

    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("quit").arg("--descriptor").arg(&path);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("terminated"));
}

#[test]
fn test_quit_requires_descriptor_flag() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("quit");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}
