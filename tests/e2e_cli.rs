//! CLI end-to-end tests
//!
//! Tests for the snapfeed command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the snapfeed binary
#[allow(deprecated)]
fn snapfeed_cmd() -> Command {
    Command::cargo_bin("snapfeed").unwrap()
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = snapfeed_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = snapfeed_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("snapfeed"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = snapfeed_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_check_tools_command() {
    let mut cmd = snapfeed_cmd();
    cmd.arg("check-tools").assert().success().stdout(
        predicate::str::contains("ffmpeg").and(predicate::str::contains("ffprobe")),
    );
}

#[test]
fn test_cli_run_help() {
    let mut cmd = snapfeed_cmd();
    cmd.args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("keep the feed running"));
}

#[test]
fn test_cli_parse_snapshot_path() {
    let mut cmd = snapfeed_cmd();
    cmd.args([
        "parse",
        "/cams/Snapshots/2024/03-March/05/101530-Camera2-Snapshot.jpg",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("Type: snapshot"))
    .stdout(predicate::str::contains("Capture time: 2024-03-05 10:15:30"));
}

#[test]
fn test_cli_parse_rejects_unknown_name() {
    let mut cmd = snapfeed_cmd();
    cmd.args(["parse", "/cams/Snapshots/2024/03-March/05/holiday.jpg"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no timestamp"));
}

#[test]
fn test_cli_probe_nonexistent_file() {
    let mut cmd = snapfeed_cmd();
    cmd.args(["probe", "/nonexistent/path/clip.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not exist"));
}

#[test]
fn test_cli_validate_config() {
    let temp = tempdir().unwrap();
    let config_file = temp.path().join("config.toml");
    fs::write(
        &config_file,
        r#"
[budget]
window_secs = 45.0

[stream]
url = "rtsp://127.0.0.1:8554/yard"
"#,
    )
    .unwrap();

    let mut cmd = snapfeed_cmd();
    cmd.args(["validate", config_file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Window: 45s"))
        .stdout(predicate::str::contains("rtsp://127.0.0.1:8554/yard"));
}

#[test]
fn test_cli_validate_rejects_zero_window() {
    let temp = tempdir().unwrap();
    let config_file = temp.path().join("config.toml");
    fs::write(&config_file, "[budget]\nwindow_secs = 0.0\n").unwrap();

    let mut cmd = snapfeed_cmd();
    cmd.args(["--config", config_file.to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("window_secs"));
}

#[test]
fn test_cli_validate_defaults() {
    let mut cmd = snapfeed_cmd();
    cmd.arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"));
}
