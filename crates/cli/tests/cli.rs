//! End-to-end tests for the `miner` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn miner(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("miner").expect("miner binary");
    cmd.current_dir(root)
        .arg("--root")
        .arg(root)
        .env_remove("MINER_KIT_STATUS_PATH")
        .env_remove("MINER_KIT_TRACKING")
        .env_remove("RUST_LOG");
    cmd
}

fn status_json(root: &Path) -> Value {
    let raw = fs::read_to_string(root.join(".miner-kit/status.json")).expect("status file");
    serde_json::from_str(&raw).expect("valid status JSON")
}

fn write_config(root: &Path, content: &str) {
    let dir = root.join(".miner-kit");
    fs::create_dir_all(&dir).expect("config dir");
    fs::write(dir.join("config.toml"), content).expect("config file");
}

#[test]
fn test_stage_start_writes_status_file() {
    let temp = TempDir::new().expect("tempdir");

    miner(temp.path())
        .args(["stage", "start", "1", "Scraping profile", "--username", "alice"])
        .args(["--detail", "posts=12"])
        .assert()
        .success();

    let status = status_json(temp.path());
    assert_eq!(status["current_stage"], 1);
    assert_eq!(status["stage_phase"], "RUNNING");
    assert_eq!(status["active_username"], "alice");
    assert_eq!(status["last_event"]["details"]["posts"], 12);
}

#[test]
fn test_stage_rejects_unknown_stage() {
    let temp = TempDir::new().expect("tempdir");

    miner(temp.path())
        .args(["stage", "start", "9", "Nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("9"));

    assert!(!temp.path().join(".miner-kit/status.json").exists());
}

#[test]
fn test_stage_with_tracking_disabled_is_silent_success() {
    let temp = TempDir::new().expect("tempdir");

    miner(temp.path())
        .env("MINER_KIT_TRACKING", "off")
        .args(["stage", "complete", "2", "Retrieved"])
        .assert()
        .success();

    assert!(!temp.path().join(".miner-kit/status.json").exists());
}

#[test]
fn test_stage_survives_broken_config() {
    let temp = TempDir::new().expect("tempdir");
    write_config(temp.path(), "this is = = not toml");

    miner(temp.path())
        .args(["stage", "start", "3", "Indexing", "--username", "bob"])
        .assert()
        .success();

    assert_eq!(status_json(temp.path())["active_username"], "bob");
}

#[test]
fn test_status_prints_summary_line() {
    let temp = TempDir::new().expect("tempdir");

    miner(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mode: stopped"))
        .stdout(predicate::str::contains("No status has been recorded yet"));

    miner(temp.path())
        .args(["stage", "start", "1", "Scraping", "--username", "alice"])
        .assert()
        .success();

    miner(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("(alice)"))
        .stdout(predicate::str::contains("Last event:"));
}

#[test]
fn test_status_json_includes_revision() {
    let temp = TempDir::new().expect("tempdir");
    miner(temp.path())
        .args(["stage", "start", "1", "Scraping", "--username", "alice"])
        .assert()
        .success();

    let output = miner(temp.path())
        .args(["status", "--json"])
        .output()
        .expect("run status");
    assert!(output.status.success());

    let status: Value = serde_json::from_slice(&output.stdout).expect("JSON on stdout");
    assert_eq!(status["revision"], 1);
    assert_eq!(status["last_seq"], 1);
}

#[test]
fn test_reset_clears_progress_but_keeps_revision_moving() {
    let temp = TempDir::new().expect("tempdir");
    miner(temp.path())
        .args(["stage", "start", "4", "Analysing", "--username", "carol"])
        .assert()
        .success();

    miner(temp.path()).arg("reset").assert().success();

    let status = status_json(temp.path());
    assert_eq!(status["current_stage"], 0);
    assert_eq!(status["active_username"], "");
    assert_eq!(status["revision"], 2);
}

#[test]
fn test_direct_without_worker_program_fails() {
    let temp = TempDir::new().expect("tempdir");

    miner(temp.path())
        .args(["direct", "--username", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No worker program configured"));
}

#[cfg(unix)]
#[test]
fn test_direct_runs_worker_that_reports_stages() {
    let temp = TempDir::new().expect("tempdir");
    // The worker is called as `sh -c SCRIPT worker --username NAME --platform P`.
    write_config(
        temp.path(),
        r#"
[worker]
program = "sh"
args = [
    "-c",
    '"$MINER_BIN" stage start 1 Scraping --username "$2" && "$MINER_BIN" stage complete 1 Scraped --username "$2" --detail "platform=$4"',
    "worker",
]
"#,
    );

    miner(temp.path())
        .env("MINER_BIN", env!("CARGO_BIN_EXE_miner"))
        .args(["direct", "--username", "dave", "--platform", "tiktok"])
        .assert()
        .success();

    let status = status_json(temp.path());
    assert_eq!(status["mode"], "STOPPED");
    assert_eq!(status["current_stage"], 1);
    assert_eq!(status["stage_phase"], "SUCCEEDED");
    assert_eq!(status["active_username"], "dave");
    assert_eq!(status["last_event"]["details"]["platform"], "tiktok");
}

#[cfg(unix)]
#[test]
fn test_direct_reports_failing_worker() {
    let temp = TempDir::new().expect("tempdir");
    write_config(
        temp.path(),
        r#"
[worker]
program = "sh"
args = ["-c", "exit 3", "worker"]
"#,
    );

    miner(temp.path())
        .args(["direct", "--username", "erin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Processing erin failed"));

    assert_eq!(status_json(temp.path())["mode"], "STOPPED");
}
