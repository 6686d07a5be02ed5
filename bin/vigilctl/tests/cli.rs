//! ---
//! vigil_section: "15-testing-qa-runbook"
//! vigil_subsection: "binary"
//! vigil_type: "test"
//! vigil_scope: "code"
//! vigil_description: "Smoke tests for the vigilctl command line."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

/// Writes a configuration whose every path lives under `dir`.
fn write_config(dir: &Path) -> PathBuf {
    let config = format!(
        r#"
[paths]
state_dir = "{root}/state"
crash_log = "{root}/log/crashes.jsonl"
alert_config = "{root}/alert.conf"

[logging]
directory = "{root}/log"
"#,
        root = dir.display()
    );
    let path = dir.join("vigil.toml");
    fs::write(&path, config).unwrap();
    path
}

fn vigilctl(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("vigilctl").unwrap();
    cmd.env_remove("VIGIL_CONFIG")
        .env_remove("SERVICE_RESULT")
        .env_remove("EXIT_CODE")
        .env_remove("EXIT_STATUS")
        .arg("--config")
        .arg(config);
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap()
}

#[test]
fn version_flag_prints_banner() {
    let mut cmd = Command::cargo_bin("vigilctl").unwrap();
    let stdout = stdout_of(cmd.arg("--version"));
    assert!(stdout.starts_with("Vigil v"), "unexpected output: {stdout}");
    assert!(stdout.contains("Target:"));
}

#[test]
fn alert_set_persists_and_show_masks_token() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    vigilctl(&config)
        .args(["alert", "set", "HOSPITAL_NAME", "St. Mary"])
        .assert()
        .success();
    vigilctl(&config)
        .args(["alert", "set", "bot-token", "123456:secret-token"])
        .assert()
        .success();

    let shown = stdout_of(vigilctl(&config).args(["alert", "show"]));
    assert!(shown.contains("HOSPITAL_NAME=St. Mary"));
    assert!(shown.contains("BOT_TOKEN=****oken"));
    assert!(!shown.contains("secret-token"));

    let written = fs::read_to_string(dir.path().join("alert.conf")).unwrap();
    assert!(written.contains("123456:secret-token"));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(dir.path().join("alert.conf")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[test]
fn alert_set_rejects_unknown_key() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    vigilctl(&config)
        .args(["alert", "set", "WEBHOOK", "x"])
        .assert()
        .failure();
    assert!(!dir.path().join("alert.conf").exists());
}

#[test]
fn alert_test_without_credentials_fails_fast() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    vigilctl(&config).args(["alert", "test"]).assert().failure();
}

#[test]
fn crashes_on_empty_log() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let stdout = stdout_of(vigilctl(&config).arg("crashes"));
    assert!(stdout.contains("no crashes recorded"));
}

#[test]
fn hook_records_signal_kill_without_credentials() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    vigilctl(&config)
        .args(["hook", "broker"])
        .env("SERVICE_RESULT", "signal")
        .env("EXIT_CODE", "killed")
        .env("EXIT_STATUS", "KILL")
        .assert()
        .success();

    let log = fs::read_to_string(dir.path().join("log/crashes.jsonl")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["service_name"], "broker");
    assert_eq!(record["exit_reason"], "signaled");
    assert_eq!(record["exit_code"], 137);

    let stdout = stdout_of(vigilctl(&config).args(["crashes", "--json"]));
    let listed: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
}

#[test]
fn hook_ignores_clean_exit() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    vigilctl(&config)
        .args(["hook", "dashboard"])
        .env("SERVICE_RESULT", "success")
        .env("EXIT_CODE", "exited")
        .env("EXIT_STATUS", "0")
        .assert()
        .success();

    assert!(!dir.path().join("log/crashes.jsonl").exists());
}

#[test]
fn missing_configuration_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    vigilctl(&dir.path().join("absent.toml"))
        .arg("status")
        .assert()
        .failure();
}
