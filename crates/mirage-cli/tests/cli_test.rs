//! Integration tests for the mirage binary

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run mirage with an isolated home and no inherited policy.
fn mirage(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mirage"))
        .args(args)
        .current_dir(home)
        .env("HOME", home)
        .env_remove("MIRAGE_POLICY")
        .env_remove("MIRAGE_BOX")
        .output()
        .expect("Failed to execute mirage")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    let output = mirage(home.path(), &["--help"]);
    let text = stdout(&output);
    assert!(output.status.success());
    for command in ["probe", "cmdline", "serial", "init"] {
        assert!(text.contains(command), "missing {command}");
    }
}

#[test]
fn test_cmdline_preview_with_explicit_flags() {
    let home = TempDir::new().unwrap();
    let output = mirage(
        home.path(),
        &["cmdline", "--flags", "--extra", r#""C:\chrome.exe" --flag1"#],
    );
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), r#""C:\chrome.exe" --extra --flag1"#);
}

#[test]
fn test_cmdline_preview_uses_policy_flags() {
    let home = TempDir::new().unwrap();
    let policy = home.path().join("policy.toml");
    fs::write(&policy, "[global]\nCustomChromiumFlags = \"--lang=de\"\n").unwrap();

    let output = mirage(
        home.path(),
        &["--policy", policy.to_str().unwrap(), "cmdline", "msedge.exe --a"],
    );
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "msedge.exe --lang=de --a");
}

#[test]
fn test_cmdline_child_process_unchanged() {
    let home = TempDir::new().unwrap();
    let line = "chrome.exe --type=renderer";
    let output = mirage(home.path(), &["cmdline", "--flags", "--x", line]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), line);
    assert!(String::from_utf8_lossy(&output.stderr).contains("child process"));
}

#[test]
fn test_serial_validation() {
    let home = TempDir::new().unwrap();

    let valid = mirage(home.path(), &["serial", "aaaa-bbbb"]);
    assert!(valid.status.success());
    assert!(stdout(&valid).contains("AAAA-BBBB (0xAAAABBBB)"));

    let invalid = mirage(home.path(), &["serial", "0000-0000"]);
    assert!(stdout(&invalid).contains("invalid"));

    let random = mirage(home.path(), &["serial", "--random"]);
    let text = stdout(&random);
    assert_eq!(text.trim().len(), 9);
    assert_eq!(&text[4..5], "-");
}

#[test]
fn test_init_writes_template_once() {
    let home = TempDir::new().unwrap();
    let first = mirage(home.path(), &["init"]);
    assert!(first.status.success());

    let written = fs::read_to_string(home.path().join(".mirage/policy.toml")).unwrap();
    assert!(written.contains("[global]"));
    assert!(written.contains("UseChangeSpeed"));

    let second = mirage(home.path(), &["init"]);
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));

    let forced = mirage(home.path(), &["init", "--force"]);
    assert!(forced.status.success());
}

#[test]
fn test_probe_json_reports_policy() {
    let home = TempDir::new().unwrap();
    let policy = home.path().join("policy.toml");
    fs::write(
        &policy,
        "[global]\nCustomLCID = 1031\nUseChangeSpeed = true\nAddTickSpeed = 2\n",
    )
    .unwrap();

    let output = mirage(
        home.path(),
        &["--policy", policy.to_str().unwrap(), "probe", "--json"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["status"]["lcid"], 1031);
    let readings = report["readings"].as_array().unwrap();
    let lcid = readings
        .iter()
        .find(|r| r["symbol"] == "GetUserDefaultLCID")
        .unwrap();
    assert_eq!(lcid["observed"], "0x0407");
    assert_eq!(lcid["hooked"], true);
}
