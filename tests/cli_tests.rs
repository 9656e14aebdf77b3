//! `circ` binary: configuration checks and trace inspection
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn circ() -> Command {
    let mut cmd = Command::cargo_bin("circ").unwrap();
    cmd.env_remove("CIRC_CONFIG");
    cmd
}

fn file_with(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_check_valid_config_prints_json() {
    let config = file_with(
        r#"CIRC = {"internal_data_filename": "calls.log", "runtime_filter": [4198694]}"#,
    );
    circ()
        .arg("check")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""trace_file_name": "calls.log""#))
        .stdout(predicate::str::contains("0x401126"));
}

#[test]
fn test_check_missing_config_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    circ()
        .arg("check")
        .arg("--config")
        .arg(dir.path().join("circ.conf"))
        .assert()
        .code(11)
        .stderr(predicate::str::contains("missing"));
}

#[test]
fn test_check_syntax_error_exit_code() {
    let config = file_with(r#"CIRC = {"runtime_filter": [1], "runtime_filter": [2]}"#);
    circ()
        .arg("check")
        .arg("--config")
        .arg(config.path())
        .assert()
        .code(12)
        .stderr(predicate::str::contains("syntax error at offset"));
}

#[test]
fn test_check_uses_environment_config() {
    let config = file_with(r#"CIRC = {"internal_storage_size": 99}"#);
    circ()
        .env("CIRC_CONFIG", config.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""initial_capacity": 99"#));
}

#[test]
fn test_check_default_config_in_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("circ.conf"), "CIRC = {}").unwrap();
    circ()
        .current_dir(dir.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""trace_file_name": "trace.log""#));
}

#[test]
fn test_calls_prints_json_lines() {
    let trace = file_with("i 0x10 100 0\ni 0x20 110 8\no 0x20 130 0\no 0x10 200 0\n");
    circ()
        .arg("calls")
        .arg(trace.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#"{"function":32,"start_us":110,"duration_us":20,"size":8}"#,
        ))
        .stdout(predicate::str::contains(r#""duration_us":100"#));
}

#[test]
fn test_calls_reports_bad_line() {
    let trace = file_with("i 0x10 100 0\nnot a record line\n");
    circ()
        .arg("calls")
        .arg(trace.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_summary_sorted_by_total_time() {
    let trace = file_with(
        "i 0x10 0 0\no 0x10 5 0\ni 0x20 10 0\no 0x20 60 0\ni 0x10 70 0\no 0x10 75 0\n",
    );
    let output = circ()
        .arg("summary")
        .arg(trace.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    let first = text.find("0x20").unwrap();
    let second = text.find("0x10").unwrap();
    assert!(first < second);
}

#[test]
fn test_summary_empty_trace() {
    let trace = file_with("");
    circ()
        .arg("summary")
        .arg(trace.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No completed calls"));
}

#[test]
fn test_requires_subcommand() {
    circ().assert().failure();
}
