//! Configuration parsing and loading
//!
//! Field round-trips, syntax rejection, and configuration file resolution.

use circ::config::{config_path, Configuration, CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE};
use circ::error::{ConfigErrorKind, ExitStatus, SyntaxErrorReason};
use circ::policy::FunctionId;
use serial_test::serial;
use std::path::PathBuf;

fn syntax_reason(input: &str) -> SyntaxErrorReason {
    match input.parse::<Configuration>() {
        Err(circ::error::ConfigError::Syntax(err)) => err.reason,
        other => panic!("expected syntax error for {input:?}, got {other:?}"),
    }
}

#[test]
fn test_full_configuration_round_trip() {
    let text = r#"CIRC = {
        "internal_data_filename": "calls.log",
        "internal_storage_size": 42,
        "internal_direct_output": true,
        "runtime_filter": [4198694, 4198816],
        "sampling": [{"func": 4199012, "sample": 10}, {"func": 4199100, "sample": 2}]
    }"#;

    let config: Configuration = text.parse().unwrap();
    assert_eq!(config.trace_file_name, "calls.log");
    assert_eq!(config.initial_capacity, 42);
    assert!(config.direct_output);
    assert_eq!(config.policies.len(), 4);
    assert_eq!(config.policies.filtered_count(), 2);
    assert_eq!(config.policies.sampled_count(), 2);

    let sampled = config.policies.lookup(FunctionId(4199012));
    assert!(sampled.sampled);
    assert_eq!(sampled.sample_ratio, 10);
    assert_eq!(sampled.sample_counter, 0);
}

#[test]
fn test_sections_in_any_order() {
    let config: Configuration =
        r#"CIRC={"internal_direct_output":false,"internal_data_filename":"x"}"#
            .parse()
            .unwrap();
    assert_eq!(config.trace_file_name, "x");
    assert!(!config.direct_output);
    assert_eq!(config.initial_capacity, 20_000);
}

#[test]
fn test_empty_body_gives_defaults() {
    let config: Configuration = "CIRC = {}".parse().unwrap();
    assert_eq!(config, Configuration::default());
}

#[test]
fn test_empty_lists_accepted() {
    let config: Configuration = r#"CIRC = {"runtime_filter": [], "sampling": []}"#
        .parse()
        .unwrap();
    assert!(config.policies.is_empty());
}

#[test]
fn test_filter_wins_over_earlier_sampling() {
    let config: Configuration = r#"CIRC = {
        "sampling": [{"func": 100, "sample": 4}],
        "runtime_filter": [100]
    }"#
    .parse()
    .unwrap();
    let policy = config.policies.lookup(FunctionId(100));
    assert!(policy.filtered);
    assert!(!policy.sampled);
}

#[test]
fn test_sampling_ignored_after_filter() {
    let config: Configuration = r#"CIRC = {
        "runtime_filter": [100],
        "sampling": [{"func": 100, "sample": 4}]
    }"#
    .parse()
    .unwrap();
    assert!(config.policies.lookup(FunctionId(100)).filtered);
    assert_eq!(config.policies.sampled_count(), 0);
}

#[test]
fn test_ratio_below_two_dropped() {
    let config: Configuration =
        r#"CIRC = {"sampling": [{"func": 1, "sample": 1}, {"func": 2, "sample": 0}]}"#
            .parse()
            .unwrap();
    assert!(config.policies.is_empty());
}

#[test]
fn test_duplicate_section_rejected() {
    assert_eq!(
        syntax_reason(r#"CIRC = {"runtime_filter": [1], "runtime_filter": [2]}"#),
        SyntaxErrorReason::DuplicateSection("runtime_filter")
    );
}

#[test]
fn test_sampling_entry_without_sample_key() {
    let reason = syntax_reason(r#"CIRC = {"sampling": [{"func": 1}]}"#);
    assert!(matches!(reason, SyntaxErrorReason::UnexpectedToken { .. }));

    let reason = syntax_reason(r#"CIRC = {"sampling": [{"func": 1, "ratio": 3}]}"#);
    assert!(matches!(
        reason,
        SyntaxErrorReason::UnexpectedKey {
            expected: "sample",
            ..
        }
    ));
}

#[test]
fn test_unterminated_string_rejected() {
    assert_eq!(
        syntax_reason(r#"CIRC = {"internal_data_filename": "trace.log"#),
        SyntaxErrorReason::UnterminatedLiteral
    );
}

#[test]
fn test_non_digit_in_number_rejected() {
    let reason = syntax_reason(r#"CIRC = {"internal_storage_size": 12a4}"#);
    assert_eq!(reason, SyntaxErrorReason::UnexpectedChar('a'));
}

#[test]
fn test_trailing_comma_rejected() {
    assert!(r#"CIRC = {"runtime_filter": [1, 2,]}"#
        .parse::<Configuration>()
        .is_err());
    assert!(r#"CIRC = {"internal_storage_size": 1,}"#
        .parse::<Configuration>()
        .is_err());
}

#[test]
fn test_missing_magic_rejected() {
    assert!(r#"{"internal_storage_size": 1}"#.parse::<Configuration>().is_err());
    assert!(r#"CIRCUS = {}"#.parse::<Configuration>().is_err());
}

#[test]
fn test_trailing_input_rejected() {
    assert!("CIRC = {} CIRC".parse::<Configuration>().is_err());
}

#[test]
fn test_address_overflow_rejected() {
    let reason = syntax_reason(r#"CIRC = {"runtime_filter": [99999999999999999999999]}"#);
    assert!(matches!(reason, SyntaxErrorReason::InvalidAddress(_)));
}

#[test]
fn test_exit_status_per_error_class() {
    let dir = tempfile::tempdir().unwrap();
    let missing = Configuration::load(dir.path().join("nope.conf")).unwrap_err();
    assert_eq!(missing.kind(), ConfigErrorKind::Missing);
    assert_eq!(missing.exit_status(), ExitStatus::ConfigMissing);
    assert_eq!(missing.exit_status().code(), 11);

    let path = dir.path().join("bad.conf");
    std::fs::write(&path, "CIRC = [").unwrap();
    let syntax = Configuration::load(&path).unwrap_err();
    assert_eq!(syntax.exit_status(), ExitStatus::ConfigSyntax);
    assert_eq!(syntax.exit_status().code(), 12);
}

#[test]
#[serial]
fn test_config_path_from_environment() {
    std::env::set_var(CONFIG_PATH_ENV, "/etc/circ/custom.conf");
    assert_eq!(config_path(), PathBuf::from("/etc/circ/custom.conf"));
    std::env::remove_var(CONFIG_PATH_ENV);
}

#[test]
#[serial]
fn test_config_path_default() {
    std::env::remove_var(CONFIG_PATH_ENV);
    assert_eq!(config_path(), PathBuf::from(DEFAULT_CONFIG_FILE));

    std::env::set_var(CONFIG_PATH_ENV, "");
    assert_eq!(config_path(), PathBuf::from(DEFAULT_CONFIG_FILE));
    std::env::remove_var(CONFIG_PATH_ENV);
}

#[test]
#[serial]
fn test_load_default_uses_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("circ.conf");
    std::fs::write(&path, r#"CIRC = {"internal_storage_size": 7}"#).unwrap();

    std::env::set_var(CONFIG_PATH_ENV, &path);
    let config = Configuration::load_default();
    std::env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(config.unwrap().initial_capacity, 7);
}
