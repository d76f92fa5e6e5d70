#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;
use std::path::PathBuf;

use capsem_core::{CapsemError, FailureMode};
use capsem_proxy::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
gateway:
  listen: "127.0.0.1:8000"
  policy_dirr: "./policies" # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(matches!(err, CapsemError::Config(_)));
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.gateway.listen, "127.0.0.1:8000");
    assert_eq!(cfg.gateway.policy_failure_mode, FailureMode::Closed);
    assert_eq!(cfg.gateway.request_timeout_ms, 60000);
    assert!(cfg.gateway.policy_dir.is_none());
    assert_eq!(
        cfg.providers.gemini_base_url,
        "https://generativelanguage.googleapis.com"
    );
}

#[test]
fn full_config() {
    let ok = r#"
version: 1
gateway:
  listen: "0.0.0.0:9000"
  policy_dir: "/etc/capsem/policies"
  policy_failure_mode: open
  request_timeout_ms: 5000
  max_body_bytes: 1024
providers:
  gemini_base_url: "http://127.0.0.1:1234"
  openai_base_url: "http://127.0.0.1:5678/"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.gateway.policy_failure_mode, FailureMode::Open);
    assert_eq!(cfg.gateway.listen_addr().unwrap().port(), 9000);
    assert_eq!(cfg.gateway.max_body_bytes, 1024);
    assert_eq!(
        cfg.gateway.policy_dir,
        Some(PathBuf::from("/etc/capsem/policies"))
    );
}

#[test]
fn out_of_range_values_fail() {
    assert!(config::load_from_str("version: 2\n").is_err());
    assert!(config::load_from_str("version: 1\ngateway:\n  request_timeout_ms: 10\n").is_err());
    assert!(config::load_from_str("version: 1\ngateway:\n  listen: \"nope\"\n").is_err());
    assert!(config::load_from_str("version: 1\ngateway:\n  policy_failure_mode: maybe\n").is_err());
    assert!(
        config::load_from_str("version: 1\nproviders:\n  openai_base_url: \"ftp://x\"\n").is_err()
    );
}

#[test]
fn policy_dir_env_override_wins() {
    let cfg = config::load_from_str("version: 1\ngateway:\n  policy_dir: \"./a\"\n").unwrap();
    assert_eq!(cfg.policy_dir(None), Some(PathBuf::from("./a")));
    assert_eq!(cfg.policy_dir(Some("/b")), Some(PathBuf::from("/b")));
    assert_eq!(cfg.policy_dir(Some("  ")), Some(PathBuf::from("./a")));
}

#[test]
fn missing_file_uses_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("missing.yaml");
    let cfg = config::load_or_default(missing.to_str().unwrap()).unwrap();
    assert_eq!(cfg.version, 1);

    let present = tmp.path().join("capsem-proxy.yaml");
    fs::write(&present, "version: 1\ngateway:\n  listen: \"127.0.0.1:9999\"\n").unwrap();
    let cfg = config::load_from_file(present.to_str().unwrap()).unwrap();
    assert_eq!(cfg.gateway.listen, "127.0.0.1:9999");
}
