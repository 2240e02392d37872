//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files.

use std::io::Write;

use itsi_domain::ItsiError;
use itsi_infra::config;
use tempfile::NamedTempFile;

fn write_config(contents: &str, extension: &str) -> tempfile::TempPath {
    let mut temp_file = tempfile::Builder::new()
        .suffix(&format!(".{extension}"))
        .tempfile()
        .expect("Failed to create temp file");
    temp_file.write_all(contents.as_bytes()).expect("Failed to write to temp file");
    temp_file.into_temp_path()
}

#[test]
fn test_load_config_from_json_file() {
    let json_content = r#"{
        "base_url": "https://splunk.example.com:8089",
        "timeout_secs": 45,
        "verify_tls": false,
        "auth": {
            "username": "admin",
            "password": "changeme"
        }
    }"#;
    let path = write_config(json_content, "json");

    let config = config::load_from_file(Some(path.to_path_buf()))
        .expect("Failed to load config from JSON file");

    assert_eq!(config.base_url, "https://splunk.example.com:8089");
    assert_eq!(config.timeout_secs, 45);
    assert!(!config.verify_tls);
    assert_eq!(config.auth.credentials(), Some(("admin", "changeme")));
    assert_eq!(config.auth.scheme(), "Splunk");
}

#[test]
fn test_load_config_from_toml_file() {
    let toml_content = r#"
base_url = "https://itsi.internal:8089"
user_agent = "itsi-client-tests"

[auth]
token = "eyJhbGciOi"
session_scheme = "Bearer"
"#;
    let path = write_config(toml_content, "toml");

    let config = config::load_from_file(Some(path.to_path_buf()))
        .expect("Failed to load config from TOML file");

    assert_eq!(config.base_url, "https://itsi.internal:8089");
    assert_eq!(config.user_agent.as_deref(), Some("itsi-client-tests"));
    assert!(config.verify_tls);
    assert_eq!(config.auth.token(), Some("eyJhbGciOi"));
    assert_eq!(config.auth.scheme(), "Bearer");
}

#[test]
fn test_load_config_missing_file() {
    let err = config::load_from_file(Some("/nonexistent/itsi.json".into())).unwrap_err();
    assert!(matches!(err, ItsiError::Config(ref message) if message.contains("not found")));
}

#[test]
fn test_load_config_invalid_json() {
    let path = write_config("{ \"base_url\": ", "json");

    let err = config::load_from_file(Some(path.to_path_buf())).unwrap_err();
    assert!(matches!(err, ItsiError::Config(_)));
}

#[test]
fn test_load_config_invalid_toml() {
    let path = write_config("base_url = [unterminated", "toml");

    let err = config::load_from_file(Some(path.to_path_buf())).unwrap_err();
    assert!(matches!(err, ItsiError::Config(_)));
}

#[test]
fn test_load_config_unsupported_format() {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file.write_all(b"base_url: https://x").expect("Failed to write to temp file");
    let path = temp_file.path().with_extension("yaml");
    std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");

    let err = config::load_from_file(Some(path.clone())).unwrap_err();
    assert!(matches!(err, ItsiError::Config(ref message) if message.contains("Unsupported")));

    std::fs::remove_file(path).ok();
}
