//! Configuration loader
//!
//! Loads connection settings from environment variables or files.
//!
//! ## Loading Strategy
//! 1. Reads a `.env` file from the working directory when one exists
//! 2. Attempts to load from environment variables
//! 3. If `ITSI_BASE_URL` is missing, falls back to a config file
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `ITSI_BASE_URL`: Management endpoint, e.g. `https://splunk:8089` (required)
//! - `ITSI_TOKEN`: Bearer token
//! - `ITSI_SESSION_KEY`: Pre-issued session key
//! - `ITSI_SESSION_SCHEME`: Scheme for session keys (default `Splunk`)
//! - `ITSI_USERNAME` / `ITSI_PASSWORD`: Credentials for session derivation
//! - `ITSI_TIMEOUT_SECS`: Request timeout in seconds
//! - `ITSI_VERIFY_TLS`: Whether to verify certificates (true/false)
//! - `ITSI_USER_AGENT`: User-Agent header override
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./itsi.json` or `./itsi.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. The same names next to the executable

use std::path::{Path, PathBuf};

use itsi_common::mask_secret;
use itsi_domain::{AuthOptions, ConnectionConfig, ItsiError, Result};

use crate::errors::InfraError;

const CONFIG_NAMES: [&str; 4] = ["itsi.json", "itsi.toml", "config.json", "config.toml"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables (after reading any
/// `.env` file). If the base URL is not set, falls back to a config file.
///
/// # Errors
/// Returns `ItsiError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - A value cannot be parsed
pub fn load() -> Result<ConnectionConfig> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) => tracing::debug!(error = %e, "No .env file loaded"),
    }

    match load_from_env() {
        Ok(config) => {
            tracing::info!(base_url = %config.base_url, "Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// Only `ITSI_BASE_URL` is required; everything else keeps its default
/// when unset.
///
/// # Errors
/// Returns `ItsiError::Config` if the base URL is missing or a value is
/// invalid.
pub fn load_from_env() -> Result<ConnectionConfig> {
    let mut config = ConnectionConfig::new(env_var("ITSI_BASE_URL")?);

    if let Some(timeout) = env_opt("ITSI_TIMEOUT_SECS") {
        config.timeout_secs = timeout
            .parse::<u64>()
            .map_err(|e| ItsiError::Config(format!("Invalid timeout: {}", e)))?;
    }
    config.verify_tls = env_bool("ITSI_VERIFY_TLS", config.verify_tls);
    config.user_agent = env_opt("ITSI_USER_AGENT");

    let mut auth = AuthOptions::empty();
    auth.token = env_opt("ITSI_TOKEN");
    auth.session_key = env_opt("ITSI_SESSION_KEY");
    auth.username = env_opt("ITSI_USERNAME");
    auth.password = env_opt("ITSI_PASSWORD");
    if let Some(scheme) = env_opt("ITSI_SESSION_SCHEME") {
        auth.session_scheme = scheme;
    }
    if let Some(token) = auth.token() {
        tracing::debug!(token = %mask_secret(token), "Token configured from environment");
    }
    config.auth = auth;

    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations for config files.
/// Format is chosen by file extension.
///
/// # Errors
/// Returns `ItsiError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid or unsupported
pub fn load_from_file(path: Option<PathBuf>) -> Result<ConnectionConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ItsiError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            ItsiError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| ItsiError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content, dispatching on the extension
/// of `path` (`.json` when there is none).
fn parse_config(contents: &str, path: &Path) -> Result<ConnectionConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents).map_err(|e| ItsiError::from(InfraError::from(e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ItsiError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(ItsiError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe the working directory and then the executable's directory.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Get required environment variable
///
/// # Errors
/// Returns `ItsiError::Config` if the variable is not set or empty.
fn env_var(key: &str) -> Result<String> {
    env_opt(key)
        .ok_or_else(|| ItsiError::Config(format!("Missing required environment variable: {}", key)))
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive).
/// Unset or unrecognised values give `default`.
fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Ok("1" | "true" | "yes" | "on") => true,
        Ok("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
