//! Configuration loader
//!
//! Loads [`CoreConfig`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If a required variable is missing, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `KEYLINE_TOKEN_URL`: OAuth2 token endpoint (required)
//! - `KEYLINE_CLIENT_ID`: Client id (required)
//! - `KEYLINE_CLIENT_SECRET`: Client secret (required)
//! - `KEYLINE_API_URL`: Resource API base URL (default `http://localhost:5000`)
//! - `KEYLINE_MAX_CONCURRENCY`: Concurrent call limit (default 10)
//! - `KEYLINE_CIRCUIT_THRESHOLD`: Failures before the circuit opens (default 5)
//! - `KEYLINE_CIRCUIT_RESET_SECS`: Open-circuit cooldown in seconds (default 60)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./keyline.json` or `./keyline.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. The same names next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;

use keyline_common::error::ConfigError;
use thiserror::Error;

use super::settings::CoreConfig;

pub const ENV_TOKEN_URL: &str = "KEYLINE_TOKEN_URL";
pub const ENV_CLIENT_ID: &str = "KEYLINE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "KEYLINE_CLIENT_SECRET";
pub const ENV_API_URL: &str = "KEYLINE_API_URL";
pub const ENV_MAX_CONCURRENCY: &str = "KEYLINE_MAX_CONCURRENCY";
pub const ENV_CIRCUIT_THRESHOLD: &str = "KEYLINE_CIRCUIT_THRESHOLD";
pub const ENV_CIRCUIT_RESET_SECS: &str = "KEYLINE_CIRCUIT_RESET_SECS";

const CONFIG_FILE_NAMES: [&str; 4] = ["keyline.json", "keyline.toml", "config.json", "config.toml"];

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("Config file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("No config file found in any of the standard locations")]
    NoConfigFile,

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {format} format: {message}")]
    Parse { format: &'static str, message: String },

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variable is missing, falls back to loading from a config file. A variable
/// that is present but malformed is reported rather than skipped.
///
/// # Errors
/// Returns [`LoadError`] if neither source yields a valid configuration.
pub fn load() -> Result<CoreConfig, LoadError> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(LoadError::MissingEnv(key)) => {
            tracing::debug!(missing = key, "Environment incomplete, trying file");
            load_from_file(None)
        }
        Err(e) => Err(e),
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns [`LoadError::MissingEnv`] if a required variable is unset or
/// empty, and [`LoadError::InvalidValue`] if a numeric variable does not
/// parse.
pub fn load_from_env() -> Result<CoreConfig, LoadError> {
    load_from_lookup(|key| std::env::var(key).ok())
}

/// Load configuration through an arbitrary variable lookup
///
/// [`load_from_env`] passes the process environment; tests pass a map.
///
/// # Errors
/// Same as [`load_from_env`].
pub fn load_from_lookup<F>(lookup: F) -> Result<CoreConfig, LoadError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let required = |key: &'static str| var(key).ok_or(LoadError::MissingEnv(key));

    let mut config = CoreConfig::new(
        required(ENV_TOKEN_URL)?,
        required(ENV_CLIENT_ID)?,
        required(ENV_CLIENT_SECRET)?,
    );

    if let Some(api_url) = var(ENV_API_URL) {
        config.api_url = api_url;
    }
    if let Some(value) = var(ENV_MAX_CONCURRENCY) {
        config.max_concurrency = parse_number(ENV_MAX_CONCURRENCY, &value)?;
    }
    if let Some(value) = var(ENV_CIRCUIT_THRESHOLD) {
        config.circuit_threshold = parse_number(ENV_CIRCUIT_THRESHOLD, &value)?;
    }
    if let Some(value) = var(ENV_CIRCUIT_RESET_SECS) {
        config.circuit_reset_secs = parse_number(ENV_CIRCUIT_RESET_SECS, &value)?;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns [`LoadError`] if the file is missing, unreadable, malformed or
/// fails validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<CoreConfig, LoadError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(LoadError::FileNotFound { path: p });
            }
            p
        }
        None => probe_config_paths().ok_or(LoadError::NoConfigFile)?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|source| LoadError::Read { path: config_path.clone(), source })?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<CoreConfig, LoadError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| LoadError::Parse { format: "TOML", message: e.to_string() }),
        "json" => serde_json::from_str(contents)
            .map_err(|e| LoadError::Parse { format: "JSON", message: e.to_string() }),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

/// Probe the standard locations for a configuration file
///
/// Returns the first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    probe_in(&dirs)
}

fn probe_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, LoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| LoadError::InvalidValue { key, message: e.to_string() })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        (ENV_TOKEN_URL, "https://auth.example.com/token"),
        (ENV_CLIENT_ID, "c1"),
        (ENV_CLIENT_SECRET, "s1"),
    ];

    #[test]
    fn test_load_from_lookup_defaults() {
        let config = load_from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.token_url, "https://auth.example.com/token");
        assert_eq!(config.client_id, "c1");
        assert_eq!(config.api_url, "http://localhost:5000");
        assert_eq!(config.max_concurrency, 10);
    }

    #[test]
    fn test_load_from_lookup_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            (ENV_API_URL, "https://api.example.com"),
            (ENV_MAX_CONCURRENCY, "4"),
            (ENV_CIRCUIT_THRESHOLD, "3"),
            (ENV_CIRCUIT_RESET_SECS, "15"),
        ]);

        let config = load_from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.circuit_threshold, 3);
        assert_eq!(config.circuit_reset_secs, 15);
    }

    #[test]
    fn test_load_from_lookup_missing_and_empty() {
        let err = load_from_lookup(lookup(&REQUIRED[..2])).unwrap_err();
        assert!(matches!(err, LoadError::MissingEnv(ENV_CLIENT_SECRET)));

        let mut vars = REQUIRED.to_vec();
        vars[1] = (ENV_CLIENT_ID, "  ");
        let err = load_from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, LoadError::MissingEnv(ENV_CLIENT_ID)));
    }

    #[test]
    fn test_load_from_lookup_invalid_number() {
        let mut vars = REQUIRED.to_vec();
        vars.push((ENV_MAX_CONCURRENCY, "lots"));

        let err = load_from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, LoadError::InvalidValue { key: ENV_MAX_CONCURRENCY, .. }));
    }

    #[test]
    fn test_load_from_lookup_rejects_zero_threshold() {
        let mut vars = REQUIRED.to_vec();
        vars.push((ENV_CIRCUIT_THRESHOLD, "0"));

        let err = load_from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, LoadError::Invalid(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_parse_config_json() {
        let json_content = r#"{
            "token_url": "https://auth.example.com/token",
            "client_id": "c1",
            "client_secret": "s1",
            "api_url": "https://api.example.com",
            "retry_scope": "idempotent_only"
        }"#;

        let config = parse_config(json_content, Path::new("keyline.json")).unwrap();
        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.retry_scope, crate::http::RetryScope::IdempotentOnly);
    }

    #[test]
    fn test_parse_config_toml_with_aliases() {
        let toml_content = r#"
token_endpoint = "https://auth.example.com/token"
client_id = "c1"
client_secret = "s1"
base_url = "https://api.example.com"
circuit_threshold = 7
"#;

        let config = parse_config(toml_content, Path::new("keyline.toml")).unwrap();
        assert_eq!(config.token_url, "https://auth.example.com/token");
        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.circuit_threshold, 7);
    }

    #[test]
    fn test_parse_config_unsupported_format() {
        let result = parse_config("some content", Path::new("keyline.yaml"));
        assert!(matches!(result, Err(LoadError::UnsupportedFormat(ext)) if ext == "yaml"));
    }

    #[test]
    fn test_probe_prefers_keyline_over_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "").unwrap();
        std::fs::write(dir.path().join("keyline.toml"), "").unwrap();

        let found = probe_in(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found, dir.path().join("keyline.toml"));
    }

    #[test]
    fn test_probe_returns_none_when_missing() {
        let dir = TempDir::new().unwrap();
        assert!(probe_in(&[dir.path().to_path_buf()]).is_none());
    }
}
