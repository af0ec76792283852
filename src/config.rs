//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

/// Record server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Port the record API listens on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/intake.db"),
            port: 8090,
        }
    }
}

impl ServerConfig {
    /// Build config from `INTAKE_DB_PATH` and `INTAKE_PORT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let db_path = get("INTAKE_DB_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let port: u16 = get("INTAKE_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port);

        Self { db_path, port }
    }
}

/// Wizard host configuration.
#[derive(Debug, Clone)]
pub struct WizardConfig {
    /// Base URL of the record server.
    pub server_url: String,
    /// Local session cache document.
    pub cache_path: PathBuf,
    /// Per-request timeout for record server calls.
    pub http_timeout: Duration,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8090".to_string(),
            cache_path: default_cache_path(std::env::var("HOME").ok()),
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl WizardConfig {
    /// Build config from `INTAKE_SERVER_URL`, `INTAKE_CACHE_PATH`, and
    /// `INTAKE_HTTP_TIMEOUT_SECS`.
    ///
    /// A server URL that is not an absolute http(s) URL is rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server_url = get("INTAKE_SERVER_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "http://127.0.0.1:8090".to_string());
        validate_server_url(&server_url)?;

        let cache_path = get("INTAKE_CACHE_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_cache_path(get("HOME")));

        let timeout_secs: u64 = get("INTAKE_HTTP_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(10);

        Ok(Self {
            server_url,
            cache_path,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn validate_server_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "INTAKE_SERVER_URL".to_string(),
        message,
    };
    let url = Url::parse(raw).map_err(|e| invalid(format!("'{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

fn default_cache_path(home: Option<String>) -> PathBuf {
    let home = home.unwrap_or_else(|| ".".to_string());
    PathBuf::from(home).join(".founder-intake/session.json")
}
