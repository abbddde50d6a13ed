//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Tokens are never stored in the TOML: the refresh token comes from
//! SESSION_REFRESH_TOKEN or refresh_token_file, the access token only from
//! SESSION_ACCESS_TOKEN.

use common::Secret;
use serde::Deserialize;
use session_auth::{DEFAULT_LOGIN_PATH, DEFAULT_LOGOUT_PATH, DEFAULT_REFRESH_PATH, RefreshMode};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Backend endpoints and per-call timeout
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
}

/// Where credentials live and how the refresh credential travels
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_mode")]
    pub mode: RefreshMode,
    /// Credential file; absent keeps credentials in memory for this run only
    #[serde(default)]
    pub store_file: Option<PathBuf>,
    /// File holding a refresh token to seed the store with (explicit mode)
    #[serde(default)]
    pub refresh_token_file: Option<PathBuf>,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(skip)]
    pub access_token: Option<Secret<String>>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            store_file: None,
            refresh_token_file: None,
            refresh_token: None,
            access_token: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionConfig {
    /// Shown to the user when the session expires
    #[serde(default)]
    pub login_url: Option<String>,
}

fn default_timeout() -> u64 {
    10
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_owned()
}

fn default_login_path() -> String {
    DEFAULT_LOGIN_PATH.to_owned()
}

fn default_logout_path() -> String {
    DEFAULT_LOGOUT_PATH.to_owned()
}

fn default_mode() -> RefreshMode {
    RefreshMode::Cookie
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Refresh token resolution order:
    /// 1. SESSION_REFRESH_TOKEN env var
    /// 2. refresh_token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.backend.base_url.starts_with("http://")
            && !config.backend.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.backend.base_url
            )));
        }

        if config.backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        for (name, value) in [
            ("refresh_path", &config.backend.refresh_path),
            ("login_path", &config.backend.login_path),
            ("logout_path", &config.backend.logout_path),
        ] {
            if !value.starts_with('/') {
                return Err(common::Error::Config(format!(
                    "{name} must start with '/', got: {value}"
                )));
            }
        }

        if let Ok(token) = std::env::var("SESSION_REFRESH_TOKEN") {
            config.credentials.refresh_token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.credentials.refresh_token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read refresh_token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.credentials.refresh_token = Some(Secret::new(token));
            }
        }

        if let Ok(token) = std::env::var("SESSION_ACCESS_TOKEN") {
            let token = Secret::new(token);
            if !token.is_blank() {
                config.credentials.access_token = Some(token);
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-cli.toml")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }
}
