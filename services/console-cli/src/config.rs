//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The login password is loaded from the MAGAZINE_PASSWORD env var or
//! login.password_file, never stored in the TOML directly.

use common::Secret;
use console_auth::DEV_ENDPOINT;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "magazine-console.toml";

/// Root configuration. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// GraphQL endpoint settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Static headers added to every request
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// Where a remembered session lives
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_credential_file")]
    pub credential_file: PathBuf,
    /// Persist sessions by default, as if `--remember` were always passed
    #[serde(default)]
    pub remember: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginConfig {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    /// Path to a file containing the password (alternative to MAGAZINE_PASSWORD)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout(),
            headers: Vec::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credential_file: default_credential_file(),
            remember: false,
        }
    }
}

fn default_endpoint() -> String {
    DEV_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_credential_file() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("magazine-console").join("session.json")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text.
    ///
    /// Password resolution order:
    /// 1. MAGAZINE_PASSWORD env var
    /// 2. login.password_file
    pub fn parse(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.validate()?;

        if let Ok(password) = std::env::var("MAGAZINE_PASSWORD") {
            config.login.password = Secret::from_trimmed(&password);
        } else if let Some(ref password_file) = config.login.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            config.login.password = Secret::from_trimmed(&password);
        }

        Ok(config)
    }

    /// Apply command-line overrides and re-validate.
    pub fn apply_overrides(
        &mut self,
        endpoint: Option<String>,
        credential_file: Option<PathBuf>,
    ) -> common::Result<()> {
        if let Some(endpoint) = endpoint {
            self.api.endpoint = endpoint;
        }
        if let Some(path) = credential_file {
            self.session.credential_file = path;
        }
        self.validate()
    }

    fn validate(&self) -> common::Result<()> {
        if !self.api.endpoint.starts_with("http://") && !self.api.endpoint.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "endpoint must start with http:// or https://, got: {}",
                self.api.endpoint
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// The password for a non-interactive login.
    pub fn password(&self) -> common::Result<Secret<String>> {
        self.login.password.clone().ok_or_else(|| {
            common::Error::MissingSecret(
                "set MAGAZINE_PASSWORD or login.password_file to sign in".into(),
            )
        })
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    ///
    /// The boolean is true when the path was asked for explicitly, in which
    /// case a missing file is an error rather than an empty config.
    pub fn resolve_path(cli_path: Option<&Path>) -> (PathBuf, bool) {
        if let Some(p) = cli_path {
            return (p.to_path_buf(), true);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return (PathBuf::from(p), true);
        }
        (PathBuf::from(DEFAULT_CONFIG_FILE), false)
    }
}
