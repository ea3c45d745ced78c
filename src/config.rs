use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_event_name")]
    pub event_name: String,
    #[serde(default)]
    pub mode: FeedMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    /// Each subscriber owns a timer and triggers its own snapshot builds.
    #[default]
    PerSubscriber,
    /// One ticker builds a snapshot per interval and fans it out.
    Shared,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            feed: FeedConfig::default(),
            provider: ProviderConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            event_name: default_event_name(),
            mode: FeedMode::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl FeedConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o.trim() == "*")
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::Read { source, .. } if source.kind() == ErrorKind::NotFound)
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg = Self::from_yaml(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path_display,
                source,
            },
            other => other,
        })?;
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port socket address".to_string(),
            ));
        }
        if self.feed.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "feed.interval_secs must be >= 1".to_string(),
            ));
        }
        if self.feed.event_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "feed.event_name must not be empty".to_string(),
            ));
        }
        if self.provider.timeout_ms < 1 {
            return Err(ConfigError::Validation(
                "provider.timeout_ms must be >= 1".to_string(),
            ));
        }

        validate_origins(&self.cors.allowed_origins)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_origins(origins: &[String]) -> Result<(), ConfigError> {
    for origin in origins {
        if origin.trim().is_empty() {
            return Err(ConfigError::Validation(
                "cors.allowed_origins[*] must not be empty".to_string(),
            ));
        }
        if HeaderValue::from_str(origin.trim()).is_err() {
            return Err(ConfigError::Validation(format!(
                "cors origin '{origin}' is not a valid header value"
            )));
        }
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

const fn default_interval_secs() -> u64 {
    5
}

fn default_event_name() -> String {
    "datosSistema".to_string()
}

const fn default_timeout_ms() -> u64 {
    3000
}
