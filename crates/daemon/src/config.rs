//! `config.toml` handling

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::auth::AuthConfig;
use common::changes::DEFAULT_POLL_DELAY;
use common::client::{DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT};

pub const DEFAULT_CLIENT_ID: &str = "amzn1.application-oa2-client.154adc9fd7224fac84b1277290c7edae";
pub const DEFAULT_SCOPE: &str = "clouddrive:read_all clouddrive:write";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/signin.html";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_poll_delay_ms() -> u64 {
    DEFAULT_POLL_DELAY.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote folder that every public path is resolved under
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Metadata cache directory; `<app dir>/cache` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
    /// Persisted credentials; `<app dir>/credentials.json` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    pub auth: AuthConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            storage_dir: None,
            credentials_file: None,
            poll_delay_ms: default_poll_delay_ms(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            auth: AuthConfig::new(DEFAULT_CLIENT_ID, DEFAULT_SCOPE, DEFAULT_REDIRECT_URI),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "base_path must be absolute, got {:?}",
                self.base_path
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
