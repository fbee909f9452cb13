//! On-disk application state: the app directory and its config

use std::path::{Path, PathBuf};

use crate::config::{AppConfig, ConfigError};

pub const APP_DIR_ENV: &str = "CLOUDDAV_DIR";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CACHE_DIR_NAME: &str = "cache";
pub const CREDENTIALS_FILE_NAME: &str = "credentials.json";
pub const LOG_DIR_NAME: &str = "logs";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("could not determine a config directory; pass --config-dir or set {APP_DIR_ENV}")]
    NoConfigDir,
    #[error("already initialized at {0}")]
    AlreadyInitialized(PathBuf),
    #[error("not initialized at {0}; run `clouddav init` first")]
    NotInitialized(PathBuf),
    #[error("failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub app_dir: PathBuf,
    pub config_path: PathBuf,
    pub cache_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub log_dir: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// The app directory: `custom` if given, else the platform config dir
    pub fn app_dir(custom: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(dir) = custom {
            return Ok(dir);
        }
        directories::ProjectDirs::from("", "clouddav", "clouddav")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(StateError::NoConfigDir)
    }

    /// Create the app directory and write `config` (or the defaults) to it
    pub fn init(custom: Option<PathBuf>, config: Option<AppConfig>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom)?;
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Err(StateError::AlreadyInitialized(app_dir));
        }

        let config = config.unwrap_or_default();
        config.validate()?;
        create_dir(&app_dir)?;
        config.save(&config_path)?;

        let state = Self::from_parts(app_dir, config);
        create_dir(&state.cache_dir)?;
        tracing::info!(dir = %state.app_dir.display(), "initialized app directory");
        Ok(state)
    }

    pub fn load(custom: Option<PathBuf>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom)?;
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized(app_dir));
        }
        let config = AppConfig::load(&config_path)?;
        Ok(Self::from_parts(app_dir, config))
    }

    fn from_parts(app_dir: PathBuf, config: AppConfig) -> Self {
        let cache_dir = config
            .storage_dir
            .clone()
            .unwrap_or_else(|| app_dir.join(CACHE_DIR_NAME));
        let credentials_path = config
            .credentials_file
            .clone()
            .unwrap_or_else(|| app_dir.join(CREDENTIALS_FILE_NAME));
        Self {
            config_path: app_dir.join(CONFIG_FILE_NAME),
            log_dir: app_dir.join(LOG_DIR_NAME),
            cache_dir,
            credentials_path,
            app_dir,
            config,
        }
    }
}

fn create_dir(path: &Path) -> Result<(), StateError> {
    std::fs::create_dir_all(path).map_err(|source| StateError::Io {
        path: path.to_path_buf(),
        source,
    })
}
