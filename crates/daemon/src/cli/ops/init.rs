use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use clouddav_daemon::config::{DEFAULT_CLIENT_ID, DEFAULT_REDIRECT_URI, DEFAULT_SCOPE};
use clouddav_daemon::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// OAuth2 client id
    #[arg(long, default_value = DEFAULT_CLIENT_ID)]
    pub client_id: String,

    /// OAuth2 client secret; enables the authorization code grant
    #[arg(long)]
    pub client_secret: Option<String>,

    /// OAuth2 scope
    #[arg(long, default_value = DEFAULT_SCOPE)]
    pub scope: String,

    /// Redirect URI registered for the client
    #[arg(long, default_value = DEFAULT_REDIRECT_URI)]
    pub redirect_uri: String,

    /// Remote folder to expose as `/`
    #[arg(long, default_value = "/")]
    pub base_path: String,

    /// Metadata cache directory (defaults to <config dir>/cache)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct InitOutput {
    pub app_dir: PathBuf,
    pub config_path: PathBuf,
    pub cache_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub base_path: String,
    pub response_type: &'static str,
}

impl fmt::Display for InitOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} clouddav at {}",
            "Initialized".green().bold(),
            self.app_dir.display().to_string().bold()
        )?;
        writeln!(f, "  {} {}", "Config:".dimmed(), self.config_path.display())?;
        writeln!(f, "  {} {}", "Cache:".dimmed(), self.cache_dir.display())?;
        writeln!(
            f,
            "  {} {}",
            "Credentials:".dimmed(),
            self.credentials_path.display()
        )?;
        writeln!(f, "  {} {}", "Base path:".dimmed(), self.base_path)?;
        write!(f, "  {} {}", "Grant:".dimmed(), self.response_type)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = InitOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig {
            base_path: self.base_path.clone(),
            storage_dir: self.storage_dir.clone(),
            ..AppConfig::default()
        };
        config.auth.client_id = self.client_id.clone();
        config.auth.scope = self.scope.clone();
        config.auth.redirect_uri = self.redirect_uri.clone();
        config.auth.client_secret = self.client_secret.clone();

        let state = AppState::init(ctx.config_dir.clone(), Some(config))?;

        Ok(InitOutput {
            response_type: state.config.auth.response_type(),
            base_path: state.config.base_path,
            app_dir: state.app_dir,
            config_path: state.config_path,
            cache_dir: state.cache_dir,
            credentials_path: state.credentials_path,
        })
    }
}
