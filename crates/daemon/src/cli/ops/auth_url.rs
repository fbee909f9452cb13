use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::auth::{AuthError, AuthSession};
use clouddav_daemon::StateError;

/// Print the URL to visit to authorize this client
#[derive(Args, Debug, Clone)]
pub struct AuthUrl;

#[derive(Debug)]
pub struct AuthUrlOutput {
    pub url: url::Url,
    pub response_type: &'static str,
}

impl fmt::Display for AuthUrlOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "Open this URL to authorize clouddav:".bold())?;
        writeln!(f, "  {}", self.url)?;
        let next = match self.response_type {
            "code" => "clouddav login --code <code>",
            _ => "clouddav login --access-token <token> --expires-in <seconds>",
        };
        write!(f, "{} {}", "Then run:".dimmed(), next)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthUrlError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("client id, scope and redirect URI must all be configured")]
    Incomplete,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for AuthUrl {
    type Error = AuthUrlError;
    type Output = AuthUrlOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;
        let session = AuthSession::new(state.config.auth)?;
        let url = session.generate_auth_url().ok_or(AuthUrlError::Incomplete)?;
        Ok(AuthUrlOutput {
            url,
            response_type: session.config().response_type(),
        })
    }
}
