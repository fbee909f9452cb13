use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::auth::{AuthError, AuthGrant, TokenResponse};

use crate::cli::op::ContextError;

/// Install the token obtained from the authorization URL
#[derive(Args, Debug, Clone)]
pub struct Login {
    /// Authorization code (code grant)
    #[arg(long, conflicts_with = "access_token", required_unless_present = "access_token")]
    pub code: Option<String>,

    /// Access token (implicit grant)
    #[arg(long, requires = "expires_in")]
    pub access_token: Option<String>,

    /// Lifetime of the access token in seconds
    #[arg(long)]
    pub expires_in: Option<u64>,

    /// Refresh token, if the redirect carried one
    #[arg(long)]
    pub refresh_token: Option<String>,
}

#[derive(Debug)]
pub struct LoginOutput {
    pub expires_in: Option<u64>,
    pub refreshable: bool,
    pub metadata_url: String,
    pub content_url: String,
}

impl fmt::Display for LoginOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "Logged in".green().bold())?;
        if let Some(expires_in) = self.expires_in {
            writeln!(f, "  {} {}s", "Token lifetime:".dimmed(), expires_in)?;
        }
        writeln!(
            f,
            "  {} {}",
            "Refreshable:".dimmed(),
            if self.refreshable { "yes" } else { "no" }
        )?;
        writeln!(f, "  {} {}", "Metadata:".dimmed(), self.metadata_url)?;
        write!(f, "  {} {}", "Content:".dimmed(), self.content_url)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("login failed: {0}")]
    Auth(#[from] AuthError),
}

impl Login {
    fn grant(&self) -> AuthGrant {
        match &self.code {
            Some(code) => AuthGrant::Code(code.clone()),
            None => AuthGrant::Token(TokenResponse {
                access_token: self.access_token.clone(),
                refresh_token: self.refresh_token.clone(),
                expires_in: self.expires_in,
                ..Default::default()
            }),
        }
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Login {
    type Error = LoginError;
    type Output = LoginOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let session = services.session().clone();

        let token = session.process_token_response(self.grant()).await?;
        let endpoint = session.get_endpoint().await?;
        services.shutdown().await.map_err(ContextError::from)?;

        Ok(LoginOutput {
            expires_in: token.expires_in,
            refreshable: token.refresh_token.is_some(),
            metadata_url: endpoint.metadata_url,
            content_url: endpoint.content_url,
        })
    }
}
