use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::tree::TreeError;

use crate::cli::op::ContextError;

/// Rename a file or folder in place
#[derive(Args, Debug, Clone)]
pub struct Rename {
    pub path: String,

    /// New name (a single path segment)
    pub name: String,
}

#[derive(Debug)]
pub struct RenameOutput {
    pub from: String,
    pub to: String,
}

impl fmt::Display for RenameOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            "Renamed".green().bold(),
            self.from,
            "->".dimmed(),
            self.to.bold()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenameError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Rename {
    type Error = RenameError;
    type Output = RenameOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let node = services.tree().rename(&self.path, &self.name).await?;
        services.shutdown().await.map_err(ContextError::from)?;

        Ok(RenameOutput {
            from: self.path.clone(),
            to: node.path().to_string(),
        })
    }
}
