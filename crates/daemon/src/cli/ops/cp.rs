use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::tree::TreeError;

use crate::cli::op::ContextError;

/// Copy a file or folder; folders are copied recursively
#[derive(Args, Debug, Clone)]
pub struct Cp {
    pub source: String,
    pub destination: String,
}

#[derive(Debug)]
pub struct CpOutput {
    pub source: String,
    pub destination: String,
    pub id: String,
}

impl fmt::Display for CpOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} ({})",
            "Copied".green().bold(),
            self.source,
            "->".dimmed(),
            self.destination.bold(),
            self.id.dimmed()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CpError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Cp {
    type Error = CpError;
    type Output = CpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let node = services.tree().copy(&self.source, &self.destination).await?;
        services.shutdown().await.map_err(ContextError::from)?;

        Ok(CpOutput {
            source: self.source.clone(),
            destination: node.path().to_string(),
            id: node.id().to_string(),
        })
    }
}
