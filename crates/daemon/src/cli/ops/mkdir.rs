use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::tree::TreeError;

use crate::cli::op::ContextError;

#[derive(Args, Debug, Clone)]
pub struct Mkdir {
    pub path: String,
}

#[derive(Debug)]
pub struct MkdirOutput {
    pub path: String,
    pub id: String,
}

impl fmt::Display for MkdirOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            "Created".green().bold(),
            self.path.bold(),
            self.id.dimmed()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MkdirError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mkdir {
    type Error = MkdirError;
    type Output = MkdirOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let node = services.tree().create_directory(&self.path).await?;
        services.shutdown().await.map_err(ContextError::from)?;

        Ok(MkdirOutput {
            path: node.path().to_string(),
            id: node.id().to_string(),
        })
    }
}
