use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::tree::TreeError;

use crate::cli::op::ContextError;

/// Move (and optionally rename) a file or folder
#[derive(Args, Debug, Clone)]
pub struct Mv {
    pub source: String,
    pub destination: String,
}

#[derive(Debug)]
pub struct MvOutput {
    pub source: String,
    pub destination: String,
}

impl fmt::Display for MvOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            "Moved".green().bold(),
            self.source,
            "->".dimmed(),
            self.destination.bold()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MvError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mv {
    type Error = MvError;
    type Output = MvOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let node = services
            .tree()
            .move_node(&self.source, &self.destination)
            .await?;
        services.shutdown().await.map_err(ContextError::from)?;

        Ok(MvOutput {
            source: self.source.clone(),
            destination: node.path().to_string(),
        })
    }
}
