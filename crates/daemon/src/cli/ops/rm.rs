use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::tree::TreeError;

use crate::cli::op::ContextError;

/// Move a file or folder to the trash
#[derive(Args, Debug, Clone)]
pub struct Rm {
    pub path: String,
}

#[derive(Debug)]
pub struct RmOutput {
    pub path: String,
}

impl fmt::Display for RmOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", "Trashed".yellow().bold(), self.path.bold())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RmError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Rm {
    type Error = RmError;
    type Output = RmOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        services.tree().delete(&self.path).await?;
        services.shutdown().await.map_err(ContextError::from)?;

        Ok(RmOutput {
            path: self.path.clone(),
        })
    }
}
