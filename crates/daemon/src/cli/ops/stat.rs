use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::tree::TreeError;

use crate::cli::op::ContextError;

#[derive(Args, Debug, Clone)]
pub struct Stat {
    pub path: String,
}

#[derive(Debug)]
pub struct StatOutput {
    pub path: String,
    pub id: String,
    pub kind: &'static str,
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub modified: Option<String>,
}

impl fmt::Display for StatOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.path.bold())?;
        writeln!(f, "  {} {}", "id:".dimmed(), self.id)?;
        writeln!(f, "  {} {}", "kind:".dimmed(), self.kind)?;
        writeln!(f, "  {} {}", "size:".dimmed(), self.size)?;
        if let Some(content_type) = &self.content_type {
            writeln!(f, "  {} {}", "content type:".dimmed(), content_type)?;
        }
        if let Some(etag) = &self.etag {
            writeln!(f, "  {} {}", "etag:".dimmed(), etag)?;
        }
        write!(
            f,
            "  {} {}",
            "modified:".dimmed(),
            self.modified.as_deref().unwrap_or("-")
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Stat {
    type Error = StatError;
    type Output = StatOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let node = services.tree().resolve(&self.path).await?;
        services.shutdown().await.map_err(ContextError::from)?;

        Ok(StatOutput {
            path: node.path().to_string(),
            id: node.id().to_string(),
            kind: if node.is_container() { "folder" } else { "file" },
            size: node.size(),
            content_type: node.content_type().map(str::to_string),
            etag: node.etag().map(str::to_string),
            modified: node.modified_at().map(|t| t.to_rfc3339()),
        })
    }
}
