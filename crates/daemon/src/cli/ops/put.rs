use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use clap::Args;
use owo_colors::OwoColorize;

use common::tree::{Node, TreeError};

use crate::cli::op::ContextError;

/// Upload a local file, replacing the remote content if the file exists
#[derive(Args, Debug, Clone)]
pub struct Put {
    /// Local file to upload
    pub local: PathBuf,

    /// Remote destination path
    pub remote: String,

    /// Content type for new files
    #[arg(long)]
    pub content_type: Option<String>,
}

#[derive(Debug)]
pub struct PutOutput {
    pub path: String,
    pub id: String,
    pub size: u64,
    pub replaced: bool,
}

impl fmt::Display for PutOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.replaced { "Replaced" } else { "Uploaded" };
        write!(
            f,
            "{} {} ({} bytes, id {})",
            verb.green().bold(),
            self.path.bold(),
            self.size,
            self.id.dimmed()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Put {
    type Error = PutError;
    type Output = PutOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let data = tokio::fs::read(&self.local)
            .await
            .map_err(|source| PutError::Read {
                path: self.local.clone(),
                source,
            })?;
        let data = Bytes::from(data);

        let services = ctx.services().await?;
        let tree = services.tree();

        let existing = match tree.resolve(&self.remote).await {
            Ok(node) => Some(node),
            Err(TreeError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let (node, replaced) = match existing {
            Some(node @ Node::File(_)) => (tree.put_stream(&node, data).await?, true),
            Some(Node::Folder(_)) => {
                return Err(TreeError::NotAFile(self.remote.clone()).into());
            }
            None => (
                tree.create_file(&self.remote, data, self.content_type.as_deref())
                    .await?,
                false,
            ),
        };
        services.shutdown().await.map_err(ContextError::from)?;

        Ok(PutOutput {
            path: node.path().to_string(),
            id: node.id().to_string(),
            size: node.size(),
            replaced,
        })
    }
}
