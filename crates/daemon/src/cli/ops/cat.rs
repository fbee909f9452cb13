use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::tree::{ByteRange, TreeError};

use crate::cli::op::ContextError;

#[derive(Args, Debug, Clone)]
pub struct Cat {
    /// File to read
    pub path: String,

    /// First byte to read
    #[arg(long)]
    pub offset: Option<u64>,

    /// Number of bytes to read from the offset
    #[arg(long, requires = "offset", value_parser = clap::value_parser!(u64).range(1..))]
    pub length: Option<u64>,
}

#[derive(Debug)]
pub enum CatContent {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug)]
pub struct CatOutput {
    pub path: String,
    pub size: usize,
    pub content: CatContent,
}

impl fmt::Display for CatOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {}  {} {} bytes",
            "File:".dimmed(),
            self.path.bold(),
            "Size:".dimmed(),
            self.size
        )?;
        match &self.content {
            CatContent::Text(text) => write!(f, "{text}"),
            CatContent::Binary(bytes) => {
                let hex = bytes
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(f, "{} {hex}", "Binary content (hex):".dimmed())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("download failed: {0}")]
    Download(#[from] common::client::ClientError),
}

impl Cat {
    /// An end past `u64::MAX` reads to the end of the file
    fn range(&self) -> Option<ByteRange> {
        let start = self.offset?;
        let end = self
            .length
            .and_then(|length| start.checked_add(length.checked_sub(1)?));
        Some(ByteRange { start, end })
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Cat {
    type Error = CatError;
    type Output = CatOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let node = services.tree().resolve(&self.path).await?;

        let bytes = match self.range() {
            None => services.tree().read_all(&node).await?,
            Some(range) => {
                let response = services.tree().get_stream(&node, Some(range)).await?;
                response
                    .bytes()
                    .await
                    .map_err(common::client::ClientError::from)?
            }
        };
        services.shutdown().await.map_err(ContextError::from)?;

        let bytes = bytes.to_vec();
        let content = match String::from_utf8(bytes.clone()) {
            Ok(text) => CatContent::Text(text),
            Err(_) => CatContent::Binary(bytes),
        };

        Ok(CatOutput {
            path: node.path().to_string(),
            size: match &content {
                CatContent::Text(text) => text.len(),
                CatContent::Binary(bytes) => bytes.len(),
            },
            content,
        })
    }
}
