use std::fmt;

use clap::Args;
use comfy_table::Table;

use common::tree::{Node, TreeError};

use crate::cli::op::ContextError;

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Path to list (defaults to the sandbox root)
    #[arg(default_value = "/")]
    pub path: String,
}

#[derive(Debug)]
pub struct LsItem {
    pub is_dir: bool,
    pub name: String,
    pub size: u64,
    pub modified: Option<String>,
}

impl From<&Node> for LsItem {
    fn from(node: &Node) -> Self {
        Self {
            is_dir: node.is_container(),
            name: node.name().to_string(),
            size: node.size(),
            modified: node
                .modified_at()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string()),
        }
    }
}

#[derive(Debug)]
pub struct LsOutput {
    pub items: Vec<LsItem>,
}

impl fmt::Display for LsOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.items.is_empty() {
            return write!(f, "No items found");
        }

        let mut table = Table::new();
        table.set_header(vec!["TYPE", "NAME", "SIZE", "MODIFIED"]);
        for item in &self.items {
            let type_str = if item.is_dir { "dir" } else { "file" };
            table.add_row(vec![
                type_str.to_string(),
                item.name.clone(),
                if item.is_dir {
                    "-".to_string()
                } else {
                    item.size.to_string()
                },
                item.modified.clone().unwrap_or_else(|| "-".to_string()),
            ]);
        }
        write!(f, "{table}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LsError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Ls {
    type Error = LsError;
    type Output = LsOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let node = services.tree().resolve(&self.path).await?;

        let items = if node.is_container() {
            let mut children = services.tree().list_children(&node).await?;
            children.sort_by(|a, b| {
                b.is_container()
                    .cmp(&a.is_container())
                    .then_with(|| a.name().cmp(b.name()))
            });
            children.iter().map(LsItem::from).collect()
        } else {
            vec![LsItem::from(&node)]
        };

        services.shutdown().await.map_err(ContextError::from)?;
        Ok(LsOutput { items })
    }
}
