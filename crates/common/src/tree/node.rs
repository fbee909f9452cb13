use chrono::{DateTime, Utc};

use crate::node::{NodeKind, NodeMetadata};

use super::TreeError;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct FileNode {
    metadata: NodeMetadata,
    path: String,
}

#[derive(Debug, Clone)]
pub struct FolderNode {
    metadata: NodeMetadata,
    path: String,
}

/// A resolved node together with the public path it was reached by
#[derive(Debug, Clone)]
pub enum Node {
    File(FileNode),
    Folder(FolderNode),
}

impl Node {
    pub fn from_metadata(metadata: NodeMetadata, path: impl Into<String>) -> Result<Self, TreeError> {
        let path = path.into();
        match metadata.kind {
            NodeKind::File => Ok(Node::File(FileNode { metadata, path })),
            NodeKind::Folder => Ok(Node::Folder(FolderNode { metadata, path })),
            NodeKind::Other => Err(TreeError::UnsupportedKind {
                id: metadata.id,
                path,
            }),
        }
    }

    pub fn metadata(&self) -> &NodeMetadata {
        match self {
            Node::File(f) => &f.metadata,
            Node::Folder(d) => &d.metadata,
        }
    }

    pub fn into_metadata(self) -> NodeMetadata {
        match self {
            Node::File(f) => f.metadata,
            Node::Folder(d) => d.metadata,
        }
    }

    /// Public path (relative to the sandbox)
    pub fn path(&self) -> &str {
        match self {
            Node::File(f) => &f.path,
            Node::Folder(d) => &d.path,
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata().id
    }

    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    /// Content length; folders report 0
    pub fn size(&self) -> u64 {
        match self {
            Node::File(f) => f.metadata.size().unwrap_or(0),
            Node::Folder(_) => 0,
        }
    }

    pub fn etag(&self) -> Option<&str> {
        self.metadata().etag.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            Node::File(f) => Some(f.metadata.content_type().unwrap_or(DEFAULT_CONTENT_TYPE)),
            Node::Folder(_) => None,
        }
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.metadata().modified_at
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Node::Folder(_))
    }

    pub fn supports_stream(&self) -> bool {
        matches!(self, Node::File(_))
    }
}
