//! Node metadata as served by the remote drive and persisted by the metadata cache
//!
//! The remote only ever reports a node's parents. The `children` map is
//! maintained locally by [`crate::cache::MetadataCache`] and inherited across
//! updates, so it is a hint rather than an authoritative listing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, stable node identity assigned by the remote
pub type NodeId = String;

/// Kind of a remote node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKind {
    File,
    Folder,
    /// Anything else the remote knows about (assets, groups, ...)
    #[serde(other)]
    Other,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "FILE",
            NodeKind::Folder => "FOLDER",
            NodeKind::Other => "OTHER",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a remote node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    #[default]
    Available,
    Trash,
    Purged,
    #[serde(other)]
    Unknown,
}

/// Content properties, only present on files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

/// Metadata for a single node
///
/// Field names follow the remote wire format so that records can be written
/// to the cache exactly as they were received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Empty for the root folder
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "parents")]
    pub parent_ids: BTreeSet<NodeId>,
    /// child id → child name, maintained locally
    #[serde(default)]
    pub children: BTreeMap<NodeId, String>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_properties: Option<ContentProperties>,
    #[serde(
        default,
        rename = "eTagResponse",
        skip_serializing_if = "Option::is_none"
    )]
    pub etag: Option<String>,
    #[serde(default, rename = "modifiedDate", skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_root: bool,
}

impl NodeMetadata {
    /// Create an available node with no parents
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            parent_ids: BTreeSet::new(),
            children: BTreeMap::new(),
            status: NodeStatus::Available,
            content_properties: None,
            etag: None,
            modified_at: None,
            version: 0,
            is_root: false,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<NodeId>) -> Self {
        self.parent_ids.insert(parent_id.into());
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether the node should disappear from the cache
    pub fn is_removed(&self) -> bool {
        matches!(self.status, NodeStatus::Trash | NodeStatus::Purged)
    }

    /// Parents to link against; removed nodes link to nothing
    pub fn effective_parents(&self) -> BTreeSet<NodeId> {
        if self.is_removed() {
            BTreeSet::new()
        } else {
            self.parent_ids.clone()
        }
    }

    /// Id of the child called `name`, according to the local children map
    pub fn child_id(&self, name: &str) -> Option<&NodeId> {
        self.children
            .iter()
            .find(|(_, child_name)| child_name.as_str() == name)
            .map(|(id, _)| id)
    }

    pub fn size(&self) -> Option<u64> {
        self.content_properties.as_ref().and_then(|c| c.size)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_properties
            .as_ref()
            .and_then(|c| c.content_type.as_deref())
    }
}

/// Change-feed progress token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(String);

impl Checkpoint {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
