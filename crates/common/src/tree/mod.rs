//! Path resolution and path-based mutations over the remote node graph
//!
//! # Architecture
//!
//! The tree exposes the remote drive as a slash-delimited hierarchy rooted at
//! a configured sandbox path. Every public path is first mapped to a remote
//! path (`<sandbox>/<public>`); anything that normalizes to a location outside
//! the sandbox is rejected with [`TreeError::Forbidden`] before the cache or
//! network is touched.
//!
//! Resolution walks segment by segment:
//!
//! - the walk starts from the deepest ancestor the [`PathIndex`] knows about
//!   whose cached record still matches, falling back to the root,
//! - each segment is looked up in the current folder's cached `children` map,
//! - on a miss the remote is queried by parent and name and must return
//!   exactly one match.
//!
//! Every record fetched along the way is written through the
//! [`MetadataCache`], which also links it into its parents' `children` maps so
//! the next walk stays local.
//!
//! Mutations issue the remote request and then reconcile the cache and index.

mod filters;
mod node;
pub mod path_index;

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::Span;

use crate::auth::EndpointKind;
use crate::cache::{MetadataCache, UpdateErrors};
use crate::client::{
    is_retryable, ApiClient, ApiResponse, ClientError, MultipartField, RequestSpec,
};
use crate::node::{NodeKind, NodeMetadata, NodeStatus};

pub use node::{FileNode, FolderNode, Node, DEFAULT_CONTENT_TYPE};
pub use path_index::PathIndex;

/// Coarse error classes for the file-access layer to map onto its own codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Auth,
    TransientNetwork,
    NotFound,
    Forbidden,
    UnsupportedKind,
    Decode,
    CacheIo,
    Protocol,
}

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("access outside the sandbox: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported node kind for {id} at {path}")]
    UnsupportedKind { id: String, path: String },
    #[error("{count} nodes match {path}")]
    Ambiguous { path: String, count: usize },
    #[error("not a folder: {0}")]
    NotAFolder(String),
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Cache(#[from] UpdateErrors),
}

impl TreeError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            TreeError::Forbidden(_) => ErrorClass::Forbidden,
            TreeError::NotFound(_) => ErrorClass::NotFound,
            TreeError::UnsupportedKind { .. } => ErrorClass::UnsupportedKind,
            TreeError::Decode(_) => ErrorClass::Decode,
            TreeError::Cache(_) => ErrorClass::CacheIo,
            TreeError::Client(ClientError::Auth(_)) => ErrorClass::Auth,
            TreeError::Client(ClientError::Transient(_)) => ErrorClass::TransientNetwork,
            TreeError::Client(ClientError::InvalidRequest(_)) => ErrorClass::Protocol,
            TreeError::UnexpectedStatus { status, .. } => match *status {
                StatusCode::NOT_FOUND => ErrorClass::NotFound,
                StatusCode::FORBIDDEN => ErrorClass::Forbidden,
                s if is_retryable(s) => ErrorClass::TransientNetwork,
                _ => ErrorClass::Protocol,
            },
            TreeError::Ambiguous { .. }
            | TreeError::NotAFolder(_)
            | TreeError::NotAFile(_)
            | TreeError::InvalidPath(_) => ErrorClass::Protocol,
        }
    }
}

/// One page of a node query
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeListPage {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub data: Vec<NodeMetadata>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Inclusive byte range for partial downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Concatenate pages until the server stops handing out continuation tokens
///
/// `fetch` gets the previous page's `nextToken` (none for the first page).
/// An empty page also ends the listing.
pub async fn paginate<F, Fut>(mut fetch: F) -> Result<Vec<NodeMetadata>, TreeError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<NodeListPage, TreeError>>,
{
    let mut records = Vec::new();
    let mut start_token = None;
    loop {
        let page = fetch(start_token.take()).await?;
        let empty = page.data.is_empty();
        records.extend(page.data);
        match page.next_token {
            Some(token) if !empty && !token.is_empty() => start_token = Some(token),
            _ => return Ok(records),
        }
    }
}

fn expect_status(response: &ApiResponse, expected: &[StatusCode]) -> Result<(), TreeError> {
    if expected.contains(&response.status) {
        Ok(())
    } else {
        Err(TreeError::UnexpectedStatus {
            status: response.status,
            body: response.text(),
        })
    }
}

#[derive(Debug)]
pub struct Tree {
    client: ApiClient,
    cache: Arc<MetadataCache>,
    base_path: String,
    index: RwLock<PathIndex>,
    span: Span,
}

impl Tree {
    pub fn new(client: ApiClient, cache: Arc<MetadataCache>, base_path: &str) -> Self {
        let base_path = path_index::normalize_path(base_path);
        let span = tracing::info_span!("tree", base = %base_path);
        Self {
            client,
            cache,
            base_path,
            index: RwLock::new(PathIndex::new()),
            span,
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Map a public path to its remote path, enforcing the sandbox
    pub fn real_path(&self, public_path: &str) -> Result<String, TreeError> {
        let joined = format!(
            "{}/{}",
            self.base_path.trim_end_matches('/'),
            public_path.trim_start_matches('/')
        );
        let real = path_index::normalize_path(&joined);
        if path_index::is_within(&real, &self.base_path) {
            Ok(real)
        } else {
            Err(TreeError::Forbidden(public_path.to_string()))
        }
    }

    fn public_path(&self, real_path: &str) -> String {
        if self.base_path == "/" {
            return real_path.to_string();
        }
        path_index::normalize_path(real_path.strip_prefix(&self.base_path).unwrap_or(real_path))
    }

    /* Resolution */

    pub async fn resolve(&self, path: &str) -> Result<Node, TreeError> {
        let real = self.real_path(path)?;
        let metadata = self.resolve_real(&real).await?;
        Node::from_metadata(metadata, self.public_path(&real))
    }

    pub async fn exists(&self, path: &str) -> Result<bool, TreeError> {
        match self.resolve(path).await {
            Ok(_) => Ok(true),
            Err(TreeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn resolve_real(&self, real: &str) -> Result<NodeMetadata, TreeError> {
        let segments: Vec<&str> = path_index::segments(real).collect();
        let (mut current, depth) = self.deepest_cached_ancestor(&segments).await?;

        for i in depth..segments.len() {
            let path = format!("/{}", segments[..=i].join("/"));
            current = self.child(&current, segments[i], &path).await?;
        }
        Ok(current)
    }

    /// Longest indexed prefix of `segments` whose every level is still linked
    /// to the level above it in the cache
    async fn deepest_cached_ancestor(
        &self,
        segments: &[&str],
    ) -> Result<(NodeMetadata, usize), TreeError> {
        let root_id = self.index.read().root_id().map(str::to_string);
        let Some(mut parent_id) = root_id else {
            return Ok((self.root().await?, 0));
        };

        let mut verified = None;
        for depth in 1..=segments.len() {
            let path = format!("/{}", segments[..depth].join("/"));
            let indexed = self.index.read().get_id(&path);
            let Some(id) = indexed else {
                break;
            };
            match self.cache.get_by_id(&id).await {
                Ok(metadata)
                    if !metadata.is_removed()
                        && metadata.name == segments[depth - 1]
                        && metadata.parent_ids.contains(&parent_id) =>
                {
                    parent_id = metadata.id.clone();
                    verified = Some((metadata, depth));
                }
                _ => {
                    tracing::debug!(parent: &self.span, path = %path, id = %id, "stale index entry");
                    self.index.write().remove_prefix(&path);
                    break;
                }
            }
        }

        match verified {
            Some(found) => Ok(found),
            None => Ok((self.root().await?, 0)),
        }
    }

    async fn root(&self) -> Result<NodeMetadata, TreeError> {
        let root_id = self.index.read().root_id().map(str::to_string);
        if let Some(id) = root_id {
            if let Ok(metadata) = self.cache.get_by_id(&id).await {
                return Ok(metadata);
            }
        }

        let metadata = self.query_single(filters::root(), "/").await?;
        let metadata = self.with_cached_children(metadata).await;
        self.write_through(vec![metadata.clone()]).await;
        self.index.write().set_root(metadata.id.clone());
        tracing::debug!(parent: &self.span, id = %metadata.id, "root resolved");
        Ok(metadata)
    }

    async fn child(
        &self,
        parent: &NodeMetadata,
        name: &str,
        path: &str,
    ) -> Result<NodeMetadata, TreeError> {
        if parent.kind != NodeKind::Folder {
            return Err(TreeError::NotFound(self.public_path(path)));
        }

        if let Some(id) = parent.child_id(name) {
            match self.cache.get_by_id(id).await {
                Ok(metadata)
                    if !metadata.is_removed()
                        && metadata.name == name
                        && metadata.parent_ids.contains(&parent.id) =>
                {
                    self.index.write().insert(path, metadata.id.clone());
                    return Ok(metadata);
                }
                _ => tracing::debug!(parent: &self.span, path, id = %id, "stale child link"),
            }
        }

        let metadata = self
            .query_single(filters::child(&parent.id, name), path)
            .await?;
        let metadata = self.with_cached_children(metadata).await;
        self.write_through(vec![metadata.clone()]).await;
        self.index.write().insert(path, metadata.id.clone());
        Ok(metadata)
    }

    async fn query_single(&self, filter: String, path: &str) -> Result<NodeMetadata, TreeError> {
        tracing::debug!(parent: &self.span, path, filter = %filter, "querying remote");
        let spec = RequestSpec::get("nodes").query("filters", filter);
        let response = self.client.execute(EndpointKind::Metadata, &spec).await?;
        expect_status(&response, &[StatusCode::OK])?;

        let mut page: NodeListPage = response.json()?;
        match page.data.len() {
            0 => Err(TreeError::NotFound(self.public_path(path))),
            1 => Ok(page.data.remove(0)),
            count => Err(TreeError::Ambiguous {
                path: self.public_path(path),
                count,
            }),
        }
    }

    /// Carry over the locally maintained children of an already cached record
    async fn with_cached_children(&self, mut metadata: NodeMetadata) -> NodeMetadata {
        if let Ok(cached) = self.cache.get_by_id(&metadata.id).await {
            metadata.children = cached.children;
        }
        metadata
    }

    /// Cache write on a read path; failures are logged, not surfaced
    async fn write_through(&self, nodes: Vec<NodeMetadata>) {
        if let Err(e) = self.cache.update(nodes, None).await {
            tracing::warn!(parent: &self.span, error = %e, "cache write-through failed");
        }
    }

    /// Cache write after a remote mutation
    async fn apply(&self, nodes: Vec<NodeMetadata>) -> Result<(), TreeError> {
        self.cache.update(nodes, None).await?;
        Ok(())
    }

    /* Listing */

    pub async fn list_children(&self, node: &Node) -> Result<Vec<Node>, TreeError> {
        if !node.is_container() {
            return Err(TreeError::NotAFolder(node.path().to_string()));
        }

        let filter = filters::children(node.id());
        let records = paginate(|start_token| {
            let mut spec = RequestSpec::get("nodes").query("filters", filter.clone());
            if let Some(token) = start_token {
                spec = spec.query("startToken", token);
            }
            async move {
                let response = self.client.execute(EndpointKind::Metadata, &spec).await?;
                expect_status(&response, &[StatusCode::OK])?;
                Ok(response.json::<NodeListPage>()?)
            }
        })
        .await?;

        tracing::debug!(parent: &self.span, path = %node.path(), count = records.len(), "listed children");
        self.write_through(records.clone()).await;

        let real_parent = self.real_path(node.path())?;
        let mut children = Vec::with_capacity(records.len());
        for metadata in records {
            let real = path_index::join(&real_parent, &metadata.name);
            let public = self.public_path(&real);
            let id = metadata.id.clone();
            match Node::from_metadata(metadata, public) {
                Ok(child) => {
                    self.index.write().insert(&real, id);
                    children.push(child);
                }
                Err(e) => tracing::debug!(parent: &self.span, error = %e, "skipping child"),
            }
        }
        Ok(children)
    }

    /* Content */

    /// Open the content of a file, optionally restricted to a byte range
    ///
    /// With a range and a known etag the request is made conditional, so a
    /// changed file comes back whole (200) instead of as a stale slice.
    pub async fn get_stream(
        &self,
        node: &Node,
        range: Option<ByteRange>,
    ) -> Result<reqwest::Response, TreeError> {
        if !node.supports_stream() {
            return Err(TreeError::NotAFile(node.path().to_string()));
        }

        let mut spec = RequestSpec::get(format!("nodes/{}/content", node.id()));
        if let Some(range) = range {
            spec = spec.header("Range", range.header_value());
            if let Some(etag) = node.etag() {
                spec = spec.header("If-Range", etag);
            }
        }

        let response = self
            .client
            .execute_streaming(EndpointKind::Content, &spec)
            .await?;
        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(TreeError::UnexpectedStatus { status, body })
        }
    }

    /// Download a whole file into memory
    pub async fn read_all(&self, node: &Node) -> Result<Bytes, TreeError> {
        let response = self.get_stream(node, None).await?;
        let bytes = response.bytes().await.map_err(ClientError::from)?;
        Ok(bytes)
    }

    /// Replace the content of an existing file
    pub async fn put_stream(&self, node: &Node, data: Bytes) -> Result<Node, TreeError> {
        if !node.supports_stream() {
            return Err(TreeError::NotAFile(node.path().to_string()));
        }

        let content_type = node.content_type().unwrap_or(DEFAULT_CONTENT_TYPE);
        let spec = RequestSpec::put(format!("nodes/{}/content", node.id())).multipart(vec![
            MultipartField::file("content", data, node.name(), content_type),
        ]);
        let response = self.client.execute(EndpointKind::Content, &spec).await?;
        expect_status(&response, &[StatusCode::OK])?;

        let metadata: NodeMetadata = response.json()?;
        self.apply(vec![metadata.clone()]).await?;
        tracing::info!(parent: &self.span, path = %node.path(), id = %metadata.id, "content replaced");
        Node::from_metadata(metadata, node.path())
    }

    /* Mutations */

    fn split_target(&self, path: &str) -> Result<(String, String, String), TreeError> {
        let real = self.real_path(path)?;
        let name = path_index::filename(&real).to_string();
        if name.is_empty() || real == self.base_path {
            return Err(TreeError::InvalidPath(path.to_string()));
        }
        let parent = path_index::parent_path(&real);
        Ok((real, parent, name))
    }

    async fn resolve_folder(&self, real: &str) -> Result<NodeMetadata, TreeError> {
        let metadata = self.resolve_real(real).await?;
        if metadata.kind != NodeKind::Folder {
            return Err(TreeError::NotAFolder(self.public_path(real)));
        }
        Ok(metadata)
    }

    pub async fn create_file(
        &self,
        path: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<Node, TreeError> {
        let (real, parent_real, name) = self.split_target(path)?;
        let parent = self.resolve_folder(&parent_real).await?;

        let metadata = json!({
            "name": name,
            "kind": NodeKind::File.as_str(),
            "parents": [parent.id],
        });
        let spec = RequestSpec::post("nodes")
            .query("suppress", "deduplication")
            .multipart(vec![
                MultipartField::text("metadata", metadata.to_string()),
                MultipartField::file(
                    "content",
                    data,
                    name.clone(),
                    content_type.unwrap_or(DEFAULT_CONTENT_TYPE),
                ),
            ]);
        let response = self.client.execute(EndpointKind::Content, &spec).await?;
        expect_status(&response, &[StatusCode::CREATED])?;

        let created: NodeMetadata = response.json()?;
        self.apply(vec![created.clone()]).await?;
        self.index.write().insert(&real, created.id.clone());
        tracing::info!(parent: &self.span, path, id = %created.id, "file created");
        Node::from_metadata(created, self.public_path(&real))
    }

    pub async fn create_directory(&self, path: &str) -> Result<Node, TreeError> {
        let (real, parent_real, name) = self.split_target(path)?;
        let parent = self.resolve_folder(&parent_real).await?;

        let spec = RequestSpec::post("nodes")
            .query("localId", uuid::Uuid::new_v4().to_string())
            .json(json!({
                "name": name,
                "kind": NodeKind::Folder.as_str(),
                "parents": [parent.id],
            }));
        let response = self.client.execute(EndpointKind::Metadata, &spec).await?;
        expect_status(&response, &[StatusCode::CREATED])?;

        let created: NodeMetadata = response.json()?;
        self.apply(vec![created.clone()]).await?;
        self.index.write().insert(&real, created.id.clone());
        tracing::info!(parent: &self.span, path, id = %created.id, "folder created");
        Node::from_metadata(created, self.public_path(&real))
    }

    /// Move a node to the trash
    pub async fn delete(&self, path: &str) -> Result<(), TreeError> {
        let (real, _, _) = self.split_target(path)?;
        let mut metadata = self.resolve_real(&real).await?;

        let spec = RequestSpec::put(format!("trash/{}", metadata.id)).json(json!({
            "kind": metadata.kind.as_str(),
            "name": metadata.name,
        }));
        let response = self.client.execute(EndpointKind::Metadata, &spec).await?;
        expect_status(&response, &[StatusCode::OK])?;

        metadata.status = NodeStatus::Trash;
        let id = metadata.id.clone();
        self.apply(vec![metadata]).await?;
        self.index.write().remove_prefix(&real);
        tracing::info!(parent: &self.span, path, id = %id, "node trashed");
        Ok(())
    }

    /// Change a node's name, keeping it in the same folder
    pub async fn rename(&self, path: &str, new_name: &str) -> Result<Node, TreeError> {
        if new_name.is_empty() || new_name.contains('/') || new_name == "." || new_name == ".." {
            return Err(TreeError::InvalidPath(new_name.to_string()));
        }
        let (real, parent_real, _) = self.split_target(path)?;
        let metadata = self.resolve_real(&real).await?;

        let renamed = self.patch_name(&metadata.id, new_name).await?;
        self.apply(vec![renamed.clone()]).await?;

        let new_real = path_index::join(&parent_real, new_name);
        {
            let mut index = self.index.write();
            index.remove_prefix(&real);
            index.insert(&new_real, renamed.id.clone());
        }
        tracing::info!(parent: &self.span, path, new_name, "node renamed");
        Node::from_metadata(renamed, self.public_path(&new_real))
    }

    async fn patch_name(&self, id: &str, name: &str) -> Result<NodeMetadata, TreeError> {
        let spec = RequestSpec::patch(format!("nodes/{}", id)).json(json!({ "name": name }));
        let response = self.client.execute(EndpointKind::Metadata, &spec).await?;
        expect_status(&response, &[StatusCode::OK])?;
        Ok(response.json()?)
    }

    /// Move (and optionally rename) a node
    ///
    /// Same-folder moves are plain renames. Otherwise the node is re-parented,
    /// renamed if the target name differs, and then fetched again so the cache
    /// sees its authoritative parent set.
    pub async fn move_node(&self, source: &str, destination: &str) -> Result<Node, TreeError> {
        let (src_real, src_parent_real, _) = self.split_target(source)?;
        let (dst_real, dst_parent_real, dst_name) = self.split_target(destination)?;

        if src_real == dst_real {
            return self.resolve(source).await;
        }
        if path_index::is_within(&dst_real, &src_real) {
            return Err(TreeError::InvalidPath(format!(
                "cannot move {} into itself",
                source
            )));
        }
        if src_parent_real == dst_parent_real {
            return self.rename(source, &dst_name).await;
        }

        let metadata = self.resolve_real(&src_real).await?;
        let src_parent = self.resolve_folder(&src_parent_real).await?;
        let dst_parent = self.resolve_folder(&dst_parent_real).await?;

        let spec = RequestSpec::post(format!("nodes/{}/children", dst_parent.id)).json(json!({
            "fromParent": src_parent.id,
            "childId": metadata.id,
        }));
        let response = self.client.execute(EndpointKind::Metadata, &spec).await?;
        expect_status(&response, &[StatusCode::OK, StatusCode::CREATED])?;

        if metadata.name != dst_name {
            self.patch_name(&metadata.id, &dst_name).await?;
        }

        let spec = RequestSpec::get(format!("nodes/{}", metadata.id));
        let response = self.client.execute(EndpointKind::Metadata, &spec).await?;
        expect_status(&response, &[StatusCode::OK])?;
        let moved: NodeMetadata = response.json()?;
        self.apply(vec![moved.clone()]).await?;

        {
            let mut index = self.index.write();
            index.remove_prefix(&src_real);
            index.insert(&dst_real, moved.id.clone());
        }
        tracing::info!(parent: &self.span, source, destination, id = %moved.id, "node moved");
        Node::from_metadata(moved, self.public_path(&dst_real))
    }

    /// Copy a node by downloading and re-uploading it; folders are copied recursively
    pub async fn copy(&self, source: &str, destination: &str) -> Result<Node, TreeError> {
        let src_real = self.real_path(source)?;
        let (dst_real, _, _) = self.split_target(destination)?;
        if path_index::is_within(&dst_real, &src_real) {
            return Err(TreeError::InvalidPath(format!(
                "cannot copy {} into itself",
                source
            )));
        }

        let node = self.resolve(source).await?;
        self.copy_node(node, self.public_path(&dst_real)).await
    }

    fn copy_node(&self, node: Node, destination: String) -> BoxFuture<'_, Result<Node, TreeError>> {
        async move {
            match &node {
                Node::File(_) => {
                    let data = self.read_all(&node).await?;
                    self.create_file(&destination, data, node.content_type())
                        .await
                }
                Node::Folder(_) => {
                    let created = self.create_directory(&destination).await?;
                    for child in self.list_children(&node).await? {
                        let target = path_index::join(&destination, child.name());
                        self.copy_node(child, target).await?;
                    }
                    Ok(created)
                }
            }
        }
        .boxed()
    }
}
