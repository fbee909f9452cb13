//! Persistent node metadata cache
//!
//! # Layout
//!
//! ```text
//! <storage_dir>/
//!   checkpoint.json          change-feed checkpoint (a bare JSON string)
//!   metadata/<id>.json       one record per cached node
//! </storage_dir>
//! ```
//!
//! File names are derived from node ids with [`record_file_name`].
//!
//! # Parent/child linkage
//!
//! Each record carries both the remote's `parents` set and a locally maintained
//! `children` map (child id → child name). [`MetadataCache::update`] keeps the
//! two in step: for every record it diffs the previous and new parent sets,
//! unlinks the node from parents it left and (re)links it under the parents it
//! has now. Trashed or purged nodes are deleted outright and treated as having
//! no parents, which unlinks them everywhere.
//!
//! All read-modify-write sequences on one id are serialized with a per-id lock
//! held across the whole span; different ids proceed concurrently.

mod locks;

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::Span;

use crate::node::{Checkpoint, NodeId, NodeMetadata};

use locks::IdLocks;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const METADATA_DIR: &str = "metadata";

/// Longest record file stem before the `.json` extension
pub const MAX_FILE_STEM_LEN: usize = 250;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("node not cached: {0}")]
    NotFound(NodeId),
    #[error("storage path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt record {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode record {id}: {source}")]
    Encode {
        id: NodeId,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Every record-level failure from one [`MetadataCache::update`] batch
#[derive(Debug)]
pub struct UpdateErrors(pub Vec<CacheError>);

impl UpdateErrors {
    pub fn errors(&self) -> &[CacheError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UpdateErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cache update error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "; {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for UpdateErrors {}

/// File name a node id is stored under
///
/// Characters that are not safe in file names are replaced with `_`, as are
/// the reserved names `.` and `..`. The stem is then cut to
/// [`MAX_FILE_STEM_LEN`] characters.
pub fn record_file_name(id: &str) -> String {
    let stem: String = if id.is_empty() || id == "." || id == ".." {
        "_".repeat(id.len().max(1))
    } else {
        id.chars()
            .map(|c| match c {
                '/' | '\\' | '?' | '<' | '>' | ':' | '*' | '|' | '"' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .take(MAX_FILE_STEM_LEN)
            .collect()
    };
    format!("{}.json", stem)
}

#[derive(Debug)]
pub struct MetadataCache {
    storage_dir: PathBuf,
    metadata_dir: PathBuf,
    locks: IdLocks,
    span: Span,
}

impl MetadataCache {
    /// Open (creating if needed) a cache rooted at `storage_dir`
    pub async fn open(storage_dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let storage_dir = storage_dir.into();
        match tokio::fs::metadata(&storage_dir).await {
            Ok(meta) if !meta.is_dir() => return Err(CacheError::NotADirectory(storage_dir)),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&storage_dir, e)),
        }

        let metadata_dir = storage_dir.join(METADATA_DIR);
        tokio::fs::create_dir_all(&metadata_dir)
            .await
            .map_err(|e| CacheError::io(&metadata_dir, e))?;

        let span = tracing::info_span!("cache", dir = %storage_dir.display());
        tracing::debug!(parent: &span, "metadata cache opened");

        Ok(Self {
            storage_dir,
            metadata_dir,
            locks: IdLocks::new(),
            span,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.metadata_dir.join(record_file_name(id))
    }

    /* Records */

    pub async fn get_by_id(&self, id: &str) -> Result<NodeMetadata, CacheError> {
        read_json(&self.record_path(id))
            .await?
            .ok_or_else(|| CacheError::NotFound(id.to_string()))
    }

    pub async fn contains(&self, id: &str) -> bool {
        tokio::fs::try_exists(self.record_path(id))
            .await
            .unwrap_or(false)
    }

    /// Delete a record without touching any parent or child links
    ///
    /// Returns whether a record existed.
    pub async fn remove(&self, id: &str) -> Result<bool, CacheError> {
        let _guard = self.locks.lock(id).await;
        remove_file(&self.record_path(id)).await
    }

    /// Read-modify-write a single cached record under its id lock
    ///
    /// Returns `Ok(None)` without calling `mutate` if the record is not cached.
    /// The record is only rewritten if `mutate` changed it.
    pub async fn modify<F>(&self, id: &str, mutate: F) -> Result<Option<NodeMetadata>, CacheError>
    where
        F: FnOnce(&mut NodeMetadata),
    {
        let _guard = self.locks.lock(id).await;
        self.modify_locked(id, mutate).await
    }

    async fn modify_locked<F>(
        &self,
        id: &str,
        mutate: F,
    ) -> Result<Option<NodeMetadata>, CacheError>
    where
        F: FnOnce(&mut NodeMetadata),
    {
        let path = self.record_path(id);
        let Some(original) = read_json::<NodeMetadata>(&path).await? else {
            return Ok(None);
        };

        let mut record = original.clone();
        mutate(&mut record);
        if record != original {
            write_json_atomic(&path, &record, id).await?;
        }
        Ok(Some(record))
    }

    /* Checkpoint */

    pub async fn get_checkpoint(&self) -> Result<Option<Checkpoint>, CacheError> {
        read_json(&self.storage_dir.join(CHECKPOINT_FILE)).await
    }

    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CacheError> {
        let path = self.storage_dir.join(CHECKPOINT_FILE);
        write_json_atomic(&path, checkpoint, CHECKPOINT_FILE).await
    }

    /* Update */

    /// Apply a batch of records and, if all of them applied cleanly, the checkpoint
    ///
    /// Records are processed in order and a failure in one does not stop the
    /// rest; every failure is collected. The checkpoint is left untouched
    /// whenever any error occurred.
    pub async fn update(
        &self,
        nodes: Vec<NodeMetadata>,
        checkpoint: Option<Checkpoint>,
    ) -> Result<(), UpdateErrors> {
        let count = nodes.len();
        let mut errors = Vec::new();
        for node in nodes {
            errors.extend(self.update_one(node).await);
        }

        if !errors.is_empty() {
            tracing::warn!(
                parent: &self.span,
                records = count,
                errors = errors.len(),
                "cache update incomplete, checkpoint withheld"
            );
            return Err(UpdateErrors(errors));
        }

        if let Some(checkpoint) = checkpoint {
            if let Err(e) = self.set_checkpoint(&checkpoint).await {
                return Err(UpdateErrors(vec![e]));
            }
            tracing::debug!(parent: &self.span, checkpoint = %checkpoint, "checkpoint saved");
        }

        tracing::debug!(parent: &self.span, records = count, "cache updated");
        Ok(())
    }

    async fn update_one(&self, mut node: NodeMetadata) -> Vec<CacheError> {
        let mut errors = Vec::new();
        let path = self.record_path(&node.id);
        let _guard = self.locks.lock(&node.id).await;

        let previous = match read_json::<NodeMetadata>(&path).await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(parent: &self.span, id = %node.id, error = %e, "replacing unreadable record");
                None
            }
        };

        // The remote never reports children; keep what we already know
        if node.children.is_empty() {
            if let Some(previous) = &previous {
                node.children = previous.children.clone();
            }
        }

        let old_parents = previous
            .as_ref()
            .map(NodeMetadata::effective_parents)
            .unwrap_or_default();
        let new_parents = node.effective_parents();

        let written = if node.is_removed() {
            remove_file(&path).await.map(|_| ())
        } else {
            write_json_atomic(&path, &node, &node.id).await
        };
        if let Err(e) = written {
            errors.push(e);
            return errors;
        }

        for parent_id in old_parents.difference(&new_parents) {
            if *parent_id == node.id {
                continue;
            }
            let child_id = node.id.clone();
            let result = self
                .modify(parent_id, move |parent| {
                    parent.children.remove(&child_id);
                })
                .await;
            self.record_link_result(result, parent_id, &node.id, "unlink", &mut errors);
        }

        for parent_id in &new_parents {
            if *parent_id == node.id {
                continue;
            }
            let child_id = node.id.clone();
            let child_name = node.name.clone();
            let result = self
                .modify(parent_id, move |parent| {
                    parent.children.insert(child_id, child_name);
                })
                .await;
            self.record_link_result(result, parent_id, &node.id, "link", &mut errors);
        }

        tracing::trace!(
            parent: &self.span,
            id = %node.id,
            removed = node.is_removed(),
            "record applied"
        );
        errors
    }

    fn record_link_result(
        &self,
        result: Result<Option<NodeMetadata>, CacheError>,
        parent_id: &str,
        child_id: &str,
        action: &str,
        errors: &mut Vec<CacheError>,
    ) {
        match result {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(parent: &self.span, parent_id, child_id, action, "parent not cached, skipping");
            }
            Err(e) => {
                tracing::warn!(parent: &self.span, parent_id, child_id, action, error = %e, "parent link update failed");
                errors.push(e);
            }
        }
    }
}

/* File helpers */

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io(path, e)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| CacheError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
    id: &str,
) -> Result<(), CacheError> {
    let data = serde_json::to_vec(value).map_err(|source| CacheError::Encode {
        id: id.to_string(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &data)
        .await
        .map_err(|e| CacheError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| CacheError::io(path, e))
}

async fn remove_file(path: &Path) -> Result<bool, CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
