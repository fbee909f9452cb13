//! Bidirectional path ↔ node id index
//!
//! Paths are remote (sandbox-inclusive) paths in normalized form. The index is
//! a lookup shortcut only: entries can go stale and the resolver verifies every
//! hit against the metadata cache before trusting it.

use std::collections::HashMap;

use crate::node::NodeId;

#[derive(Debug, Default)]
pub struct PathIndex {
    path_to_id: HashMap<String, NodeId>,
    id_to_path: HashMap<NodeId, String>,
    root_id: Option<NodeId>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root_id.as_deref()
    }

    pub fn set_root(&mut self, id: impl Into<NodeId>) {
        let id = id.into();
        self.insert("/", id.clone());
        self.root_id = Some(id);
    }

    pub fn get_id(&self, path: &str) -> Option<NodeId> {
        self.path_to_id.get(&normalize_path(path)).cloned()
    }

    pub fn get_path(&self, id: &str) -> Option<&str> {
        self.id_to_path.get(id).map(String::as_str)
    }

    /// Record that `path` currently resolves to `id`
    ///
    /// A node reachable through several parents keeps only its latest path.
    pub fn insert(&mut self, path: &str, id: impl Into<NodeId>) {
        let path = normalize_path(path);
        let id = id.into();

        if let Some(previous_id) = self.path_to_id.insert(path.clone(), id.clone()) {
            if previous_id != id && self.id_to_path.get(&previous_id) == Some(&path) {
                self.id_to_path.remove(&previous_id);
            }
        }
        if let Some(previous_path) = self.id_to_path.insert(id.clone(), path.clone()) {
            if previous_path != path && self.path_to_id.get(&previous_path) == Some(&id) {
                self.path_to_id.remove(&previous_path);
            }
        }
    }

    /// Drop `path` and everything below it; returns how many entries went
    pub fn remove_prefix(&mut self, path: &str) -> usize {
        let path = normalize_path(path);
        if path == "/" {
            let removed = self.path_to_id.len();
            self.clear();
            return removed;
        }

        let nested = format!("{}/", path);
        let doomed: Vec<String> = self
            .path_to_id
            .keys()
            .filter(|p| **p == path || p.starts_with(&nested))
            .cloned()
            .collect();

        for p in &doomed {
            if let Some(id) = self.path_to_id.remove(p) {
                if self.id_to_path.get(&id) == Some(p) {
                    self.id_to_path.remove(&id);
                }
            }
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.path_to_id.clear();
        self.id_to_path.clear();
        self.root_id = None;
    }

    pub fn len(&self) -> usize {
        self.path_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_to_id.is_empty()
    }
}

/// Normalize a path: leading slash, no trailing slash, `.` and `..` folded
///
/// `..` never climbs above `/`.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.trim().split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Non-empty segments of a normalized path
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

pub fn parent_path(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => normalized[..pos].to_string(),
    }
}

pub fn filename(path: &str) -> &str {
    let trimmed = path.trim().trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

pub fn join(base: &str, name: &str) -> String {
    normalize_path(&format!("{}/{}", base, name))
}

/// Whether `path` is `base` or lies underneath it
pub fn is_within(path: &str, base: &str) -> bool {
    base == "/" || path == base || path.starts_with(&format!("{}/", base))
}
