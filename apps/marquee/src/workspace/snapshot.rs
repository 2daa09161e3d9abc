use std::collections::BTreeMap;

use super::scaffold;
use super::{ProjectTree, TreeNode};

/// Immutable flat view of a project: normalized path -> file content.
/// Iteration order is deterministic (`BTreeMap`), so two snapshots of the
/// same tree hash and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSnapshot {
    files: BTreeMap<String, String>,
}

impl FileSnapshot {
    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn into_files(self) -> BTreeMap<String, String> {
        self.files
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Insert or replace a file, normalizing the path the same way the
    /// snapshot builder does. Returns the normalized path, or `None` when
    /// the path is malformed and the edit was dropped.
    pub fn upsert(&mut self, path: &str, content: impl Into<String>) -> Option<String> {
        let normalized = normalize_path(path)?;
        self.files.insert(normalized.clone(), content.into());
        Some(normalized)
    }
}

/// Flatten a tree into the exact file set shipped to the sandbox: walk file
/// nodes (the first occurrence of a path wins), drop malformed paths, then
/// fill in scaffold defaults for essential files the project does not
/// provide. Pure function of the tree: calling it twice yields equal
/// snapshots.
pub fn build_snapshot(tree: &ProjectTree) -> FileSnapshot {
    let mut files = BTreeMap::new();
    collect_files(tree.roots(), &mut files);
    scaffold::apply_defaults(&mut files);
    FileSnapshot { files }
}

fn collect_files(nodes: &[TreeNode], files: &mut BTreeMap<String, String>) {
    for node in nodes {
        match node {
            TreeNode::File { path, content } => {
                let Some(normalized) = normalize_path(path) else {
                    tracing::warn!(
                        target = "marquee::workspace",
                        path = %path,
                        "skipping malformed path in project tree"
                    );
                    continue;
                };
                files.entry(normalized).or_insert_with(|| content.clone());
            }
            TreeNode::Directory { children, .. } => collect_files(children, files),
        }
    }
}

/// Normalize an editor path to the canonical snapshot form: forward slashes,
/// a single leading slash, no empty segments. Traversal segments ("..") and
/// empty paths are rejected outright.
pub fn normalize_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let replaced = trimmed.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in replaced.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(format!("/{}", segments.join("/")))
}
