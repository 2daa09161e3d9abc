pub mod scaffold;
pub mod snapshot;

pub use snapshot::{FileSnapshot, build_snapshot, normalize_path};

use std::fs;
use std::io;
use std::path::Path;

/// Directories never loaded into a project tree.
const IGNORED_DIRS: &[&str] = &["node_modules", "dist", "build", "target"];

/// One node of the in-memory project layout as the editor sees it. Node
/// identity is the full slash-separated path ("/src/main.jsx"); directories
/// exist only to group children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    File { path: String, content: String },
    Directory { path: String, children: Vec<TreeNode> },
}

impl TreeNode {
    pub fn path(&self) -> &str {
        match self {
            TreeNode::File { path, .. } => path,
            TreeNode::Directory { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectTree {
    roots: Vec<TreeNode>,
}

impl ProjectTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a tree from disk. Hidden and ignored directories are skipped, as
    /// are files that are not valid UTF-8; the result mirrors what an editor
    /// would hold in memory for this project.
    pub fn from_dir(root: &Path) -> io::Result<Self> {
        let mut roots = Vec::new();
        read_dir_nodes(root, "", &mut roots)?;
        Ok(Self { roots })
    }

    pub fn roots(&self) -> &[TreeNode] {
        &self.roots
    }

    /// Replace the content of an existing file node, or append a new file
    /// node at the root when the path is not present anywhere in the tree.
    pub fn upsert_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        let path = path.into();
        let content = content.into();
        if !update_file(&mut self.roots, &path, &content) {
            self.roots.push(TreeNode::File { path, content });
        }
    }

    /// Remove the node (file or whole directory) with this path. Returns
    /// whether anything was removed.
    pub fn remove(&mut self, path: &str) -> bool {
        remove_node(&mut self.roots, path)
    }

    pub fn file_count(&self) -> usize {
        count_files(&self.roots)
    }
}

fn read_dir_nodes(dir: &Path, prefix: &str, out: &mut Vec<TreeNode>) -> io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let path = format!("{prefix}/{name}");
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if name.starts_with('.') || IGNORED_DIRS.contains(&name) {
                continue;
            }
            let mut children = Vec::new();
            read_dir_nodes(&entry.path(), &path, &mut children)?;
            out.push(TreeNode::Directory { path, children });
        } else if file_type.is_file() {
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue; // binary, not previewable
            };
            out.push(TreeNode::File { path, content });
        }
    }
    Ok(())
}

fn update_file(nodes: &mut [TreeNode], path: &str, content: &str) -> bool {
    for node in nodes.iter_mut() {
        match node {
            TreeNode::File {
                path: existing,
                content: slot,
            } if existing == path => {
                *slot = content.to_string();
                return true;
            }
            TreeNode::Directory { children, .. } => {
                if update_file(children, path, content) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn remove_node(nodes: &mut Vec<TreeNode>, path: &str) -> bool {
    let before = nodes.len();
    nodes.retain(|node| node.path() != path);
    if nodes.len() != before {
        return true;
    }
    nodes.iter_mut().any(|node| match node {
        TreeNode::Directory { children, .. } => remove_node(children, path),
        TreeNode::File { .. } => false,
    })
}

fn count_files(nodes: &[TreeNode]) -> usize {
    nodes
        .iter()
        .map(|node| match node {
            TreeNode::File { .. } => 1,
            TreeNode::Directory { children, .. } => count_files(children),
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> ProjectTree {
        let mut tree = ProjectTree::new();
        tree.roots.push(TreeNode::File {
            path: "/index.html".into(),
            content: "<html></html>".into(),
        });
        tree.roots.push(TreeNode::Directory {
            path: "/src".into(),
            children: vec![
                TreeNode::File {
                    path: "/src/main.jsx".into(),
                    content: "render()".into(),
                },
                TreeNode::File {
                    path: "/src/index.css".into(),
                    content: "body {}".into(),
                },
            ],
        });
        tree
    }

    #[test]
    fn upsert_replaces_nested_file_content() {
        let mut tree = sample_tree();
        tree.upsert_file("/src/main.jsx", "render(2)");
        assert_eq!(tree.file_count(), 3);
        let TreeNode::Directory { children, .. } = &tree.roots()[1] else {
            panic!("expected directory");
        };
        let TreeNode::File { content, .. } = &children[0] else {
            panic!("expected file");
        };
        assert_eq!(content, "render(2)");
    }

    #[test]
    fn upsert_appends_unknown_path() {
        let mut tree = sample_tree();
        tree.upsert_file("/README.md", "hi");
        assert_eq!(tree.file_count(), 4);
    }

    #[test]
    fn remove_drops_whole_directory() {
        let mut tree = sample_tree();
        assert!(tree.remove("/src"));
        assert_eq!(tree.file_count(), 1);
        assert!(!tree.remove("/src"));
    }

    #[test]
    fn remove_drops_nested_file() {
        let mut tree = sample_tree();
        assert!(tree.remove("/src/index.css"));
        assert_eq!(tree.file_count(), 2);
    }

    #[test]
    fn from_dir_skips_ignored_and_binary_entries() {
        let dir = std::env::temp_dir().join(format!("marquee-tree-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::create_dir_all(dir.join("node_modules/react")).unwrap();
        fs::create_dir_all(dir.join(".git")).unwrap();
        fs::write(dir.join("index.html"), "<html></html>").unwrap();
        fs::write(dir.join("src/main.jsx"), "render()").unwrap();
        fs::write(dir.join("src/logo.png"), [0xffu8, 0xfe, 0x00, 0x80]).unwrap();
        fs::write(dir.join("node_modules/react/index.js"), "x").unwrap();
        fs::write(dir.join(".git/HEAD"), "ref").unwrap();

        let tree = ProjectTree::from_dir(&dir).unwrap();
        fs::remove_dir_all(&dir).ok();

        assert_eq!(tree.file_count(), 2);
        let snapshot = build_snapshot(&tree);
        assert_eq!(snapshot.get("/index.html"), Some("<html></html>"));
        assert_eq!(snapshot.get("/src/main.jsx"), Some("render()"));
        assert!(snapshot.get("/node_modules/react/index.js").is_none());
        assert!(snapshot.get("/src/logo.png").is_none());
    }
}
