//! File tree payload of `mount-files`.
//!
//! ```json
//! {
//!   "package.json": { "file": { "contents": "{...}" } },
//!   "src": { "directory": { "index.js": { "file": { "contents": "..." } } } }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTree(BTreeMap<String, FileNode>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNode {
    File { contents: String },
    Directory(FileTree),
}

/// One flattened node, with its `/`-joined path relative to the tree root.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEntry<'a> {
    Directory(String),
    File { path: String, contents: &'a str },
}

impl FileTree {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder helper for a file entry.
    #[cfg(test)]
    pub fn with_file(mut self, name: &str, contents: &str) -> Self {
        let node = FileNode::File {
            contents: contents.to_string(),
        };
        self.0.insert(name.to_string(), node);
        self
    }

    /// Builder helper for a directory entry.
    #[cfg(test)]
    pub fn with_dir(mut self, name: &str, tree: FileTree) -> Self {
        self.0.insert(name.to_string(), FileNode::Directory(tree));
        self
    }

    /// Depth-first flattening; a directory always precedes its children.
    pub fn entries(&self) -> Vec<TreeEntry<'_>> {
        let mut out = Vec::new();
        self.collect("", &mut out);
        out
    }

    fn collect<'a>(&'a self, prefix: &str, out: &mut Vec<TreeEntry<'a>>) {
        for (name, node) in &self.0 {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            match node {
                FileNode::File { contents } => out.push(TreeEntry::File {
                    path,
                    contents: contents.as_str(),
                }),
                FileNode::Directory(tree) => {
                    out.push(TreeEntry::Directory(path.clone()));
                    tree.collect(&path, out);
                }
            }
        }
    }
}
