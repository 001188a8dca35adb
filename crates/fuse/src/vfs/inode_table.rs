//! Bidirectional inode ↔ path mapping for the projected tree
//!
//! FUSE uses 64-bit inode numbers to identify files and directories.
//! The table is filled while the tree is built and only read afterwards.

use std::collections::HashMap;

/// Bidirectional mapping between inodes and normalised paths
#[derive(Debug)]
pub struct InodeTable {
    /// Path to inode mapping
    path_to_inode: HashMap<String, u64>,
    /// Inode to path mapping, indexed by `inode - 1`
    inode_to_path: Vec<String>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Root inode number (always 1 in FUSE)
    pub const ROOT_INODE: u64 = 1;

    /// Create a new inode table with root pre-registered
    pub fn new() -> Self {
        let mut table = Self {
            path_to_inode: HashMap::new(),
            inode_to_path: Vec::new(),
        };
        table.insert("/");
        table
    }

    /// Register a path, returning its inode.
    ///
    /// Inodes are dense and assigned in insertion order. Inserting a path
    /// twice returns the existing inode.
    pub fn insert(&mut self, path: &str) -> u64 {
        let normalized = Self::normalize_path(path);

        if let Some(&inode) = self.path_to_inode.get(&normalized) {
            return inode;
        }

        let inode = self.inode_to_path.len() as u64 + 1;
        self.path_to_inode.insert(normalized.clone(), inode);
        self.inode_to_path.push(normalized);
        inode
    }

    /// Get the inode for a path if it exists
    pub fn get_inode(&self, path: &str) -> Option<u64> {
        let normalized = Self::normalize_path(path);
        self.path_to_inode.get(&normalized).copied()
    }

    /// Get the path for an inode if it exists
    pub fn get_path(&self, inode: u64) -> Option<&str> {
        let index = usize::try_from(inode.checked_sub(1)?).ok()?;
        self.inode_to_path.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inode_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inode_to_path.is_empty()
    }

    /// All registered paths in inode order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.inode_to_path.iter().map(String::as_str)
    }

    /// Normalize a path to a consistent format
    pub fn normalize_path(path: &str) -> String {
        // Whitespace is significant in names
        if path.is_empty() || path == "/" {
            return "/".to_string();
        }

        // Ensure leading slash, no trailing slash
        let mut normalized = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        while normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }

        normalized
    }

    /// Join a directory path and a child name
    pub fn join(parent: &str, name: &str) -> String {
        let parent = Self::normalize_path(parent);
        if parent == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent, name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_preregistered() {
        let table = InodeTable::new();
        assert_eq!(table.get_inode("/"), Some(InodeTable::ROOT_INODE));
        assert_eq!(table.get_path(InodeTable::ROOT_INODE), Some("/"));
        assert_eq!(table.get_path(0), None);
        assert_eq!(table.get_path(2), None);
    }

    #[test]
    fn test_inodes_follow_insertion_order() {
        let mut table = InodeTable::new();

        let dataset = table.insert("/dataset");
        let again = table.insert("dataset/");
        let sample = table.insert("/dataset/sample.csv");

        assert_eq!(dataset, 2);
        assert_eq!(again, dataset);
        assert_eq!(sample, 3);
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.paths().collect::<Vec<_>>(),
            vec!["/", "/dataset", "/dataset/sample.csv"]
        );
    }

    #[test]
    fn test_whitespace_is_kept() {
        let mut table = InodeTable::new();
        let padded = table.insert("/ notes .txt");
        let plain = table.insert("/notes .txt");

        assert_ne!(padded, plain);
        assert_eq!(table.get_path(padded), Some("/ notes .txt"));
        assert_eq!(InodeTable::normalize_path("/a//"), "/a");
        assert_eq!(InodeTable::normalize_path(""), "/");
    }

    #[test]
    fn test_join() {
        assert_eq!(InodeTable::join("/", "a.txt"), "/a.txt");
        assert_eq!(InodeTable::join("/sub", "b.txt"), "/sub/b.txt");
        assert_eq!(InodeTable::join("sub/", "b.txt"), "/sub/b.txt");
    }
}
