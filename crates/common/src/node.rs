use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::Digest;

/// Annotation key holding a node's declared file name
pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

/// Structured attributes attached to a node
pub type Attributes = serde_json::Map<String, Value>;

/// Whether a node carries content or references other nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Leaf content, projected as a file
    Blob,
    /// Manifest or index with children, projected as a directory
    Manifest,
}

/// A digest-identified unit of a collection.
///
/// Nodes are immutable once constructed; children are obtained from the
/// registry client, not stored on the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub digest: Digest,
    pub size: u64,
    pub media_type: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Node {
    pub fn blob(digest: Digest, size: u64, media_type: impl Into<String>) -> Self {
        Self {
            digest,
            size,
            media_type: media_type.into(),
            kind: NodeKind::Blob,
            attributes: Attributes::new(),
        }
    }

    pub fn manifest(digest: Digest, size: u64, media_type: impl Into<String>) -> Self {
        Self {
            digest,
            size,
            media_type: media_type.into(),
            kind: NodeKind::Manifest,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.attributes
            .insert(TITLE_ANNOTATION.to_string(), Value::String(name.into()));
        self
    }

    /// The declared name of the node, if any
    pub fn name(&self) -> Option<&str> {
        self.attributes.get(TITLE_ANNOTATION).and_then(Value::as_str)
    }

    pub fn is_manifest(&self) -> bool {
        self.kind == NodeKind::Manifest
    }
}

/// Media type of the synthetic node joining several collection roots
pub const MULTI_ROOT_MEDIA_TYPE: &str = "application/vnd.emporous.collection.roots";

/// A resolved collection reference and its root node(s)
#[derive(Debug, Clone)]
pub struct Collection {
    pub reference: String,
    pub roots: Vec<Node>,
}

impl Collection {
    pub fn new(reference: impl Into<String>, roots: Vec<Node>) -> Self {
        Self {
            reference: reference.into(),
            roots,
        }
    }

    /// The node mounted at `/`.
    ///
    /// A single root is mounted directly. Several roots are joined under a
    /// synthetic manifest whose digest is derived from the root digests, so
    /// it is stable for the same collection. Returns `None` for an empty
    /// collection.
    pub fn mount_root(&self) -> Option<Node> {
        match self.roots.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            roots => {
                let joined = roots
                    .iter()
                    .map(|n| n.digest.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(Node::manifest(
                    Digest::sha256(joined.as_bytes()),
                    roots.len() as u64,
                    MULTI_ROOT_MEDIA_TYPE,
                ))
            }
        }
    }

    /// Whether `node` is the synthetic node produced by [`Self::mount_root`]
    pub fn is_synthetic_root(&self, node: &Node) -> bool {
        self.roots.len() > 1 && node.media_type == MULTI_ROOT_MEDIA_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        let node = Node::blob(Digest::sha256(b"a"), 1, "text/plain");
        assert_eq!(node.name(), None);
        let node = node.with_name("a.txt");
        assert_eq!(node.name(), Some("a.txt"));
    }

    #[test]
    fn test_mount_root() {
        let a = Node::manifest(Digest::sha256(b"a"), 1, "m");
        let b = Node::manifest(Digest::sha256(b"b"), 1, "m");

        assert!(Collection::new("empty", vec![]).mount_root().is_none());

        let single = Collection::new("one", vec![a.clone()]);
        assert_eq!(single.mount_root().unwrap(), a);
        assert!(!single.is_synthetic_root(&a));

        let multi = Collection::new("two", vec![a, b]);
        let root = multi.mount_root().unwrap();
        assert!(root.is_manifest());
        assert!(multi.is_synthetic_root(&root));
        // Stable across calls
        assert_eq!(root.digest, multi.mount_root().unwrap().digest);
    }
}
