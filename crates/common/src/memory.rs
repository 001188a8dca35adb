//! In-memory registry.
//!
//! Builds collections from literal content for tests and demos, and records
//! how often the graph and content were accessed so callers can assert on
//! cache behaviour.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;

use crate::digest::Digest;
use crate::node::{Attributes, Collection, Node};
use crate::registry::{clamp_range, RegistryClient, RegistryError};

pub const BLOB_MEDIA_TYPE: &str = "application/octet-stream";
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

#[derive(Debug, Default)]
struct Inner {
    blobs: RwLock<HashMap<Digest, Bytes>>,
    children: RwLock<HashMap<Digest, Vec<Node>>>,
    tags: RwLock<HashMap<String, Vec<Node>>>,
    fetch_delay: RwLock<Option<Duration>>,
    fail_fetches: AtomicBool,
    fail_children: AtomicBool,
    fetch_calls: AtomicUsize,
    children_calls: AtomicUsize,
}

/// Registry client backed by in-process maps.
///
/// Clones share state, so a test can keep a handle for inspection after
/// passing the client to a mount.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob and return its node
    pub fn add_blob(&self, data: impl Into<Bytes>, attributes: Attributes) -> Node {
        let data = data.into();
        let digest = Digest::sha256(&data);
        let node = Node::blob(digest.clone(), data.len() as u64, BLOB_MEDIA_TYPE)
            .with_attributes(attributes);
        self.inner.blobs.write().insert(digest, data);
        node
    }

    /// Store a named blob with the given attributes
    pub fn add_file(&self, name: &str, data: impl Into<Bytes>, attributes: Attributes) -> Node {
        let node = self.add_blob(data, attributes);
        node.with_name(name)
    }

    /// Store a manifest listing `children` and return its node.
    ///
    /// The manifest body is a JSON document over the child digests and
    /// attributes, so its digest is derived from its content.
    pub fn add_manifest(&self, children: Vec<Node>, attributes: Attributes) -> Node {
        let body = serde_json::json!({
            "children": children
                .iter()
                .map(|c| serde_json::json!({
                    "digest": c.digest.as_str(),
                    "attributes": Value::Object(c.attributes.clone()),
                }))
                .collect::<Vec<_>>(),
            "attributes": Value::Object(attributes.clone()),
        });
        let body = Bytes::from(body.to_string());
        let digest = Digest::sha256(&body);
        let node = Node::manifest(digest.clone(), body.len() as u64, MANIFEST_MEDIA_TYPE)
            .with_attributes(attributes);

        self.inner.blobs.write().insert(digest.clone(), body);
        self.inner.children.write().insert(digest, children);
        node
    }

    /// Point a reference at one or more root nodes
    pub fn tag(&self, reference: &str, roots: Vec<Node>) {
        self.inner.tags.write().insert(reference.to_string(), roots);
    }

    /// Delay every fetch, simulating a slow network
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.inner.fetch_delay.write() = delay;
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.inner.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_children(&self, fail: bool) {
        self.inner.fail_children.store(fail, Ordering::SeqCst);
    }

    /// Number of content fetches served so far
    pub fn fetch_calls(&self) -> usize {
        self.inner.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of child listings served so far
    pub fn children_calls(&self) -> usize {
        self.inner.children_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn resolve(&self, reference: &str) -> Result<Collection, RegistryError> {
        let roots = self
            .inner
            .tags
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| RegistryError::resolution(reference, "reference not found"))?;
        Ok(Collection::new(reference, roots))
    }

    async fn children(&self, node: &Node) -> Result<Vec<Node>, RegistryError> {
        self.inner.children_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_children.load(Ordering::SeqCst) {
            return Err(RegistryError::traversal(&node.digest, "injected failure"));
        }
        if !node.is_manifest() {
            return Ok(Vec::new());
        }
        self.inner
            .children
            .read()
            .get(&node.digest)
            .cloned()
            .ok_or_else(|| RegistryError::traversal(&node.digest, "manifest not found"))
    }

    async fn fetch(
        &self,
        digest: &Digest,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, RegistryError> {
        self.inner.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.inner.fetch_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.fail_fetches.load(Ordering::SeqCst) {
            return Err(RegistryError::fetch(digest, "injected failure"));
        }

        let data = self
            .inner
            .blobs
            .read()
            .get(digest)
            .cloned()
            .ok_or_else(|| RegistryError::fetch(digest, "blob not found"))?;
        Ok(data.slice(clamp_range(data.len(), offset, length)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_and_traverse() {
        let registry = MemoryRegistry::new();
        let a = registry.add_file("a.txt", "alpha", Attributes::new());
        let b = registry.add_file("b.txt", "beta", Attributes::new());
        let root = registry.add_manifest(vec![a.clone(), b.clone()], Attributes::new());
        registry.tag("localhost/test:latest", vec![root.clone()]);

        let collection = registry.resolve("localhost/test:latest").await.unwrap();
        assert_eq!(collection.roots, vec![root.clone()]);

        let children = registry.children(&root).await.unwrap();
        assert_eq!(children, vec![a.clone(), b]);
        assert!(registry.children(&a).await.unwrap().is_empty());
        assert_eq!(registry.children_calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_ranges() {
        let registry = MemoryRegistry::new();
        let node = registry.add_blob("hello world", Attributes::new());

        let all = registry.fetch_all(&node.digest).await.unwrap();
        assert_eq!(all.as_ref(), b"hello world");
        let part = registry.fetch(&node.digest, 6, 100).await.unwrap();
        assert_eq!(part.as_ref(), b"world");
        let past = registry.fetch(&node.digest, 100, 1).await.unwrap();
        assert!(past.is_empty());
        assert_eq!(registry.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_unknown_reference() {
        let registry = MemoryRegistry::new();
        let err = registry.resolve("nope").await.unwrap_err();
        assert!(matches!(err, RegistryError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let registry = MemoryRegistry::new();
        let node = registry.add_blob("x", Attributes::new());
        let root = registry.add_manifest(vec![node.clone()], Attributes::new());

        registry.set_fail_fetches(true);
        assert!(matches!(
            registry.fetch_all(&node.digest).await,
            Err(RegistryError::Fetch { .. })
        ));

        registry.set_fail_children(true);
        assert!(matches!(
            registry.children(&root).await,
            Err(RegistryError::Traversal { .. })
        ));
    }
}
