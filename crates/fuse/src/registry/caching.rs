//! Cache-first content retrieval.

use async_trait::async_trait;
use blob_cache::{BlobCache, BlobCacheError};
use bytes::Bytes;
use common::registry::clamp_range;
use common::{Collection, Digest, Node, RegistryClient, RegistryError};
use moka::future::Cache;
use tracing::{debug, warn};

/// Upper bound on distinct blobs downloaded at once
const MAX_IN_FLIGHT: u64 = 64;

/// Serves blob content from a persistent [`BlobCache`], falling back to the
/// wrapped client on a miss.
///
/// A miss downloads the whole blob, verifies it against its digest and
/// stores it, so later reads of any range, from this mount or a later one,
/// never touch the network. Concurrent misses on one digest share a single
/// download. Graph calls are passed through.
pub struct CachingClient<C> {
    inner: C,
    cache: BlobCache,
    in_flight: Cache<Digest, Bytes>,
}

impl<C: std::fmt::Debug> std::fmt::Debug for CachingClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingClient")
            .field("inner", &self.inner)
            .field("cache", &self.cache)
            .finish()
    }
}

impl<C: RegistryClient> CachingClient<C> {
    pub fn new(inner: C, cache: BlobCache) -> Self {
        Self {
            inner,
            cache,
            in_flight: Cache::builder().max_capacity(MAX_IN_FLIGHT).build(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn cache(&self) -> &BlobCache {
        &self.cache
    }

    /// Download a whole blob and store it
    async fn download(&self, digest: &Digest) -> Result<Bytes, RegistryError> {
        debug!(digest = %digest, "downloading blob");
        let data = self.inner.fetch_all(digest).await?;
        match self.cache.put(digest, data.clone()).await {
            Ok(()) => {}
            Err(BlobCacheError::DigestMismatch(_)) => {
                return Err(RegistryError::fetch(digest, "content does not match digest"));
            }
            Err(e) => warn!(digest = %digest, error = %e, "failed to cache blob"),
        }
        Ok(data)
    }
}

#[async_trait]
impl<C: RegistryClient> RegistryClient for CachingClient<C> {
    async fn resolve(&self, reference: &str) -> Result<Collection, RegistryError> {
        self.inner.resolve(reference).await
    }

    async fn children(&self, node: &Node) -> Result<Vec<Node>, RegistryError> {
        self.inner.children(node).await
    }

    async fn fetch(&self, digest: &Digest, offset: u64, length: u64) -> Result<Bytes, RegistryError> {
        match self.cache.get_range(digest, offset, length).await {
            Ok(Some(data)) => {
                debug!(digest = %digest, offset, len = data.len(), "cache hit");
                return Ok(data);
            }
            Ok(None) => debug!(digest = %digest, "cache miss"),
            Err(e) => warn!(digest = %digest, error = %e, "cache read failed, fetching remotely"),
        }

        let data = self
            .in_flight
            .try_get_with(digest.clone(), self.download(digest))
            .await
            .map_err(|e| (*e).clone());
        // Waiters already hold the bytes and the blob is on disk now
        self.in_flight.invalidate(digest).await;
        let data = data?;

        Ok(data.slice(clamp_range(data.len(), offset, length)))
    }
}

#[cfg(test)]
mod tests {
    use common::memory::MemoryRegistry;
    use common::Attributes;

    use super::*;

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let registry = MemoryRegistry::new();
        let node = registry.add_file("a.txt", "cached content", Attributes::new());
        let client = CachingClient::new(registry.clone(), BlobCache::new_ephemeral().await.unwrap());

        assert_eq!(client.fetch(&node.digest, 0, 6).await.unwrap().as_ref(), b"cached");
        assert_eq!(client.fetch(&node.digest, 7, 100).await.unwrap().as_ref(), b"content");
        assert_eq!(registry.fetch_calls(), 1);
        assert_eq!(client.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_download_once() {
        let registry = MemoryRegistry::new();
        let data: Vec<u8> = (0..64 * 1024).map(|i| (i % 241) as u8).collect();
        let node = registry.add_file("layer.bin", data.clone(), Attributes::new());
        registry.set_fetch_delay(Some(std::time::Duration::from_millis(50)));
        let client = CachingClient::new(registry.clone(), BlobCache::new_ephemeral().await.unwrap());

        let reads = (0..8u64).map(|i| client.fetch(&node.digest, i * 4096, 4096));
        let results = futures::future::join_all(reads).await;

        for (i, result) in results.into_iter().enumerate() {
            let start = i * 4096;
            assert_eq!(result.unwrap().as_ref(), &data[start..start + 4096]);
        }
        assert_eq!(registry.fetch_calls(), 1);
        assert_eq!(client.fetch(&node.digest, 0, 4).await.unwrap().as_ref(), &data[..4]);
        assert_eq!(registry.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_shared_across_clients() {
        let temp_dir = tempfile::tempdir().unwrap();
        let registry = MemoryRegistry::new();
        let node = registry.add_file("a.txt", "persisted", Attributes::new());

        let first = CachingClient::new(
            registry.clone(),
            BlobCache::new_local(temp_dir.path()).await.unwrap(),
        );
        first.fetch_all(&node.digest).await.unwrap();

        let second = CachingClient::new(
            registry.clone(),
            BlobCache::new_local(temp_dir.path()).await.unwrap(),
        );
        assert_eq!(second.fetch_all(&node.digest).await.unwrap().as_ref(), b"persisted");
        assert_eq!(registry.fetch_calls(), 1);
    }

    /// Client returning content that does not hash to the requested digest
    #[derive(Debug)]
    struct Corrupt;

    #[async_trait]
    impl RegistryClient for Corrupt {
        async fn resolve(&self, reference: &str) -> Result<Collection, RegistryError> {
            Err(RegistryError::resolution(reference, "unsupported"))
        }

        async fn children(&self, _node: &Node) -> Result<Vec<Node>, RegistryError> {
            Ok(Vec::new())
        }

        async fn fetch(&self, _digest: &Digest, _offset: u64, _length: u64) -> Result<Bytes, RegistryError> {
            Ok(Bytes::from_static(b"tampered"))
        }
    }

    #[tokio::test]
    async fn test_rejects_corrupt_content() {
        let client = CachingClient::new(Corrupt, BlobCache::new_ephemeral().await.unwrap());
        let digest = Digest::sha256(b"original");

        let err = client.fetch(&digest, 0, 8).await.unwrap_err();
        assert!(matches!(err, RegistryError::Fetch { .. }));
        assert!(!client.cache().has(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_errors_propagate() {
        let registry = MemoryRegistry::new();
        let node = registry.add_file("a.txt", "x", Attributes::new());
        registry.set_fail_fetches(true);
        let client = CachingClient::new(registry, BlobCache::new_ephemeral().await.unwrap());

        assert!(client.fetch(&node.digest, 0, 1).await.is_err());
    }
}
