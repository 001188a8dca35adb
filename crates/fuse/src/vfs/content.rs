//! On-demand blob content for open files.
//!
//! Small blobs are held whole in memory so repeated and concurrent reads of
//! the same file cost one fetch. Large blobs are read by range straight from
//! the client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use common::registry::clamp_range;
use common::{Digest, Node, RegistryClient, RegistryError};
use moka::future::Cache;
use tracing::debug;

/// Configuration for the in-memory content cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentCacheConfig {
    /// Maximum total size of cached blobs in megabytes
    pub max_size_mb: u64,
    /// Blobs larger than this many bytes are never held whole
    pub inline_limit: u64,
}

impl Default for ContentCacheConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 256,
            inline_limit: 16 * 1024 * 1024,
        }
    }
}

/// Content cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentStats {
    pub hits: u64,
    pub misses: u64,
    /// Ranged reads that bypassed the cache
    pub ranged: u64,
    pub entries: u64,
    pub weighted_bytes: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    ranged: AtomicU64,
}

pub struct ContentSource {
    client: Arc<dyn RegistryClient>,
    blobs: Cache<Digest, Bytes>,
    config: ContentCacheConfig,
    counters: Counters,
}

impl ContentSource {
    pub fn new(client: Arc<dyn RegistryClient>, config: ContentCacheConfig) -> Self {
        let blobs = Cache::builder()
            .max_capacity(config.max_size_mb.saturating_mul(1024 * 1024))
            .weigher(|_digest: &Digest, data: &Bytes| -> u32 {
                u32::try_from(data.len()).unwrap_or(u32::MAX)
            })
            .build();

        Self {
            client,
            blobs,
            config,
            counters: Counters::default(),
        }
    }

    pub fn client(&self) -> &Arc<dyn RegistryClient> {
        &self.client
    }

    /// Read up to `length` bytes at `offset` from a blob.
    ///
    /// Reads at or past the declared size return empty bytes without I/O.
    pub async fn read(&self, node: &Node, offset: u64, length: u64) -> Result<Bytes, RegistryError> {
        if length == 0 || offset >= node.size {
            return Ok(Bytes::new());
        }
        let length = length.min(node.size - offset);

        if node.size > self.config.inline_limit {
            self.counters.ranged.fetch_add(1, Ordering::Relaxed);
            debug!(digest = %node.digest, offset, length, "ranged fetch");
            return self.client.fetch(&node.digest, offset, length).await;
        }

        let data = self.whole(&node.digest).await?;
        Ok(data.slice(clamp_range(data.len(), offset, length)))
    }

    /// Full content of a blob, fetched at most once across concurrent callers
    async fn whole(&self, digest: &Digest) -> Result<Bytes, RegistryError> {
        if let Some(data) = self.blobs.get(digest).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(data);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let client = self.client.clone();
        let key = digest.clone();
        self.blobs
            .try_get_with(digest.clone(), async move {
                debug!(digest = %key, "fetching blob");
                client.fetch_all(&key).await
            })
            .await
            .map_err(|e| (*e).clone())
    }

    pub async fn stats(&self) -> ContentStats {
        self.blobs.run_pending_tasks().await;
        ContentStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            ranged: self.counters.ranged.load(Ordering::Relaxed),
            entries: self.blobs.entry_count(),
            weighted_bytes: self.blobs.weighted_size(),
        }
    }

    pub fn invalidate_all(&self) {
        self.blobs.invalidate_all();
    }
}

impl std::fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentSource")
            .field("config", &self.config)
            .field("entries", &self.blobs.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::memory::MemoryRegistry;
    use common::Attributes;

    use super::*;

    fn source(registry: &MemoryRegistry, config: ContentCacheConfig) -> ContentSource {
        ContentSource::new(Arc::new(registry.clone()), config)
    }

    #[tokio::test]
    async fn test_small_blob_fetched_once() {
        let registry = MemoryRegistry::new();
        let node = registry.add_file("a.txt", "hello world", Attributes::new());
        let content = source(&registry, ContentCacheConfig::default());

        assert_eq!(content.read(&node, 0, 5).await.unwrap().as_ref(), b"hello");
        assert_eq!(content.read(&node, 6, 100).await.unwrap().as_ref(), b"world");
        assert_eq!(registry.fetch_calls(), 1);

        let stats = content.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_past_end_skips_fetch() {
        let registry = MemoryRegistry::new();
        let node = registry.add_file("a.txt", "abc", Attributes::new());
        let content = source(&registry, ContentCacheConfig::default());

        assert!(content.read(&node, 3, 10).await.unwrap().is_empty());
        assert!(content.read(&node, 0, 0).await.unwrap().is_empty());
        assert_eq!(registry.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_large_blob_uses_ranges() {
        let registry = MemoryRegistry::new();
        let node = registry.add_file("big.bin", "0123456789", Attributes::new());
        let content = source(
            &registry,
            ContentCacheConfig {
                inline_limit: 4,
                ..Default::default()
            },
        );

        assert_eq!(content.read(&node, 2, 3).await.unwrap().as_ref(), b"234");
        assert_eq!(content.read(&node, 8, 10).await.unwrap().as_ref(), b"89");
        assert_eq!(registry.fetch_calls(), 2);
        assert_eq!(content.stats().await.ranged, 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let registry = MemoryRegistry::new();
        registry.set_fetch_delay(Some(Duration::from_millis(50)));
        let node = registry.add_file("a.txt", "shared content", Attributes::new());
        let content = Arc::new(source(&registry, ContentCacheConfig::default()));

        let reads = (0..8).map(|_| {
            let content = content.clone();
            let node = node.clone();
            async move { content.read(&node, 0, 6).await }
        });
        for result in futures::future::join_all(reads).await {
            assert_eq!(result.unwrap().as_ref(), b"shared");
        }
        assert_eq!(registry.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_not_cached() {
        let registry = MemoryRegistry::new();
        let node = registry.add_file("a.txt", "abc", Attributes::new());
        let content = source(&registry, ContentCacheConfig::default());

        registry.set_fail_fetches(true);
        let err = content.read(&node, 0, 3).await.unwrap_err();
        assert!(matches!(err, RegistryError::Fetch { .. }));

        registry.set_fail_fetches(false);
        assert_eq!(content.read(&node, 0, 3).await.unwrap().as_ref(), b"abc");
    }
}
