//! Digest-keyed cache API over [`Storage`].

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use common::registry::clamp_range;
use common::Digest;
use tracing::{debug, info, warn};

use crate::error::{BlobCacheError, Result};
use crate::storage::{ObjectStoreConfig, Storage};

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

/// BlobCache stores verified blob content keyed by digest.
///
/// Content for a digest is immutable, so entries are never invalidated.
/// Concurrent inserts of the same digest are harmless: both write identical
/// bytes.
#[derive(Debug, Clone)]
pub struct BlobCache {
    storage: Storage,
    counters: Arc<Counters>,
}

impl BlobCache {
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        let storage = Storage::new(config).await?;
        Ok(Self {
            storage,
            counters: Arc::default(),
        })
    }

    /// Create a cache persisted under `cache_dir` (objects at cache_dir/blobs/)
    pub async fn new_local(cache_dir: &Path) -> Result<Self> {
        Self::new(ObjectStoreConfig::Local {
            path: cache_dir.join("blobs"),
        })
        .await
    }

    /// Create a cache that lives only as long as this value
    pub async fn new_ephemeral() -> Result<Self> {
        Self::new(ObjectStoreConfig::Memory).await
    }

    fn key(digest: &Digest) -> String {
        format!("{}/{}", digest.algorithm(), digest.encoded())
    }

    fn record(&self, hit: bool) {
        let counter = if hit {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Verify and store content for a digest
    pub async fn put(&self, digest: &Digest, data: Bytes) -> Result<()> {
        if !digest.verify(&data) {
            warn!(digest = %digest, size = data.len(), "refusing to cache mismatched content");
            return Err(BlobCacheError::DigestMismatch(digest.clone()));
        }

        let size = data.len();
        self.storage.put_data(&Self::key(digest), data).await?;
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);

        debug!(digest = %digest, size = size, "blob cached");
        Ok(())
    }

    pub async fn has(&self, digest: &Digest) -> Result<bool> {
        Ok(self.storage.data_size(&Self::key(digest)).await?.is_some())
    }

    /// Full content for a digest, `None` on a miss
    pub async fn get(&self, digest: &Digest) -> Result<Option<Bytes>> {
        let data = self.storage.get_data(&Self::key(digest)).await?;
        self.record(data.is_some());
        Ok(data)
    }

    /// Bytes `[offset, offset + length)` clamped to the blob, `None` on a miss
    pub async fn get_range(
        &self,
        digest: &Digest,
        offset: u64,
        length: u64,
    ) -> Result<Option<Bytes>> {
        let key = Self::key(digest);
        let Some(size) = self.storage.data_size(&key).await? else {
            self.record(false);
            return Ok(None);
        };

        let data = self
            .storage
            .get_data_range(&key, clamp_range(size, offset, length))
            .await?;
        self.record(data.is_some());
        Ok(data)
    }

    /// Remove a digest to reclaim space. Returns whether it was present.
    pub async fn evict(&self, digest: &Digest) -> Result<bool> {
        let key = Self::key(digest);
        if self.storage.data_size(&key).await?.is_none() {
            return Ok(false);
        }
        self.storage.delete_data(&key).await?;
        info!(digest = %digest, "blob evicted");
        Ok(true)
    }

    /// Number of cached blobs and their total size in bytes
    pub async fn usage(&self) -> Result<(usize, u64)> {
        let entries = self.storage.list_data().await?;
        let total = entries.iter().map(|(_, size)| *size as u64).sum();
        Ok((entries.len(), total))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
        }
    }

    pub fn storage_config(&self) -> &ObjectStoreConfig {
        self.storage.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ephemeral_cache() {
        let cache = BlobCache::new_ephemeral().await.unwrap();
        let data = Bytes::from_static(b"hello world");
        let digest = Digest::sha256(&data);

        assert!(cache.get(&digest).await.unwrap().is_none());
        cache.put(&digest, data.clone()).await.unwrap();
        assert!(cache.has(&digest).await.unwrap());

        let retrieved = cache.get(&digest).await.unwrap().unwrap();
        assert_eq!(retrieved, data);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
    }

    #[tokio::test]
    async fn test_rejects_mismatched_content() {
        let cache = BlobCache::new_ephemeral().await.unwrap();
        let digest = Digest::sha256(b"expected");

        let err = cache
            .put(&digest, Bytes::from_static(b"something else"))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobCacheError::DigestMismatch(d) if d == digest));
        assert!(!cache.has(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_range_clamps() {
        let cache = BlobCache::new_ephemeral().await.unwrap();
        let data = Bytes::from_static(b"0123456789");
        let digest = Digest::sha256(&data);
        cache.put(&digest, data).await.unwrap();

        let part = cache.get_range(&digest, 2, 3).await.unwrap().unwrap();
        assert_eq!(part.as_ref(), b"234");
        let tail = cache.get_range(&digest, 8, 100).await.unwrap().unwrap();
        assert_eq!(tail.as_ref(), b"89");
        let past = cache.get_range(&digest, 10, 5).await.unwrap().unwrap();
        assert!(past.is_empty());

        let missing = Digest::sha256(b"never stored");
        assert!(cache.get_range(&missing, 0, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_cache_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data = Bytes::from_static(b"persisted");
        let digest = Digest::sha256(&data);

        {
            let cache = BlobCache::new_local(temp_dir.path()).await.unwrap();
            cache.put(&digest, data.clone()).await.unwrap();
        }

        let reopened = BlobCache::new_local(temp_dir.path()).await.unwrap();
        assert_eq!(reopened.get(&digest).await.unwrap().unwrap(), data);
        assert_eq!(reopened.usage().await.unwrap(), (1, data.len() as u64));
    }

    #[tokio::test]
    async fn test_evict() {
        let cache = BlobCache::new_ephemeral().await.unwrap();
        let data = Bytes::from_static(b"short lived");
        let digest = Digest::sha256(&data);
        cache.put(&digest, data).await.unwrap();

        assert!(cache.evict(&digest).await.unwrap());
        assert!(!cache.has(&digest).await.unwrap());
        assert!(!cache.evict(&digest).await.unwrap());
    }
}
