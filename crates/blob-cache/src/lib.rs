//! Persistent blob cache
//!
//! This crate provides the local content cache used between a mount and its
//! registry. Blobs are keyed by digest and stored in pluggable object storage
//! (local filesystem or memory).
//!
//! # Features
//!
//! - Content-addressed: every insert is verified against its digest
//! - No invalidation: content for a digest never changes, entries are only
//!   ever removed to reclaim space
//! - Ranged reads served straight from storage
//!
//! # Example
//!
//! ```rust,no_run
//! use blob_cache::BlobCache;
//! use common::Digest;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), blob_cache::BlobCacheError> {
//! let cache = BlobCache::new_local(Path::new("/tmp/emporous")).await?;
//!
//! let data = b"hello world".to_vec();
//! let digest = Digest::sha256(&data);
//! cache.put(&digest, data.into()).await?;
//!
//! let part = cache.get_range(&digest, 6, 5).await?.unwrap();
//! assert_eq!(part.as_ref(), b"world");
//! # Ok(())
//! # }
//! ```

mod cache;
mod error;
mod storage;

pub use cache::{BlobCache, CacheStats};
pub use error::{BlobCacheError, Result};
pub use storage::{ObjectStoreConfig, Storage};
