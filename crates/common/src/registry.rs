use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

use crate::digest::Digest;
use crate::node::{Collection, Node};

/// Errors surfaced by a registry client.
///
/// Errors carry messages rather than sources so they can be cloned and handed
/// to every waiter of a coalesced fetch.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid reference {0}")]
    InvalidReference(String),
    #[error("failed to resolve {reference}: {message}")]
    Resolution { reference: String, message: String },
    #[error("failed to list children of {digest}: {message}")]
    Traversal { digest: Digest, message: String },
    #[error("failed to fetch {digest}: {message}")]
    Fetch { digest: Digest, message: String },
}

impl RegistryError {
    pub fn resolution(reference: impl Into<String>, message: impl ToString) -> Self {
        Self::Resolution {
            reference: reference.into(),
            message: message.to_string(),
        }
    }

    pub fn traversal(digest: &Digest, message: impl ToString) -> Self {
        Self::Traversal {
            digest: digest.clone(),
            message: message.to_string(),
        }
    }

    pub fn fetch(digest: &Digest, message: impl ToString) -> Self {
        Self::Fetch {
            digest: digest.clone(),
            message: message.to_string(),
        }
    }
}

/// Graph access and content retrieval for a remote collection.
///
/// Implementations are expected to be cheap to share behind an `Arc` and
/// safe to call concurrently.
#[async_trait]
pub trait RegistryClient: Debug + Send + Sync + 'static {
    /// Resolve a collection reference to its root node(s)
    async fn resolve(&self, reference: &str) -> Result<Collection, RegistryError>;

    /// List the children of a node in declared order.
    ///
    /// Blob nodes have no children.
    async fn children(&self, node: &Node) -> Result<Vec<Node>, RegistryError>;

    /// Fetch bytes `[offset, offset + length)` of a blob.
    ///
    /// The returned buffer is shorter than `length` when the range runs past
    /// the end of the content, and empty when `offset` is at or past it.
    async fn fetch(&self, digest: &Digest, offset: u64, length: u64)
        -> Result<Bytes, RegistryError>;

    /// Fetch the whole content of a blob
    async fn fetch_all(&self, digest: &Digest) -> Result<Bytes, RegistryError> {
        self.fetch(digest, 0, u64::MAX).await
    }
}

/// Clamp `[offset, offset + length)` to a buffer of `len` bytes
pub fn clamp_range(len: usize, offset: u64, length: u64) -> std::ops::Range<usize> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
    let end = usize::try_from(offset.saturating_add(length))
        .unwrap_or(usize::MAX)
        .min(len);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(10, 0, 4), 0..4);
        assert_eq!(clamp_range(10, 8, 4), 8..10);
        assert_eq!(clamp_range(10, 10, 4), 10..10);
        assert_eq!(clamp_range(10, 42, 4), 10..10);
        assert_eq!(clamp_range(10, 3, u64::MAX), 3..10);
    }
}
