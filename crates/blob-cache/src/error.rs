use common::Digest;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlobCacheError>;

#[derive(Debug, Error)]
pub enum BlobCacheError {
    #[error("object storage error: {0}")]
    Storage(#[from] object_store::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("content does not match digest {0}")]
    DigestMismatch(Digest),
}
