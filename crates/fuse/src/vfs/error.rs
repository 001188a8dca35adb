use common::{Digest, RegistryError};

/// Per-call filesystem errors.
///
/// None of these affect the tree or other open sessions.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("no such entry: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("invalid handle: {0}")]
    InvalidHandle(u64),
    #[error("io error: {0}")]
    Io(#[from] RegistryError),
    #[error("read cancelled by unmount")]
    Cancelled,
    #[error("read-only filesystem: {0} is not supported")]
    Unsupported(&'static str),
}

/// Errors that abort tree construction
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("collection {0} has no root")]
    EmptyCollection(String),
    #[error("graph traversal failed: {0}")]
    Traversal(#[source] RegistryError),
    #[error("cycle detected at {0}")]
    Cycle(Digest),
}
