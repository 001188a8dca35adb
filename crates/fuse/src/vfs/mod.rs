//! Read-only projection of a collection as a directory tree
//!
//! # Architecture
//!
//! - `TreeBuilder`: traverses the collection graph once and produces a `TreeIndex`
//! - `TreeIndex`: immutable path index, shared without locks
//! - `InodeTable`: bidirectional inode ↔ path mapping
//! - `HandleTable`: open sessions keyed by handle
//! - `ContentSource`: on-demand blob content with in-memory caching
//! - `EmporousFs`: the filesystem call surface (`VirtualFs`)
//!
//! Nothing here depends on FUSE; the `fuse` module adapts `EmporousFs` to
//! the kernel interface.

mod content;
mod error;
mod fs;
mod handle_table;
mod inode_table;
mod tree;

pub use content::{ContentCacheConfig, ContentSource, ContentStats};
pub use error::{FsError, TreeError};
pub use fs::{DirEntry, EmporousFs, EntryAttr, ReadDir, VirtualFs, DIR_PERM, FILE_PERM};
pub use handle_table::{HandleTable, Session};
pub use inode_table::InodeTable;
pub use tree::{EntryKind, PathEntry, TreeBuilder, TreeIndex};
