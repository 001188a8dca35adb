//! Read-only FUSE projection of Emporous collections.
//!
//! A collection stored in an OCI registry is resolved once, filtered by an
//! optional attribute matcher and laid out as a directory tree. File content
//! is fetched on demand, cache first.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use common::memory::MemoryRegistry;
//! use common::Attributes;
//! use emporous_fuse::config::FsOptions;
//! use emporous_fuse::lifecycle::Mounter;
//! use emporous_fuse::vfs::VirtualFs;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = MemoryRegistry::new();
//! let file = registry.add_file("hello.txt", "hello", Attributes::new());
//! let root = registry.add_manifest(vec![file], Attributes::new());
//! registry.tag("demo", vec![root]);
//!
//! let fs = Mounter::new(Arc::new(registry), FsOptions::default())
//!     .prepare("demo", None)
//!     .await?;
//! let handle = fs.open("/hello.txt")?;
//! assert_eq!(fs.read(handle, 0, 5).await?.as_ref(), b"hello");
//! fs.release(handle)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
#[cfg(feature = "fuse")]
pub mod fuse;
pub mod lifecycle;
pub mod registry;
pub mod vfs;

pub use lifecycle::{MountError, MountStatus, Mounter, ShutdownHandle};
pub use vfs::{EmporousFs, FsError, VirtualFs};
