//! FUSE integration
//!
//! Adapts [`EmporousFs`](crate::vfs::EmporousFs) to the kernel through
//! `fuser`.
//!
//! # Architecture
//!
//! - `FuseHost`: `fuser::Filesystem` implementation over the projection
//! - `LiveMount`: a mounted session and its teardown

mod host;
mod mount_manager;

pub use host::{errno, FuseHost};
pub use mount_manager::{wait_for_signal, LiveMount, FS_NAME};
