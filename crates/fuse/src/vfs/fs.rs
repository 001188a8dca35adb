//! Filesystem call surface over a built tree.
//!
//! Metadata calls are answered from the immutable [`TreeIndex`] without
//! locks or I/O. Only `read` touches the network, and it races the fetch
//! against the mount's cancellation token.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::content::ContentSource;
use super::error::FsError;
use super::handle_table::HandleTable;
use super::tree::{EntryKind, PathEntry, TreeIndex};
use crate::lifecycle::ShutdownHandle;

pub const FILE_PERM: u16 = 0o444;
pub const DIR_PERM: u16 = 0o555;

/// Attributes reported for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryAttr {
    pub ino: u64,
    pub kind: EntryKind,
    /// Declared size for files, number of children for directories
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
}

/// One directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub kind: EntryKind,
    /// Offset to resume after this entry
    pub offset: u64,
}

/// Lazy listing of a directory's children.
///
/// Entries are produced from the index on demand. A listing can be resumed
/// at any offset previously handed out, which is how paginated `readdir`
/// calls continue.
#[derive(Debug, Clone)]
pub struct ReadDir<'a> {
    tree: &'a TreeIndex,
    dir: &'a PathEntry,
    position: usize,
}

impl<'a> ReadDir<'a> {
    fn new(tree: &'a TreeIndex, dir: &'a PathEntry) -> Self {
        Self {
            tree,
            dir,
            position: 0,
        }
    }

    /// Continue after the entry that reported `offset`
    pub fn seek(mut self, offset: u64) -> Self {
        self.position = usize::try_from(offset).unwrap_or(usize::MAX);
        self
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn dir(&self) -> &PathEntry {
        self.dir
    }
}

impl Iterator for ReadDir<'_> {
    type Item = DirEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let ino = *self.dir.children.get(self.position)?;
            self.position += 1;
            if let Some(entry) = self.tree.entry(ino) {
                return Some(DirEntry {
                    ino,
                    name: entry.name.clone(),
                    kind: entry.kind,
                    offset: self.position as u64,
                });
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.dir.children.len().saturating_sub(self.position);
        (0, Some(remaining))
    }
}

/// Path-addressed read-only filesystem operations
#[async_trait]
pub trait VirtualFs: Send + Sync {
    fn lookup(&self, path: &str) -> Result<EntryAttr, FsError>;

    fn getattr(&self, path: &str) -> Result<EntryAttr, FsError> {
        self.lookup(path)
    }

    fn readdir(&self, path: &str) -> Result<ReadDir<'_>, FsError>;

    fn open(&self, path: &str) -> Result<u64, FsError>;

    /// Read up to `length` bytes at `offset`. Short at the end of content,
    /// empty past it.
    async fn read(&self, handle: u64, offset: u64, length: u64) -> Result<Bytes, FsError>;

    fn release(&self, handle: u64) -> Result<(), FsError>;

    /// Every mutation is refused
    fn deny_write(&self, op: &'static str, path: &str) -> FsError {
        debug!(op, path, "write refused");
        FsError::Unsupported(op)
    }
}

/// The projected filesystem for one mount
#[derive(Debug)]
pub struct EmporousFs {
    tree: Arc<TreeIndex>,
    handles: Arc<HandleTable>,
    content: Arc<ContentSource>,
    shutdown: ShutdownHandle,
}

impl EmporousFs {
    /// Assemble the adapter. Shutting the mount down drops every session.
    pub fn new(tree: Arc<TreeIndex>, content: Arc<ContentSource>, shutdown: ShutdownHandle) -> Self {
        let handles = Arc::new(HandleTable::new());
        let on_shutdown = handles.clone();
        shutdown.on_shutdown(move || {
            let dropped = on_shutdown.clear();
            debug!(dropped, "sessions dropped");
        });

        Self {
            tree,
            handles,
            content,
            shutdown,
        }
    }

    pub fn tree(&self) -> &Arc<TreeIndex> {
        &self.tree
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn content(&self) -> &ContentSource {
        &self.content
    }

    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown
    }

    fn attr(&self, entry: &PathEntry) -> EntryAttr {
        match entry.kind {
            EntryKind::Directory => {
                let subdirs = self
                    .tree
                    .children(entry.ino)
                    .filter(|c| c.is_dir())
                    .count() as u32;
                EntryAttr {
                    ino: entry.ino,
                    kind: EntryKind::Directory,
                    size: entry.children.len() as u64,
                    perm: DIR_PERM,
                    nlink: 2 + subdirs,
                }
            }
            EntryKind::File => EntryAttr {
                ino: entry.ino,
                kind: EntryKind::File,
                size: self.tree.node(&entry.digest).map_or(0, |n| n.size),
                perm: FILE_PERM,
                nlink: 1,
            },
        }
    }

    fn entry(&self, ino: u64) -> Result<&PathEntry, FsError> {
        self.tree
            .entry(ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))
    }

    pub fn getattr_ino(&self, ino: u64) -> Result<EntryAttr, FsError> {
        Ok(self.attr(self.entry(ino)?))
    }

    pub fn lookup_child(&self, parent: u64, name: &str) -> Result<EntryAttr, FsError> {
        let dir = self.entry(parent)?;
        if !dir.is_dir() {
            return Err(FsError::NotADirectory(dir.path.clone()));
        }
        self.tree
            .child(parent, name)
            .map(|entry| self.attr(entry))
            .ok_or_else(|| FsError::NotFound(format!("{}/{}", dir.path.trim_end_matches('/'), name)))
    }

    pub fn readdir_ino(&self, ino: u64) -> Result<ReadDir<'_>, FsError> {
        let dir = self.entry(ino)?;
        if !dir.is_dir() {
            return Err(FsError::NotADirectory(dir.path.clone()));
        }
        Ok(ReadDir::new(&self.tree, dir))
    }

    pub fn open_ino(&self, ino: u64) -> Result<u64, FsError> {
        let entry = self.entry(ino)?;
        if entry.is_dir() {
            return Err(FsError::IsADirectory(entry.path.clone()));
        }
        let node = self
            .tree
            .node(&entry.digest)
            .cloned()
            .ok_or_else(|| FsError::NotFound(entry.path.clone()))?;

        let handle = self.handles.allocate(ino, node, entry.path.clone());
        debug!(handle, path = %entry.path, "opened");
        Ok(handle)
    }

    fn ino_of(&self, path: &str) -> Result<u64, FsError> {
        self.tree
            .lookup(path)
            .map(|e| e.ino)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl VirtualFs for EmporousFs {
    fn lookup(&self, path: &str) -> Result<EntryAttr, FsError> {
        self.getattr_ino(self.ino_of(path)?)
    }

    fn readdir(&self, path: &str) -> Result<ReadDir<'_>, FsError> {
        self.readdir_ino(self.ino_of(path)?)
    }

    fn open(&self, path: &str) -> Result<u64, FsError> {
        self.open_ino(self.ino_of(path)?)
    }

    async fn read(&self, handle: u64, offset: u64, length: u64) -> Result<Bytes, FsError> {
        let token = self.shutdown.token();
        if token.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let session = self.handles.get(handle)?;

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(handle, path = %session.path, "read cancelled");
                return Err(FsError::Cancelled);
            }
            result = self.content.read(&session.node, offset, length) => result,
        };

        let data = result.map_err(|e| {
            warn!(handle, path = %session.path, error = %e, "read failed");
            FsError::Io(e)
        })?;
        session.record_read(offset, data.len());
        debug!(handle, offset, len = data.len(), "read");
        Ok(data)
    }

    fn release(&self, handle: u64) -> Result<(), FsError> {
        let session = self.handles.release(handle)?;
        debug!(handle, path = %session.path, bytes_read = session.bytes_read(), "released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::memory::MemoryRegistry;
    use common::{Attributes, RegistryClient};

    use super::*;
    use crate::vfs::content::ContentCacheConfig;
    use crate::vfs::tree::TreeBuilder;

    async fn mount(registry: &MemoryRegistry) -> EmporousFs {
        let client: Arc<dyn RegistryClient> = Arc::new(registry.clone());
        let collection = client.resolve("test").await.unwrap();
        let tree = TreeBuilder::new(client.clone())
            .build(&collection)
            .await
            .unwrap();
        let content = ContentSource::new(client, ContentCacheConfig::default());
        EmporousFs::new(Arc::new(tree), Arc::new(content), ShutdownHandle::new())
    }

    fn sample() -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        let a = registry.add_file("a.txt", "hello", Attributes::new());
        let b = registry.add_file("b.txt", "nested file", Attributes::new());
        let c = registry.add_file("c.txt", "c", Attributes::new());
        let sub = registry
            .add_manifest(vec![b, c], Attributes::new())
            .with_name("sub");
        let root = registry.add_manifest(vec![a, sub], Attributes::new());
        registry.tag("test", vec![root]);
        registry
    }

    #[tokio::test]
    async fn test_getattr() {
        let fs = mount(&sample()).await;

        let file = fs.getattr("/a.txt").unwrap();
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.size, 5);
        assert_eq!(file.perm, FILE_PERM);

        let dir = fs.getattr("/sub").unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);
        assert_eq!(dir.size, 2);
        assert_eq!(dir.perm, DIR_PERM);

        let root = fs.getattr("/").unwrap();
        assert_eq!(root.nlink, 3);

        assert!(matches!(fs.getattr("/nope"), Err(FsError::NotFound(_))));
        assert!(matches!(
            fs.lookup_child(file.ino, "x"),
            Err(FsError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_readdir_resumes() {
        let fs = mount(&sample()).await;

        let all: Vec<_> = fs.readdir("/sub").unwrap().collect();
        assert_eq!(
            all.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["b.txt", "c.txt"]
        );

        let rest: Vec<_> = fs.readdir("/sub").unwrap().seek(all[0].offset).collect();
        assert_eq!(rest, all[1..].to_vec());

        assert!(matches!(fs.readdir("/a.txt"), Err(FsError::NotADirectory(_))));
        assert!(matches!(fs.readdir("/missing"), Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_open_read_release() {
        let fs = mount(&sample()).await;

        assert!(matches!(fs.open("/sub"), Err(FsError::IsADirectory(_))));

        let handle = fs.open("/sub/b.txt").unwrap();
        assert_eq!(fs.read(handle, 0, 6).await.unwrap().as_ref(), b"nested");
        assert_eq!(fs.read(handle, 7, 100).await.unwrap().as_ref(), b"file");
        assert!(fs.read(handle, 11, 10).await.unwrap().is_empty());

        let session = fs.handles().get(handle).unwrap();
        assert_eq!(session.bytes_read(), 10);

        fs.release(handle).unwrap();
        assert_eq!(fs.release(handle), Err(FsError::InvalidHandle(handle)));
        assert_eq!(fs.read(handle, 0, 1).await, Err(FsError::InvalidHandle(handle)));
    }

    #[tokio::test]
    async fn test_read_failure_keeps_session() {
        let registry = sample();
        let fs = mount(&registry).await;
        let handle = fs.open("/a.txt").unwrap();

        registry.set_fail_fetches(true);
        assert!(matches!(fs.read(handle, 0, 5).await, Err(FsError::Io(_))));

        registry.set_fail_fetches(false);
        assert_eq!(fs.read(handle, 0, 5).await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_shutdown_cancels_reads() {
        let registry = sample();
        registry.set_fetch_delay(Some(Duration::from_secs(30)));
        let fs = Arc::new(mount(&registry).await);
        let handle = fs.open("/a.txt").unwrap();

        let reader = {
            let fs = fs.clone();
            tokio::spawn(async move { fs.read(handle, 0, 5).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fs.shutdown_handle().shutdown());

        let result = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(FsError::Cancelled));
        assert!(fs.handles().is_empty());
    }

    #[tokio::test]
    async fn test_writes_refused() {
        let fs = mount(&sample()).await;
        assert_eq!(
            fs.deny_write("write", "/a.txt"),
            FsError::Unsupported("write")
        );
    }
}
