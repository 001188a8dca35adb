//! Open file sessions keyed by handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::Node;
use parking_lot::Mutex;

use super::error::FsError;

/// State for one `open` call.
///
/// Each session tracks its own position, so concurrent readers of the same
/// file never observe each other's progress.
#[derive(Debug)]
pub struct Session {
    pub handle: u64,
    pub ino: u64,
    pub path: String,
    pub node: Arc<Node>,
    cursor: AtomicU64,
    bytes_read: AtomicU64,
}

impl Session {
    /// End offset of the most recent read
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub(crate) fn record_read(&self, offset: u64, len: usize) {
        self.cursor.store(offset + len as u64, Ordering::Relaxed);
        self.bytes_read.fetch_add(len as u64, Ordering::Relaxed);
    }
}

/// Concurrent map from handle to [`Session`]
#[derive(Debug)]
pub struct HandleTable {
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    next_handle: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Create a session and return its handle.
    ///
    /// Handles come from a monotonic counter and are never reused.
    pub fn allocate(&self, ino: u64, node: Arc<Node>, path: impl Into<String>) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session {
            handle,
            ino,
            path: path.into(),
            node,
            cursor: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        });
        self.sessions.lock().insert(handle, session);
        handle
    }

    pub fn get(&self, handle: u64) -> Result<Arc<Session>, FsError> {
        self.sessions
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(FsError::InvalidHandle(handle))
    }

    /// Remove a session. Releasing an unknown or already released handle
    /// reports [`FsError::InvalidHandle`] and leaves the table unchanged.
    pub fn release(&self, handle: u64) -> Result<Arc<Session>, FsError> {
        self.sessions
            .lock()
            .remove(&handle)
            .ok_or(FsError::InvalidHandle(handle))
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Drop every session, returning how many were open
    pub fn clear(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let count = sessions.len();
        sessions.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use common::Digest;

    use super::*;

    fn node() -> Arc<Node> {
        Arc::new(Node::blob(Digest::sha256(b"data"), 4, "application/octet-stream"))
    }

    #[test]
    fn test_allocate_and_get() {
        let table = HandleTable::new();
        let first = table.allocate(2, node(), "/a");
        let second = table.allocate(2, node(), "/a");

        assert_eq!(first, 1);
        assert_ne!(first, second);
        assert_eq!(table.len(), 2);

        let session = table.get(first).unwrap();
        assert_eq!(session.ino, 2);
        assert_eq!(session.path, "/a");
        assert_eq!(session.cursor(), 0);
    }

    #[test]
    fn test_double_release() {
        let table = HandleTable::new();
        let handle = table.allocate(2, node(), "/a");
        let other = table.allocate(3, node(), "/b");

        assert!(table.release(handle).is_ok());
        assert_eq!(table.release(handle).unwrap_err(), FsError::InvalidHandle(handle));
        assert_eq!(table.get(handle).unwrap_err(), FsError::InvalidHandle(handle));
        assert!(table.get(other).is_ok());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_handles_not_reused() {
        let table = HandleTable::new();
        let first = table.allocate(2, node(), "/a");
        table.release(first).unwrap();
        let second = table.allocate(2, node(), "/a");
        assert_ne!(first, second);
    }

    #[test]
    fn test_sessions_track_reads_independently() {
        let table = HandleTable::new();
        let a = table.get(table.allocate(2, node(), "/a")).unwrap();
        let b = table.get(table.allocate(2, node(), "/a")).unwrap();

        a.record_read(0, 3);
        a.record_read(3, 1);
        b.record_read(10, 2);

        assert_eq!(a.cursor(), 4);
        assert_eq!(a.bytes_read(), 4);
        assert_eq!(b.cursor(), 12);
        assert_eq!(b.bytes_read(), 2);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let table = Arc::new(HandleTable::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || {
                    (0..100)
                        .map(|_| table.allocate(2, node(), "/a"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let handles: HashSet<u64> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        assert_eq!(handles.len(), 800);
        assert_eq!(table.len(), 800);
        assert_eq!(table.clear(), 800);
        assert!(table.is_empty());
    }
}
