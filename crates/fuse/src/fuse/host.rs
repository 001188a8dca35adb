//! `fuser` adapter for [`EmporousFs`].
//!
//! Metadata requests are answered inline from the index. Reads are spawned
//! onto the tokio runtime and reply from the task, so a slow fetch never
//! blocks the session loop and reads proceed in parallel.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::vfs::{EmporousFs, EntryAttr, EntryKind, FsError, VirtualFs};

const BLOCK_SIZE: u32 = 512;

/// Map a filesystem error to the errno reported to the kernel
pub fn errno(err: &FsError) -> i32 {
    match err {
        FsError::NotFound(_) => libc::ENOENT,
        FsError::NotADirectory(_) => libc::ENOTDIR,
        FsError::IsADirectory(_) => libc::EISDIR,
        FsError::InvalidHandle(_) => libc::EBADF,
        FsError::Io(_) => libc::EIO,
        FsError::Cancelled => libc::EINTR,
        FsError::Unsupported(_) => libc::EROFS,
    }
}

fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::File => FileType::RegularFile,
    }
}

pub struct FuseHost {
    fs: Arc<EmporousFs>,
    runtime: Handle,
    ttl: Duration,
    mounted_at: SystemTime,
    uid: u32,
    gid: u32,
}

impl FuseHost {
    pub fn new(fs: Arc<EmporousFs>, runtime: Handle, ttl: Duration) -> Self {
        Self {
            fs,
            runtime,
            ttl,
            mounted_at: SystemTime::now(),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn file_attr(&self, attr: &EntryAttr) -> FileAttr {
        FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind: file_type(attr.kind),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn deny(&self, op: &'static str, reply_error: impl FnOnce(i32)) {
        reply_error(errno(&self.fs.deny_write(op, "")));
    }
}

impl Filesystem for FuseHost {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.lookup_child(parent, name) {
            Ok(attr) => reply.entry(&self.ttl, &self.file_attr(&attr), 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.fs.getattr_ino(ino) {
            Ok(attr) => reply.attr(&self.ttl, &self.file_attr(&attr)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.fs.readdir_ino(ino) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let listing = match self.fs.readdir_ino(ino) {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };

        // Offsets 1 and 2 belong to "." and ".."; children follow
        let parent = listing.dir().parent;
        let mut offset = offset.max(0);
        if offset == 0 {
            if reply.add(ino, 1, FileType::Directory, ".") {
                reply.ok();
                return;
            }
            offset = 1;
        }
        if offset == 1 {
            if reply.add(parent, 2, FileType::Directory, "..") {
                reply.ok();
                return;
            }
            offset = 2;
        }

        for entry in listing.seek((offset - 2) as u64) {
            let next = entry.offset as i64 + 2;
            if reply.add(entry.ino, next, file_type(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            self.deny("open for writing", |e| reply.error(e));
            return;
        }
        match self.fs.open_ino(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let fs = self.fs.clone();
        let offset = offset.max(0) as u64;
        self.runtime.spawn(async move {
            match fs.read(fh, offset, size as u64).await {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(errno(&e)),
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(e) => {
                warn!(fh, error = %e, "release failed");
                reply.error(errno(&e))
            }
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        self.deny("setattr", |e| reply.error(e));
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        self.deny("write", |e| reply.error(e));
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        self.deny("create", |e| reply.error(e));
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        self.deny("mkdir", |e| reply.error(e));
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        self.deny("unlink", |e| reply.error(e));
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        self.deny("rmdir", |e| reply.error(e));
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        self.deny("rename", |e| reply.error(e));
    }

    fn destroy(&mut self) {
        debug!("fuse session destroyed");
        self.fs.shutdown_handle().shutdown();
    }
}

#[cfg(test)]
mod tests {
    use common::{Digest, RegistryError};

    use super::*;

    #[test]
    fn test_errno_mapping() {
        let digest = Digest::sha256(b"x");
        let cases = [
            (FsError::NotFound("/a".into()), libc::ENOENT),
            (FsError::NotADirectory("/a".into()), libc::ENOTDIR),
            (FsError::IsADirectory("/a".into()), libc::EISDIR),
            (FsError::InvalidHandle(7), libc::EBADF),
            (FsError::Io(RegistryError::fetch(&digest, "boom")), libc::EIO),
            (FsError::Cancelled, libc::EINTR),
            (FsError::Unsupported("write"), libc::EROFS),
        ];
        for (err, expected) in cases {
            assert_eq!(errno(&err), expected, "{err}");
        }
    }

    #[test]
    fn test_file_types() {
        assert_eq!(file_type(EntryKind::Directory), FileType::Directory);
        assert_eq!(file_type(EntryKind::File), FileType::RegularFile);
    }
}
