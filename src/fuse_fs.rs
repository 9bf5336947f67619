//! `fuser::Filesystem` glue: the only place that decodes a kernel
//! request, calls into [`crate::resolver`], and encodes the result
//! back into a `fuser::Reply*` call. Every method here is a thin
//! translation layer, no resolution logic lives here.

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, Request,
};
use log::{debug, trace};

use crate::adapter::ObjectStore;
use crate::config::GitSnapConfig;
use crate::error::FsError;
use crate::inode::Ledger;
use crate::notify::EntryInvalidator;
use crate::resolver::{self, Kind};

/// Wraps `fuser::Notifier` so [`crate::notify`] stays decoupled from
/// the concrete FUSE binding. Set once the session is mounted; absent
/// before that (nothing to invalidate until then) and never replaced.
pub struct FuserInvalidator(pub fuser::Notifier);

impl EntryInvalidator for FuserInvalidator {
    fn invalidate_entry(&self, parent_ino: u64, name: &str) {
        if let Err(e) = self.0.inval_entry(parent_ino, OsStr::new(name)) {
            debug!("entry invalidation for {parent_ino:#x}/{name} failed: {e}");
        }
    }
}

pub struct GitSnapFs {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<Ledger>,
    config: Arc<GitSnapConfig>,
    mount_time: i64,
    in_flight: AtomicU64,
}

impl GitSnapFs {
    pub fn new(store: Arc<dyn ObjectStore>, ledger: Arc<Ledger>, config: Arc<GitSnapConfig>) -> Self {
        let mount_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        GitSnapFs {
            store,
            ledger,
            config,
            mount_time,
            in_flight: AtomicU64::new(0),
        }
    }

    pub fn in_flight_counter(&self) -> &AtomicU64 {
        &self.in_flight
    }

    fn attr_ttl(&self, kind: Kind, ino: u64) -> Duration {
        match kind {
            Kind::Symlink => {
                let is_ref_style = self
                    .ledger
                    .bound(ino)
                    .map(|b| resolver::is_ref_style_symlink(b.raw_mode))
                    .unwrap_or(true);
                if is_ref_style {
                    self.config.ref_ttl
                } else {
                    self.config.attr_ttl
                }
            }
            _ => self.config.attr_ttl,
        }
    }

    fn to_file_attr(&self, entry: resolver::Entry) -> FileAttr {
        let kind = match entry.kind {
            Kind::Dir => FileType::Directory,
            Kind::File => FileType::RegularFile,
            Kind::Symlink => FileType::Symlink,
        };
        let time = UNIX_EPOCH + Duration::from_secs(entry.mtime.max(0) as u64);
        FileAttr {
            ino: entry.ino,
            size: entry.size,
            blocks: entry.size.div_ceil(512),
            atime: time,
            mtime: time,
            ctime: time,
            crtime: time,
            kind,
            perm: entry.perm,
            nlink: if entry.kind == Kind::Dir { 2 } else { 1 },
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }
}

fn reply_error(req_desc: &str, err: FsError) -> i32 {
    trace!("{req_desc}: {err}");
    err.to_errno()
}

// Implemented for `Arc<GitSnapFs>` rather than `GitSnapFs` itself: every
// worker thread holds its own clone of the Arc and calls `Session::new`
// with it, so `fuser` never needs more than the shared `&self` access
// already sufficient for every method body below (store/ledger/config
// are themselves Arc-shared and interior-synchronized; `in_flight` is
// atomic). No field here is ever mutated through `&mut self`.
impl Filesystem for Arc<GitSnapFs> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::ENOENT);
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        };
        debug!("lookup parent={parent:#x} name={name}");
        match resolver::lookup(self.store.as_ref(), &self.ledger, self.mount_time, parent, name) {
            Ok(entry) => {
                let ttl = self.attr_ttl(entry.kind, entry.ino);
                reply.entry(&ttl, &self.to_file_attr(entry), 0);
            }
            Err(e) => reply.error(reply_error("lookup", e)),
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match resolver::getattr(&self.ledger, self.mount_time, ino) {
            Ok(mut entry) => {
                // getattr's blob case doesn't know content size; refresh it
                // from the adapter before replying (resolver.rs documents
                // this split).
                if entry.kind == Kind::File {
                    if let Some(binding) = self.ledger.bound(ino) {
                        if let Ok(size) = self.store.blob_size(binding.oid) {
                            entry.size = size;
                        }
                    }
                }
                let ttl = self.attr_ttl(entry.kind, entry.ino);
                reply.attr(&ttl, &self.to_file_attr(entry));
            }
            Err(e) => reply.error(reply_error("getattr", e)),
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match resolver::readlink(self.store.as_ref(), &self.ledger, ino) {
            Ok(bytes) => reply.data(&bytes),
            Err(e) => reply.error(reply_error("readlink", e)),
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn open(&mut self, _req: &Request<'_>, _ino: u64, flags: i32, reply: ReplyOpen) {
        match resolver::open(flags) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match resolver::read(self.store.as_ref(), &self.ledger, ino, offset.max(0) as u64, size) {
            Ok(bytes) => reply.data(&bytes),
            Err(e) => reply.error(reply_error("read", e)),
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match resolver::readdir(self.store.as_ref(), &self.ledger, ino, offset) {
            Ok(entries) => {
                for entry in entries {
                    let kind = match entry.kind {
                        Kind::Dir => FileType::Directory,
                        Kind::File => FileType::RegularFile,
                        Kind::Symlink => FileType::Symlink,
                    };
                    if reply.add(entry.ino, entry.next_offset, kind, &entry.name) {
                        break; // reply buffer full; kernel will re-readdir from this offset
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(reply_error("readdir", e)),
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    // Every mutating request kind refuses uniformly: this is a
    // read-only filesystem. `fuser`'s default impls already reply
    // ENOSYS for most of these; EROFS is the correct reply instead.

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(resolver::reject_mutation().to_errno());
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        reply.error(resolver::reject_mutation().to_errno());
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
        reply.error(resolver::reject_mutation().to_errno());
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(resolver::reject_mutation().to_errno());
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(resolver::reject_mutation().to_errno());
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _link_name: &OsStr,
        _target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        reply.error(resolver::reject_mutation().to_errno());
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
        reply.error(resolver::reject_mutation().to_errno());
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(resolver::reject_mutation().to_errno());
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
        reply: fuser::ReplyWrite,
    ) {
        reply.error(resolver::reject_mutation().to_errno());
    }

    fn fallocate(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _length: i64,
        _mode: i32,
        reply: ReplyEmpty,
    ) {
        reply.error(resolver::reject_mutation().to_errno());
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(resolver::reject_mutation().to_errno());
    }

    fn getxattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, _size: u32, reply: fuser::ReplyXattr) {
        reply.error(FsError::Unsupported.to_errno());
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, _size: u32, reply: fuser::ReplyXattr) {
        reply.error(FsError::Unsupported.to_errno());
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(resolver::reject_mutation().to_errno());
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        // Nothing is ever dirty; a read-only filesystem's fsync is a
        // no-op success, not a mutation refusal. there's never any
        // dirty data to flush.
        reply.ok();
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{CommitInfo, RefNamespace, TreeEntry, WatchHandle};
    use crate::config::{Args, LogLevel};
    use crate::error::AdapterError;
    use crate::inode::Tag;
    use crate::oid::Oid;
    use std::path::PathBuf;

    struct NullStore;
    impl ObjectStore for NullStore {
        fn find_commit(&self, _oid: Oid) -> Result<CommitInfo, AdapterError> {
            Err(AdapterError::NotFound)
        }
        fn find_tree(&self, _oid: Oid) -> Result<Vec<TreeEntry>, AdapterError> {
            Err(AdapterError::NotFound)
        }
        fn find_blob(&self, _oid: Oid) -> Result<Vec<u8>, AdapterError> {
            Err(AdapterError::NotFound)
        }
        fn blob_size(&self, _oid: Oid) -> Result<u64, AdapterError> {
            Err(AdapterError::NotFound)
        }
        fn resolve_ref(&self, _refname: &str) -> Result<Oid, AdapterError> {
            Err(AdapterError::NotFound)
        }
        fn enumerate_refs(&self, _namespace: RefNamespace) -> Result<Vec<String>, AdapterError> {
            Ok(Vec::new())
        }
        fn watch_refs(
            &self,
            _poll_interval: std::time::Duration,
            _callback: Box<dyn Fn(&str) + Send + Sync>,
        ) -> WatchHandle {
            unimplemented!("not exercised in this test")
        }
    }

    fn test_fs() -> GitSnapFs {
        let args = Args {
            repo: PathBuf::from("/tmp/repo"),
            mountpoint: PathBuf::from("/tmp/mnt"),
            allow_other: false,
            attr_ttl: 300,
            entry_ttl: 300,
            ref_ttl: 2,
            tree_cache: 4096,
            blob_small_cache: 134_217_728,
            state_file: None,
            takeover_fuse_fd: None,
            log_level: LogLevel::Info,
            workers: 4,
        };
        GitSnapFs::new(
            Arc::new(NullStore),
            Arc::new(Ledger::new(None).unwrap()),
            Arc::new(GitSnapConfig::from_args(args)),
        )
    }

    fn oid_of(byte: u8) -> Oid {
        let mut raw = [0u8; 20];
        raw[19] = byte;
        Oid::from_bytes(&raw).unwrap()
    }

    #[test]
    fn dir_attr_uses_attr_ttl() {
        let fs = test_fs();
        assert_eq!(fs.attr_ttl(Kind::Dir, 1), fs.config.attr_ttl);
    }

    #[test]
    fn ref_style_symlink_uses_ref_ttl() {
        let fs = test_fs();
        let oid = oid_of(1);
        let ino = match fs.ledger.allocate(oid, Tag::Symlink, 0 /* MODE_REF_SYMLINK */, None) {
            crate::inode::Allocation::Bound(ino) => ino,
            crate::inode::Allocation::Clash => panic!("unexpected clash"),
        };
        assert_eq!(fs.attr_ttl(Kind::Symlink, ino), fs.config.ref_ttl);
    }

    #[test]
    fn git_tree_symlink_uses_attr_ttl() {
        let fs = test_fs();
        let oid = oid_of(2);
        let ino = match fs.ledger.allocate(oid, Tag::Symlink, 0o120000, None) {
            crate::inode::Allocation::Bound(ino) => ino,
            crate::inode::Allocation::Clash => panic!("unexpected clash"),
        };
        assert_eq!(fs.attr_ttl(Kind::Symlink, ino), fs.config.attr_ttl);
    }
}
