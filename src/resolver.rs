//! Stateless functions that turn a
//! `(parent_ino, name)` lookup, a bare `ino`, or a file-handle read
//! into the corresponding Git object and the attributes FUSE expects.
//!
//! Every function here takes the adapter and ledger as arguments and
//! owns no state of its own. the only long-lived state is the
//! ledger's, which is what lets the Hot-Upgrade Coordinator re-exec
//! without losing anything the resolver depended on.

use crate::adapter::{ObjectStore, RefNamespace};
use crate::error::FsError;
use crate::inode::{Ledger, Tag};
use crate::oid::Oid;

/// Fixed synthetic inodes for the static top-level topology. The
/// high nibble (`0xF`) is the `Tag::Synthetic` bit pattern left after
/// `(tag as u64) << 60` truncates `0x7F` to its low 4 bits, the same
/// mechanism that derives Git-backed inodes, just with no object
/// behind it.
const SYNTHETIC_TAG_BITS: u64 = 0xF000_0000_0000_0000;
pub const ROOT_INO: u64 = SYNTHETIC_TAG_BITS | 1;
pub const COMMITS_INO: u64 = SYNTHETIC_TAG_BITS | 2;
pub const BRANCHES_INO: u64 = SYNTHETIC_TAG_BITS | 3;
pub const TAGS_INO: u64 = SYNTHETIC_TAG_BITS | 4;
pub const HEAD_INO: u64 = SYNTHETIC_TAG_BITS | 5;

const NAME_COMMITS: &str = "commits";
const NAME_BRANCHES: &str = "branches";
const NAME_TAGS: &str = "tags";
const NAME_HEAD: &str = "HEAD";

/// Git tree-entry filemodes.
const MODE_DIR: u32 = 0o040000;
const MODE_FILE: u32 = 0o100644;
const MODE_FILE_EXEC: u32 = 0o100755;
const MODE_SYMLINK: u32 = 0o120000;
const MODE_GITLINK: u32 = 0o160000;

/// not a real git filemode, a `Binding::raw_mode` sentinel marking a
/// ref-style symlink (`HEAD`, `/branches/*`, `/tags/*`) so `readlink`
/// can tell it apart from a real `120000` tree-entry symlink and
/// synthesize `../commits/<oid>` instead of reading blob content.
const MODE_REF_SYMLINK: u32 = 0;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Kind {
    Dir,
    File,
    Symlink,
}

/// What `lookup`/`getattr` hand back to the FUSE glue: everything
/// needed to fill a kernel `attr` reply.
#[derive(Clone, Copy, Debug)]
pub struct Entry {
    pub ino: u64,
    pub kind: Kind,
    /// Permission bits only (no file-type bits); `fuse_fs.rs` ORs in
    /// `S_IFDIR`/`S_IFREG`/`S_IFLNK` itself.
    pub perm: u16,
    pub size: u64,
    pub mtime: i64,
}

/// One `readdir` entry.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub kind: Kind,
    /// The offset the kernel should pass back to resume after this
    /// entry (`next_offset` for position `i` is `i+1`).
    pub next_offset: i64,
}

/// `lookup(parent_ino, name)`.
pub fn lookup(
    store: &dyn ObjectStore,
    ledger: &Ledger,
    mount_time: i64,
    parent_ino: u64,
    name: &str,
) -> Result<Entry, FsError> {
    if parent_ino == ROOT_INO {
        return match name {
            NAME_COMMITS => Ok(synthetic_dir(COMMITS_INO, mount_time)),
            NAME_BRANCHES => Ok(synthetic_dir(BRANCHES_INO, mount_time)),
            NAME_TAGS => Ok(synthetic_dir(TAGS_INO, mount_time)),
            NAME_HEAD => lookup_ref(store, ledger, mount_time, "HEAD"),
            _ => Err(FsError::NotFound),
        };
    }

    if parent_ino == COMMITS_INO {
        let oid = Oid::from_hex(name).ok_or(FsError::NotFound)?;
        let commit = store.find_commit(oid).map_err(not_found_as_fs_error)?;
        return bind_entry(
            ledger,
            commit.tree_oid,
            Tag::Tree,
            MODE_DIR,
            Some(commit.committer_time),
        );
    }

    if parent_ino == BRANCHES_INO {
        return lookup_ref(store, ledger, mount_time, &format!("refs/heads/{name}"));
    }
    if parent_ino == TAGS_INO {
        return lookup_ref(store, ledger, mount_time, &format!("refs/tags/{name}"));
    }

    let Some(binding) = ledger.bound(parent_ino) else {
        return Err(FsError::Stale);
    };
    if binding.tag != Tag::Tree {
        return Err(FsError::NotFound);
    }

    let entries = store.find_tree(binding.oid).map_err(not_found_as_fs_error)?;
    let entry = entries
        .iter()
        .find(|e| e.name == name)
        .ok_or(FsError::NotFound)?;

    match entry.mode {
        MODE_DIR => bind_entry(ledger, entry.child_oid, Tag::Tree, MODE_DIR, binding.commit_time),
        MODE_FILE => {
            let size = store.blob_size(entry.child_oid).map_err(not_found_as_fs_error)?;
            bind_file_entry(ledger, entry.child_oid, MODE_FILE, size, binding.commit_time)
        }
        MODE_FILE_EXEC => {
            let size = store.blob_size(entry.child_oid).map_err(not_found_as_fs_error)?;
            bind_file_entry(ledger, entry.child_oid, MODE_FILE_EXEC, size, binding.commit_time)
        }
        MODE_SYMLINK => {
            let size = store.blob_size(entry.child_oid).map_err(not_found_as_fs_error)?;
            let ino = allocate_or_clash(ledger, entry.child_oid, Tag::Symlink, MODE_SYMLINK, binding.commit_time)?;
            Ok(Entry {
                ino,
                kind: Kind::Symlink,
                perm: 0o777,
                size,
                mtime: binding.commit_time.unwrap_or(mount_time),
            })
        }
        MODE_GITLINK => Ok(Entry {
            ino: gitlink_ino(entry.child_oid),
            kind: Kind::Dir,
            perm: 0o555,
            size: 0,
            mtime: binding.commit_time.unwrap_or(mount_time),
        }),
        _ => Err(FsError::NotFound),
    }
}

/// `getattr(ino)`.
pub fn getattr(ledger: &Ledger, mount_time: i64, ino: u64) -> Result<Entry, FsError> {
    match ino {
        ROOT_INO | COMMITS_INO | BRANCHES_INO | TAGS_INO => Ok(synthetic_dir(ino, mount_time)),
        HEAD_INO => Err(FsError::Stale), // HEAD's real ino is allocated at lookup time, never this fixed id's getattr path
        _ => {
            if is_gitlink_ino(ino) {
                return Ok(Entry {
                    ino,
                    kind: Kind::Dir,
                    perm: 0o555,
                    size: 0,
                    mtime: mount_time,
                });
            }
            let Some(binding) = ledger.bound(ino) else {
                return Err(FsError::Stale);
            };
            // A clashed ino still resolves to its winner here; EUCLEAN is
            // only ever returned to the *loser*, at lookup/allocate time.
            let mtime = binding.commit_time.unwrap_or(mount_time);
            Ok(match binding.tag {
                Tag::Tree => Entry {
                    ino,
                    kind: Kind::Dir,
                    perm: 0o555,
                    size: 0,
                    mtime,
                },
                Tag::Blob => Entry {
                    ino,
                    kind: Kind::File,
                    perm: perm_for_mode(binding.raw_mode),
                    size: 0, // caller refreshes size from the adapter; see fuse_fs.rs
                    mtime,
                },
                Tag::Symlink => Entry {
                    ino,
                    kind: Kind::Symlink,
                    perm: 0o777,
                    size: 0,
                    mtime,
                },
                Tag::Commit | Tag::Synthetic => return Err(FsError::Stale),
            })
        }
    }
}

/// `readdir(ino, offset)`. Returns every entry from
/// `offset` onward; `fuse_fs.rs` is responsible for truncating to the
/// reply buffer's size and re-requesting the remainder.
pub fn readdir(
    store: &dyn ObjectStore,
    ledger: &Ledger,
    ino: u64,
    offset: i64,
) -> Result<Vec<DirEntry>, FsError> {
    let all = match ino {
        ROOT_INO => vec![
            (NAME_COMMITS.to_string(), COMMITS_INO, Kind::Dir),
            (NAME_BRANCHES.to_string(), BRANCHES_INO, Kind::Dir),
            (NAME_TAGS.to_string(), TAGS_INO, Kind::Dir),
            // HEAD's ino is only known after resolving the ref; readdir
            // still must list it, so resolve it fresh here.
            (NAME_HEAD.to_string(), head_readdir_ino(store, ledger)?, Kind::Symlink),
        ],
        COMMITS_INO => Vec::new(), // /commits never enumerates; must be addressed by name
        BRANCHES_INO => ref_dir_entries(store, ledger, RefNamespace::Branches)?,
        TAGS_INO => ref_dir_entries(store, ledger, RefNamespace::Tags)?,
        _ => {
            let binding = ledger.bound(ino).ok_or(FsError::Stale)?;
            if binding.tag != Tag::Tree {
                return Err(FsError::NotFound);
            }
            let entries = store.find_tree(binding.oid).map_err(not_found_as_fs_error)?;
            entries
                .iter()
                .map(|e| {
                    let kind = match e.mode {
                        MODE_DIR | MODE_GITLINK => Kind::Dir,
                        MODE_SYMLINK => Kind::Symlink,
                        _ => Kind::File,
                    };
                    let child_ino = match e.mode {
                        MODE_DIR => allocate_or_clash(ledger, e.child_oid, Tag::Tree, MODE_DIR, binding.commit_time).unwrap_or(0),
                        MODE_FILE | MODE_FILE_EXEC => {
                            allocate_or_clash(ledger, e.child_oid, Tag::Blob, e.mode, binding.commit_time).unwrap_or(0)
                        }
                        MODE_SYMLINK => {
                            allocate_or_clash(ledger, e.child_oid, Tag::Symlink, MODE_SYMLINK, binding.commit_time).unwrap_or(0)
                        }
                        MODE_GITLINK => gitlink_ino(e.child_oid),
                        _ => 0,
                    };
                    (e.name.clone(), child_ino, kind)
                })
                .collect()
        }
    };

    Ok(all
        .into_iter()
        .enumerate()
        .skip(offset.max(0) as usize)
        .map(|(i, (name, ino, kind))| DirEntry {
            name,
            ino,
            kind,
            next_offset: i as i64 + 1,
        })
        .collect())
}

/// `open(ino, flags)`: refuses any write-capable access
/// mode; otherwise the file handle is simply `ino`.
pub fn open(flags: i32) -> Result<(), FsError> {
    // O_ACCMODE is the low two bits; O_RDONLY is 0.
    if flags & libc::O_ACCMODE != libc::O_RDONLY {
        return Err(FsError::ReadOnly);
    }
    Ok(())
}

/// `read(ino, offset, length)`: reading past end
/// returns zero bytes, not an error.
pub fn read(
    store: &dyn ObjectStore,
    ledger: &Ledger,
    ino: u64,
    offset: u64,
    length: u32,
) -> Result<Vec<u8>, FsError> {
    let binding = ledger.bound(ino).ok_or(FsError::Stale)?;
    if binding.tag != Tag::Blob {
        return Err(FsError::NotFound);
    }
    let bytes = store.find_blob(binding.oid).map_err(not_found_as_fs_error)?;
    let start = (offset as usize).min(bytes.len());
    let end = start.saturating_add(length as usize).min(bytes.len());
    Ok(bytes[start..end].to_vec())
}

/// `readlink(ino)`. Symlinks allocated from a Git tree
/// entry return the referenced blob's content verbatim; the four
/// fixed ref-style symlinks (`HEAD`, `/branches/*`, `/tags/*`) return a
/// synthesized `../commits/<oid>` target instead, so the caller tells
/// us which by tagging the ino's binding.
pub fn readlink(store: &dyn ObjectStore, ledger: &Ledger, ino: u64) -> Result<Vec<u8>, FsError> {
    let binding = ledger.bound(ino).ok_or(FsError::Stale)?;
    if binding.tag != Tag::Symlink {
        return Err(FsError::NotFound);
    }
    match binding.raw_mode {
        MODE_SYMLINK => store.find_blob(binding.oid).map_err(not_found_as_fs_error),
        _ => Ok(format!("../commits/{}", binding.oid).into_bytes()),
    }
}

/// Every mutating FUSE request kind refuses uniformly
/// §8 invariant 3).
pub fn reject_mutation() -> FsError {
    FsError::ReadOnly
}

/// Tells a ref-style symlink (`HEAD`, `/branches/*`, `/tags/*`, short
/// `ref-ttl`) apart from a real git tree-entry symlink (long
/// `attr-ttl` TTL fallback) from its binding's
/// `raw_mode` sentinel.
pub fn is_ref_style_symlink(raw_mode: u32) -> bool {
    raw_mode == MODE_REF_SYMLINK
}

fn lookup_ref(
    store: &dyn ObjectStore,
    ledger: &Ledger,
    mount_time: i64,
    refname: &str,
) -> Result<Entry, FsError> {
    let target = store.resolve_ref(refname).map_err(not_found_as_fs_error)?;
    // Ref-style symlinks are content-addressed by their resolved
    // commit: two refs pointing at the same commit share an ino, and
    // a moved branch simply allocates a fresh one (the stale binding
    // is harmless, it is never looked up by name again).
    let ino = allocate_or_clash(ledger, target, Tag::Symlink, MODE_REF_SYMLINK, None)?;
    Ok(Entry {
        ino,
        kind: Kind::Symlink,
        perm: 0o777,
        size: format!("../commits/{target}").len() as u64,
        mtime: mount_time,
    })
}

fn head_readdir_ino(store: &dyn ObjectStore, ledger: &Ledger) -> Result<u64, FsError> {
    let target = store.resolve_ref("HEAD").map_err(not_found_as_fs_error)?;
    allocate_or_clash(ledger, target, Tag::Symlink, MODE_REF_SYMLINK, None)
}

fn ref_dir_entries(
    store: &dyn ObjectStore,
    ledger: &Ledger,
    namespace: RefNamespace,
) -> Result<Vec<(String, u64, Kind)>, FsError> {
    let names = store.enumerate_refs(namespace).map_err(not_found_as_fs_error)?;
    let prefix = match namespace {
        RefNamespace::Branches => "refs/heads/",
        RefNamespace::Tags => "refs/tags/",
    };
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let target = store
            .resolve_ref(&format!("{prefix}{name}"))
            .map_err(not_found_as_fs_error)?;
        let ino = allocate_or_clash(ledger, target, Tag::Symlink, MODE_REF_SYMLINK, None)?;
        out.push((name, ino, Kind::Symlink));
    }
    Ok(out)
}

fn synthetic_dir(ino: u64, mount_time: i64) -> Entry {
    Entry {
        ino,
        kind: Kind::Dir,
        perm: 0o555,
        size: 0,
        mtime: mount_time,
    }
}

fn bind_entry(
    ledger: &Ledger,
    oid: Oid,
    tag: Tag,
    raw_mode: u32,
    commit_time: Option<i64>,
) -> Result<Entry, FsError> {
    let ino = allocate_or_clash(ledger, oid, tag, raw_mode, commit_time)?;
    Ok(Entry {
        ino,
        kind: Kind::Dir,
        perm: 0o555,
        size: 0,
        mtime: commit_time.unwrap_or(0),
    })
}

fn bind_file_entry(
    ledger: &Ledger,
    oid: Oid,
    raw_mode: u32,
    size: u64,
    commit_time: Option<i64>,
) -> Result<Entry, FsError> {
    let ino = allocate_or_clash(ledger, oid, Tag::Blob, raw_mode, commit_time)?;
    Ok(Entry {
        ino,
        kind: Kind::File,
        perm: perm_for_mode(raw_mode),
        size,
        mtime: commit_time.unwrap_or(0),
    })
}

fn perm_for_mode(raw_mode: u32) -> u16 {
    if raw_mode == MODE_FILE_EXEC {
        0o555
    } else {
        0o444
    }
}

/// `allocate`'s `Clash` result becomes `EUCLEAN` at the resolver
/// boundary (loser semantics: first allocation wins).
fn allocate_or_clash(
    ledger: &Ledger,
    oid: Oid,
    tag: Tag,
    raw_mode: u32,
    commit_time: Option<i64>,
) -> Result<u64, FsError> {
    match ledger.allocate(oid, tag, raw_mode, commit_time) {
        crate::inode::Allocation::Bound(ino) => Ok(ino),
        crate::inode::Allocation::Clash => Err(FsError::InodeClash),
    }
}

/// Submodule (gitlink, mode `160000`) entries never enter the ledger,
/// they carry no content to dedupe against, so their ino is derived
/// straight from the low 60 bits of the child oid with the synthetic
/// tag, same formula as the ledger's own `candidate_ino`
/// §4.C: "a synthetic child ino disjoint from any Git-derived inode").
fn gitlink_ino(oid: Oid) -> u64 {
    oid.low60() | SYNTHETIC_TAG_BITS
}

fn is_gitlink_ino(ino: u64) -> bool {
    ino & SYNTHETIC_TAG_BITS == SYNTHETIC_TAG_BITS
        && ![ROOT_INO, COMMITS_INO, BRANCHES_INO, TAGS_INO, HEAD_INO].contains(&ino)
}

fn not_found_as_fs_error(e: crate::error::AdapterError) -> FsError {
    FsError::from(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{CommitInfo, TreeEntry, WatchHandle};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    /// A tiny in-memory `ObjectStore` standing in for `Git2Adapter` so
    /// the resolver's request contracts can be exercised without a
    /// real git2 repository.
    struct FakeStore {
        commits: HashMap<Oid, CommitInfo>,
        trees: HashMap<Oid, Vec<TreeEntry>>,
        blobs: HashMap<Oid, Vec<u8>>,
        refs: HashMap<String, Oid>,
        branches: Vec<String>,
    }

    impl ObjectStore for FakeStore {
        fn find_commit(&self, oid: Oid) -> Result<CommitInfo, crate::error::AdapterError> {
            self.commits.get(&oid).copied().ok_or(crate::error::AdapterError::NotFound)
        }
        fn find_tree(&self, oid: Oid) -> Result<Vec<TreeEntry>, crate::error::AdapterError> {
            self.trees.get(&oid).cloned().ok_or(crate::error::AdapterError::NotFound)
        }
        fn find_blob(&self, oid: Oid) -> Result<Vec<u8>, crate::error::AdapterError> {
            self.blobs.get(&oid).cloned().ok_or(crate::error::AdapterError::NotFound)
        }
        fn blob_size(&self, oid: Oid) -> Result<u64, crate::error::AdapterError> {
            self.blobs.get(&oid).map(|b| b.len() as u64).ok_or(crate::error::AdapterError::NotFound)
        }
        fn resolve_ref(&self, refname: &str) -> Result<Oid, crate::error::AdapterError> {
            self.refs.get(refname).copied().ok_or(crate::error::AdapterError::NotFound)
        }
        fn enumerate_refs(&self, namespace: RefNamespace) -> Result<Vec<String>, crate::error::AdapterError> {
            match namespace {
                RefNamespace::Branches => Ok(self.branches.clone()),
                RefNamespace::Tags => Ok(Vec::new()),
            }
        }
        fn watch_refs(
            &self,
            _poll_interval: Duration,
            _callback: Box<dyn Fn(&str) + Send + Sync>,
        ) -> WatchHandle {
            WatchHandle {
                stop: Arc::new(AtomicBool::new(true)),
                thread: None,
            }
        }
    }

    fn oid_of(byte: u8) -> Oid {
        let mut raw = [0u8; 20];
        raw[19] = byte;
        Oid::from_bytes(&raw).unwrap()
    }

    fn fixture() -> FakeStore {
        let commit_oid = oid_of(1);
        let tree_oid = oid_of(2);
        let blob_oid = oid_of(3);
        let mut commits = HashMap::new();
        commits.insert(
            commit_oid,
            CommitInfo {
                tree_oid,
                committer_time: 1_700_000_000,
            },
        );
        let mut trees = HashMap::new();
        trees.insert(
            tree_oid,
            vec![TreeEntry {
                name: "hello.txt".to_string(),
                mode: MODE_FILE,
                child_oid: blob_oid,
            }],
        );
        let mut blobs = HashMap::new();
        blobs.insert(blob_oid, b"hi\n".to_vec());
        let mut refs = HashMap::new();
        refs.insert("HEAD".to_string(), commit_oid);
        refs.insert("refs/heads/main".to_string(), commit_oid);
        FakeStore {
            commits,
            trees,
            blobs,
            refs,
            branches: vec!["main".to_string()],
        }
    }

    #[test]
    fn lookup_root_resolves_fixed_names() {
        let ledger = Ledger::new(None).unwrap();
        let entry = lookup(&fixture(), &ledger, 0, ROOT_INO, "commits").unwrap();
        assert_eq!(entry.ino, COMMITS_INO);
        assert_eq!(entry.kind, Kind::Dir);

        let err = lookup(&fixture(), &ledger, 0, ROOT_INO, "nope").unwrap_err();
        assert!(matches!(err, FsError::NotFound));
    }

    #[test]
    fn lookup_commit_then_file_reads_content() {
        let store = fixture();
        let ledger = Ledger::new(None).unwrap();
        let commit_hex = oid_of(1).to_hex();

        let tree_entry = lookup(&store, &ledger, 0, COMMITS_INO, &commit_hex).unwrap();
        assert_eq!(tree_entry.kind, Kind::Dir);
        assert_eq!(tree_entry.mtime, 1_700_000_000);

        let file_entry = lookup(&store, &ledger, 0, tree_entry.ino, "hello.txt").unwrap();
        assert_eq!(file_entry.kind, Kind::File);
        assert_eq!(file_entry.perm, 0o444);
        assert_eq!(file_entry.size, 3);

        let bytes = read(&store, &ledger, file_entry.ino, 0, 100).unwrap();
        assert_eq!(bytes, b"hi\n");
    }

    #[test]
    fn malformed_commit_id_is_not_found() {
        let ledger = Ledger::new(None).unwrap();
        let err = lookup(&fixture(), &ledger, 0, COMMITS_INO, "deadbeef").unwrap_err();
        assert!(matches!(err, FsError::NotFound));
        let err = lookup(&fixture(), &ledger, 0, COMMITS_INO, &"0".repeat(40)).unwrap_err();
        assert!(matches!(err, FsError::NotFound));
    }

    #[test]
    fn branch_symlink_targets_commits_oid() {
        let store = fixture();
        let ledger = Ledger::new(None).unwrap();
        let entry = lookup(&store, &ledger, 0, BRANCHES_INO, "main").unwrap();
        assert_eq!(entry.kind, Kind::Symlink);
        let target = readlink(&store, &ledger, entry.ino).unwrap();
        assert_eq!(target, format!("../commits/{}", oid_of(1)).into_bytes());
    }

    #[test]
    fn read_past_end_is_empty_not_error() {
        let store = fixture();
        let ledger = Ledger::new(None).unwrap();
        let commit_hex = oid_of(1).to_hex();
        let tree_entry = lookup(&store, &ledger, 0, COMMITS_INO, &commit_hex).unwrap();
        let file_entry = lookup(&store, &ledger, 0, tree_entry.ino, "hello.txt").unwrap();
        let bytes = read(&store, &ledger, file_entry.ino, 1000, 10).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn open_refuses_write_access_modes() {
        assert!(open(libc::O_RDONLY).is_ok());
        assert!(matches!(open(libc::O_WRONLY).unwrap_err(), FsError::ReadOnly));
        assert!(matches!(open(libc::O_RDWR).unwrap_err(), FsError::ReadOnly));
    }

    #[test]
    fn readdir_commits_is_always_empty() {
        let ledger = Ledger::new(None).unwrap();
        let entries = readdir(&fixture(), &ledger, COMMITS_INO, 0).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn readdir_offsets_are_stable_and_sequential() {
        let store = fixture();
        let ledger = Ledger::new(None).unwrap();
        let commit_hex = oid_of(1).to_hex();
        let tree_entry = lookup(&store, &ledger, 0, COMMITS_INO, &commit_hex).unwrap();
        let entries = readdir(&store, &ledger, tree_entry.ino, 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].next_offset, 1);
        let resumed = readdir(&store, &ledger, tree_entry.ino, 1).unwrap();
        assert!(resumed.is_empty());
    }

    #[test]
    fn getattr_on_unknown_ino_is_stale() {
        let ledger = Ledger::new(None).unwrap();
        let err = getattr(&ledger, 0, 0xDEAD_BEEF).unwrap_err();
        assert!(matches!(err, FsError::Stale));
    }
}
