//! The narrow, pure-read contract the rest of the core uses to reach
//! the Git object store.
//!
//! `git2::Repository` is neither `Send` nor `Sync`, so each thread
//! that calls into `Git2Adapter` opens (and keeps) its own handle in a
//! `ThreadLocal`, the same way libgit2 work gets farmed out across
//! worker threads.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use lru::LruCache;
use thread_local::ThreadLocal;

use crate::error::AdapterError;
use crate::oid::Oid;

/// One entry of a decoded Git tree: name, raw mode, child object id.
#[derive(Clone, Debug)]
pub struct TreeEntry {
    pub name: String,
    pub mode: u32,
    pub child_oid: Oid,
}

/// A found commit: its tree and committer time (Unix seconds).
#[derive(Clone, Copy, Debug)]
pub struct CommitInfo {
    pub tree_oid: Oid,
    pub committer_time: i64,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum RefNamespace {
    Branches,
    Tags,
}

/// Subscription handle returned by `watch_refs`; dropping it stops the
/// background poller.
pub struct WatchHandle {
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// The pure-read contract the core consumes. All operations are
/// reads; none mutate the repository.
pub trait ObjectStore: Send + Sync {
    fn find_commit(&self, oid: Oid) -> Result<CommitInfo, AdapterError>;
    fn find_tree(&self, oid: Oid) -> Result<Vec<TreeEntry>, AdapterError>;
    fn find_blob(&self, oid: Oid) -> Result<Vec<u8>, AdapterError>;
    fn blob_size(&self, oid: Oid) -> Result<u64, AdapterError>;
    fn resolve_ref(&self, refname: &str) -> Result<Oid, AdapterError>;
    fn enumerate_refs(&self, namespace: RefNamespace) -> Result<Vec<String>, AdapterError>;
    fn watch_refs(
        &self,
        poll_interval: Duration,
        callback: Box<dyn Fn(&str) + Send + Sync>,
    ) -> WatchHandle;
}

/// Bounds for the tree/blob LRU caches.
pub struct CacheLimits {
    pub tree_entries: usize,
    pub small_blob_bytes: u64,
}

/// Blobs larger than this never enter the small-blob cache, no matter
/// how much budget remains - a single huge blob shouldn't evict
/// everything else.
const SMALL_BLOB_CEILING: u64 = 1 << 20; // 1 MiB

struct BlobCacheEntry {
    bytes: std::sync::Arc<Vec<u8>>,
}

pub struct Git2Adapter {
    repo_path: PathBuf,
    repos: ThreadLocal<RefCell<git2::Repository>>,
    tree_cache: Mutex<LruCache<Oid, std::sync::Arc<Vec<TreeEntry>>>>,
    blob_cache: Mutex<LruCache<Oid, BlobCacheEntry>>,
    blob_cache_budget: u64,
    blob_cache_used: Mutex<u64>,
}

impl Git2Adapter {
    pub fn open(repo_path: impl Into<PathBuf>, limits: CacheLimits) -> Result<Self, AdapterError> {
        let repo_path = repo_path.into();
        // Validate eagerly so a bad --repo path fails at startup, not
        // on the first kernel request.
        git2::Repository::open(&repo_path)?;
        let tree_cap = std::num::NonZeroUsize::new(limits.tree_entries.max(1)).unwrap();
        // The blob cache is keyed by count too, but eviction also
        // respects a byte budget tracked alongside it.
        let blob_cap = std::num::NonZeroUsize::new(4096).unwrap();
        Ok(Git2Adapter {
            repo_path,
            repos: ThreadLocal::new(),
            tree_cache: Mutex::new(LruCache::new(tree_cap)),
            blob_cache: Mutex::new(LruCache::new(blob_cap)),
            blob_cache_budget: limits.small_blob_bytes,
            blob_cache_used: Mutex::new(0),
        })
    }

    fn with_repo<T>(&self, f: impl FnOnce(&git2::Repository) -> Result<T, git2::Error>) -> Result<T, AdapterError> {
        let cell = self.repos.get_or_try(|| -> Result<_, git2::Error> {
            Ok(RefCell::new(git2::Repository::open(&self.repo_path)?))
        })?;
        let repo = cell.borrow();
        f(&repo).map_err(AdapterError::Io)
    }

    fn peel_ref_to_commit(repo: &git2::Repository, refname: &str) -> Result<git2::Oid, git2::Error> {
        let obj = repo.revparse_single(refname)?;
        let peeled = obj.peel(git2::ObjectType::Commit)?;
        peeled
            .into_commit()
            .map(|c| c.id())
            .map_err(|_| git2::Error::from_str("ref does not resolve to a commit"))
    }
}

impl ObjectStore for Git2Adapter {
    fn find_commit(&self, oid: Oid) -> Result<CommitInfo, AdapterError> {
        let g2oid: git2::Oid = oid.try_into().map_err(AdapterError::Io)?;
        self.with_repo(|repo| {
            let commit = repo.find_commit(g2oid).map_err(not_found_or_io)?;
            Ok(CommitInfo {
                tree_oid: commit.tree_id().into(),
                committer_time: commit.committer().when().seconds(),
            })
        })
    }

    fn find_tree(&self, oid: Oid) -> Result<Vec<TreeEntry>, AdapterError> {
        if let Some(hit) = self.tree_cache.lock().unwrap().get(&oid) {
            return Ok((**hit).clone());
        }
        let g2oid: git2::Oid = oid.try_into().map_err(AdapterError::Io)?;
        let entries = self.with_repo(|repo| {
            let tree = repo.find_tree(g2oid).map_err(not_found_or_io)?;
            let mut out = Vec::with_capacity(tree.len());
            for entry in tree.iter() {
                out.push(TreeEntry {
                    name: entry.name().unwrap_or_default().to_string(),
                    mode: entry.filemode() as u32,
                    child_oid: entry.id().into(),
                });
            }
            Ok(out)
        })?;
        let arc = std::sync::Arc::new(entries);
        self.tree_cache.lock().unwrap().put(oid, arc.clone());
        Ok((*arc).clone())
    }

    fn find_blob(&self, oid: Oid) -> Result<Vec<u8>, AdapterError> {
        if let Some(hit) = self.blob_cache.lock().unwrap().get(&oid) {
            return Ok((*hit.bytes).clone());
        }
        let g2oid: git2::Oid = oid.try_into().map_err(AdapterError::Io)?;
        let bytes = self.with_repo(|repo| {
            let blob = repo.find_blob(g2oid).map_err(not_found_or_io)?;
            Ok(blob.content().to_vec())
        })?;

        let size = bytes.len() as u64;
        if size <= SMALL_BLOB_CEILING {
            let mut used = self.blob_cache_used.lock().unwrap();
            let mut cache = self.blob_cache.lock().unwrap();
            while *used + size > self.blob_cache_budget {
                match cache.pop_lru() {
                    Some((_, evicted)) => *used = used.saturating_sub(evicted.bytes.len() as u64),
                    None => break,
                }
            }
            if *used + size <= self.blob_cache_budget {
                cache.put(
                    oid,
                    BlobCacheEntry {
                        bytes: std::sync::Arc::new(bytes.clone()),
                    },
                );
                *used += size;
            }
        }
        Ok(bytes)
    }

    fn blob_size(&self, oid: Oid) -> Result<u64, AdapterError> {
        if let Some(hit) = self.blob_cache.lock().unwrap().peek(&oid) {
            return Ok(hit.bytes.len() as u64);
        }
        let g2oid: git2::Oid = oid.try_into().map_err(AdapterError::Io)?;
        self.with_repo(|repo| {
            let odb = repo.odb()?;
            let (size, _kind) = odb.read_header(g2oid).map_err(not_found_or_io_git)?;
            Ok(size as u64)
        })
    }

    fn resolve_ref(&self, refname: &str) -> Result<Oid, AdapterError> {
        self.with_repo(|repo| {
            Self::peel_ref_to_commit(repo, refname)
                .map(Oid::from)
                .map_err(not_found_or_io)
        })
    }

    fn enumerate_refs(&self, namespace: RefNamespace) -> Result<Vec<String>, AdapterError> {
        let prefix = match namespace {
            RefNamespace::Branches => "refs/heads/",
            RefNamespace::Tags => "refs/tags/",
        };
        self.with_repo(|repo| {
            let mut names: Vec<String> = repo
                .references_glob(&format!("{prefix}*"))?
                .filter_map(|r| r.ok())
                .filter_map(|r| r.name().map(|n| n.trim_start_matches(prefix).to_string()))
                .collect();
            names.sort();
            Ok(names)
        })
    }

    fn watch_refs(
        &self,
        poll_interval: Duration,
        callback: Box<dyn Fn(&str) + Send + Sync>,
    ) -> WatchHandle {
        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_clone = stop.clone();
        let repo_path = self.repo_path.clone();

        let thread = std::thread::Builder::new()
            .name("gitsnapfs-ref-watch".into())
            .spawn(move || ref_watch_loop(repo_path, poll_interval, stop_clone, callback))
            .expect("failed to spawn ref-watch thread");

        WatchHandle {
            stop,
            thread: Some(thread),
        }
    }
}

fn not_found_or_io(e: git2::Error) -> AdapterError {
    if e.code() == git2::ErrorCode::NotFound {
        AdapterError::NotFound
    } else {
        AdapterError::Io(e)
    }
}

fn not_found_or_io_git(e: git2::Error) -> AdapterError {
    not_found_or_io(e)
}

/// Polls `HEAD`, `packed-refs`, and `refs/` for mtime changes since
/// libgit2 has no native ref-change callback, and invokes `callback`
/// once per refname whose target moved.
fn ref_watch_loop(
    repo_path: PathBuf,
    poll_interval: Duration,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
    callback: Box<dyn Fn(&str) + Send + Sync>,
) {
    let git_dir = resolve_git_dir(&repo_path);
    let mut last_seen: std::collections::HashMap<String, SystemTime> = std::collections::HashMap::new();

    while !stop.load(std::sync::atomic::Ordering::SeqCst) {
        if let Ok(current) = snapshot_ref_mtimes(&git_dir) {
            for (name, mtime) in &current {
                if last_seen.get(name) != Some(mtime) {
                    callback(name);
                }
            }
            for name in last_seen.keys() {
                if !current.contains_key(name) {
                    callback(name);
                }
            }
            last_seen = current;
        }
        std::thread::sleep(poll_interval);
    }
}

fn resolve_git_dir(repo_path: &Path) -> PathBuf {
    if repo_path.join("HEAD").is_file() {
        repo_path.to_path_buf()
    } else {
        repo_path.join(".git")
    }
}

fn snapshot_ref_mtimes(
    git_dir: &Path,
) -> std::io::Result<std::collections::HashMap<String, SystemTime>> {
    let mut out = std::collections::HashMap::new();

    if let Ok(meta) = std::fs::metadata(git_dir.join("HEAD")) {
        out.insert("HEAD".to_string(), meta.modified()?);
    }
    if let Ok(meta) = std::fs::metadata(git_dir.join("packed-refs")) {
        out.insert("packed-refs".to_string(), meta.modified()?);
    }

    let refs_dir = git_dir.join("refs");
    let mut stack = vec![refs_dir.clone()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(meta) = entry.metadata() {
                if let Ok(mtime) = meta.modified() {
                    let rel = path
                        .strip_prefix(git_dir)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .replace('\\', "/");
                    out.insert(rel, mtime);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo_with_file(dir: &Path, name: &str, content: &[u8]) -> (git2::Repository, git2::Oid) {
        let repo = git2::Repository::init(dir).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        let tree_oid = index.write_tree().unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();
        let commit_oid = repo
            .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        (repo, commit_oid)
    }

    #[test]
    fn finds_commit_tree_and_blob() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, commit_oid) = init_repo_with_file(dir.path(), "hello.txt", b"hi\n");

        let adapter = Git2Adapter::open(
            dir.path(),
            CacheLimits {
                tree_entries: 16,
                small_blob_bytes: 1 << 20,
            },
        )
        .unwrap();

        let commit = adapter.find_commit(commit_oid.into()).unwrap();
        let entries = adapter.find_tree(commit.tree_oid).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "hello.txt");

        let blob = adapter.find_blob(entries[0].child_oid).unwrap();
        assert_eq!(blob, b"hi\n");
    }

    #[test]
    fn resolve_ref_follows_head() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, commit_oid) = init_repo_with_file(dir.path(), "a.txt", b"a");

        let adapter = Git2Adapter::open(
            dir.path(),
            CacheLimits {
                tree_entries: 16,
                small_blob_bytes: 1024,
            },
        )
        .unwrap();
        let resolved = adapter.resolve_ref("HEAD").unwrap();
        assert_eq!(resolved, Oid::from(commit_oid));
    }

    #[test]
    fn enumerate_branches_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, commit_oid) = init_repo_with_file(dir.path(), "a.txt", b"a");
        let commit = repo.find_commit(commit_oid).unwrap();
        repo.branch("zeta", &commit, false).unwrap();
        repo.branch("alpha", &commit, false).unwrap();

        let adapter = Git2Adapter::open(
            dir.path(),
            CacheLimits {
                tree_entries: 16,
                small_blob_bytes: 1024,
            },
        )
        .unwrap();
        let branches = adapter.enumerate_refs(RefNamespace::Branches).unwrap();
        assert!(branches.contains(&"alpha".to_string()));
        assert!(branches.contains(&"zeta".to_string()));
        let mut sorted = branches.clone();
        sorted.sort();
        assert_eq!(branches, sorted);
    }

    #[test]
    fn find_blob_of_unknown_oid_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_file(dir.path(), "a.txt", b"a");
        let adapter = Git2Adapter::open(
            dir.path(),
            CacheLimits {
                tree_entries: 16,
                small_blob_bytes: 1024,
            },
        )
        .unwrap();
        let bogus = Oid::from_hex(&"0".repeat(40)).unwrap();
        match adapter.find_blob(bogus) {
            Err(AdapterError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

}
