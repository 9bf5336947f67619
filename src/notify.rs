//! Turns `ObjectStore::watch_refs`
//! events into `notify_entry_invalidate(parent_ino, name)` calls, so the
//! kernel re-`lookup`s a moved branch/tag instead of serving a stale
//! symlink target from its dentry cache.
//!
//! Commit trees are content-addressed by oid and therefore immutable;
//! nothing under `/commits/<id>` is ever invalidated.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::adapter::{ObjectStore, RefNamespace, WatchHandle};
use crate::resolver::{BRANCHES_INO, ROOT_INO, TAGS_INO};

/// The one kernel-facing operation this module needs from the FUSE
/// session. `fuse_fs.rs` implements this against `fuser`'s real
/// notifier; tests implement it with a channel.
pub trait EntryInvalidator: Send + Sync {
    fn invalidate_entry(&self, parent_ino: u64, name: &str);
}

/// Starts the background ref-watch thread and wires its callback to
/// `invalidator`. Dropping the returned handle stops the watcher
/// (`WatchHandle`'s `Drop` joins the thread).
pub fn start(
    store: Arc<dyn ObjectStore>,
    poll_interval: Duration,
    invalidator: Arc<dyn EntryInvalidator>,
) -> WatchHandle {
    let watch_store = store.clone();
    store.watch_refs(
        poll_interval,
        Box::new(move |changed_path: &str| {
            handle_change(watch_store.as_ref(), invalidator.as_ref(), changed_path);
        }),
    )
}

fn handle_change(store: &dyn ObjectStore, invalidator: &dyn EntryInvalidator, changed_path: &str) {
    debug!("ref-freshness: {changed_path} changed");
    if let Some(name) = changed_path.strip_prefix("refs/heads/") {
        invalidator.invalidate_entry(BRANCHES_INO, name);
    } else if let Some(name) = changed_path.strip_prefix("refs/tags/") {
        invalidator.invalidate_entry(TAGS_INO, name);
    } else if changed_path == "HEAD" {
        invalidator.invalidate_entry(ROOT_INO, "HEAD");
    } else if changed_path == "packed-refs" {
        // A pack of refs moved at once with no single name to point
        // at; conservatively invalidate everything currently known in
        // both namespaces rather than guess which moved.
        invalidate_all(store, invalidator, RefNamespace::Branches, BRANCHES_INO);
        invalidate_all(store, invalidator, RefNamespace::Tags, TAGS_INO);
    }
}

fn invalidate_all(
    store: &dyn ObjectStore,
    invalidator: &dyn EntryInvalidator,
    namespace: RefNamespace,
    parent_ino: u64,
) {
    if let Ok(names) = store.enumerate_refs(namespace) {
        for name in names {
            invalidator.invalidate_entry(parent_ino, &name);
        }
    }
}

/// TTL fallback: used by the resolver/FUSE glue when
/// filling attribute replies, independent of whether the notifier is
/// actually running.
#[derive(Clone, Copy, Debug)]
pub struct TtlConfig {
    pub ref_ttl: Duration,
    pub commit_ttl: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        TtlConfig {
            ref_ttl: Duration::from_secs(2),
            commit_ttl: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingInvalidator {
        calls: Mutex<Vec<(u64, String)>>,
    }

    impl EntryInvalidator for RecordingInvalidator {
        fn invalidate_entry(&self, parent_ino: u64, name: &str) {
            self.calls.lock().unwrap().push((parent_ino, name.to_string()));
        }
    }

    struct EmptyStore;
    impl ObjectStore for EmptyStore {
        fn find_commit(&self, _oid: crate::oid::Oid) -> Result<crate::adapter::CommitInfo, crate::error::AdapterError> {
            Err(crate::error::AdapterError::NotFound)
        }
        fn find_tree(&self, _oid: crate::oid::Oid) -> Result<Vec<crate::adapter::TreeEntry>, crate::error::AdapterError> {
            Err(crate::error::AdapterError::NotFound)
        }
        fn find_blob(&self, _oid: crate::oid::Oid) -> Result<Vec<u8>, crate::error::AdapterError> {
            Err(crate::error::AdapterError::NotFound)
        }
        fn blob_size(&self, _oid: crate::oid::Oid) -> Result<u64, crate::error::AdapterError> {
            Err(crate::error::AdapterError::NotFound)
        }
        fn resolve_ref(&self, _refname: &str) -> Result<crate::oid::Oid, crate::error::AdapterError> {
            Err(crate::error::AdapterError::NotFound)
        }
        fn enumerate_refs(&self, _namespace: RefNamespace) -> Result<Vec<String>, crate::error::AdapterError> {
            Ok(vec!["main".to_string()])
        }
        fn watch_refs(
            &self,
            _poll_interval: Duration,
            _callback: Box<dyn Fn(&str) + Send + Sync>,
        ) -> WatchHandle {
            unimplemented!("not exercised directly in these tests")
        }
    }

    #[test]
    fn branch_change_invalidates_under_branches_root() {
        let inv = RecordingInvalidator { calls: Mutex::new(Vec::new()) };
        handle_change(&EmptyStore, &inv, "refs/heads/main");
        assert_eq!(inv.calls.lock().unwrap()[0], (BRANCHES_INO, "main".to_string()));
    }

    #[test]
    fn head_change_invalidates_root_head() {
        let inv = RecordingInvalidator { calls: Mutex::new(Vec::new()) };
        handle_change(&EmptyStore, &inv, "HEAD");
        assert_eq!(inv.calls.lock().unwrap()[0], (ROOT_INO, "HEAD".to_string()));
    }

    #[test]
    fn packed_refs_change_invalidates_every_known_ref() {
        let inv = RecordingInvalidator { calls: Mutex::new(Vec::new()) };
        handle_change(&EmptyStore, &inv, "packed-refs");
        let calls = inv.calls.lock().unwrap();
        assert!(calls.contains(&(BRANCHES_INO, "main".to_string())));
        assert!(calls.contains(&(TAGS_INO, "main".to_string())));
    }

    #[test]
    fn default_ttls_are_two_and_three_hundred_seconds() {
        let ttl = TtlConfig::default();
        assert_eq!(ttl.ref_ttl, Duration::from_secs(2));
        assert_eq!(ttl.commit_ttl, Duration::from_secs(300));
    }
}
