//! Derives stable 64-bit inode numbers
//! from Git object ids, detects collisions, and persists the winning
//! bindings as an append-only log.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use dashmap::{DashMap, DashSet};
use log::{debug, warn};

use crate::oid::Oid;

/// Object-type tag: a 4-bit enumeration packed into the
/// top bits of the inode number.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Tag {
    Blob = 0,
    Tree = 1,
    Commit = 2,
    Symlink = 3,
    /// Fixed roots (`/`, `/commits`, `/branches`, `/tags`, `HEAD`) and
    /// the synthetic directories gitlinks (§4.C) reserve.
    Synthetic = 0x7F,
}

impl Tag {
    fn from_raw(raw: u8) -> Option<Tag> {
        match raw {
            0 => Some(Tag::Blob),
            1 => Some(Tag::Tree),
            2 => Some(Tag::Commit),
            3 => Some(Tag::Symlink),
            0x7F => Some(Tag::Synthetic),
            _ => None,
        }
    }
}

/// The winning `(oid, tag)` bound to an inode, plus two display-only
/// attributes captured at first-allocation time and held immutable
/// thereafter, same as the binding itself:
///
/// - `raw_mode`: the git tree-entry filemode the object was first seen
///   under (executable bit lives on the tree entry, not the blob).
/// - `commit_time`: the committer time of the `/commits/<id>` this
///   entity was first reached through, if any. The on-disk ledger
///   on-disk record has no room for either field, so a binding
///   recovered purely from a replayed state file carries `None`/a
///   tag-derived default mode; `getattr` falls back to the mount time
///   and a non-executable mode in that case (see resolver.rs).
#[derive(Clone, Copy, Debug)]
pub struct Binding {
    pub oid: Oid,
    pub tag: Tag,
    pub raw_mode: u32,
    pub commit_time: Option<i64>,
}

/// Result of `Ledger::allocate`.
#[derive(Debug, Eq, PartialEq)]
pub enum Allocation {
    Bound(u64),
    Clash,
}

const RECORD_LEN: usize = 44;

/// Computes the candidate inode for an `(oid, tag)` pair, before
/// collision resolution: `(low_60_bits(oid) | (tag << 60))`.
fn candidate_ino(oid: &Oid, tag: Tag) -> u64 {
    oid.low60() | ((tag as u64) << 60)
}

/// `ino → (oid, tag)` plus a `clash` set.
pub struct Ledger {
    bindings: DashMap<u64, Binding>,
    clash: DashSet<u64>,
    state_file: Option<PathBuf>,
}

impl Ledger {
    pub fn new(state_file: Option<PathBuf>) -> io::Result<Self> {
        let ledger = Ledger {
            bindings: DashMap::new(),
            clash: DashSet::new(),
            state_file,
        };
        if let Some(path) = ledger.state_file.clone() {
            ledger.replay(&path)?;
        }
        Ok(ledger)
    }

    /// `allocate(oid, tag) → ino | Clash`.
    ///
    /// Atomic with respect to concurrent callers: `DashMap::entry`
    /// holds the shard lock for the candidate bucket across the
    /// read-then-maybe-insert, so two threads racing on the same
    /// candidate serialize and agree on a winner.
    pub fn allocate(&self, oid: Oid, tag: Tag, raw_mode: u32, commit_time: Option<i64>) -> Allocation {
        let candidate = candidate_ino(&oid, tag);
        match self.bindings.entry(candidate) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Binding {
                    oid,
                    tag,
                    raw_mode,
                    commit_time,
                });
                if let Some(path) = &self.state_file {
                    if let Err(e) = append_record(path, candidate, &oid, tag, false) {
                        warn!("failed to persist ledger record for {oid}: {e}");
                    }
                }
                Allocation::Bound(candidate)
            }
            dashmap::mapref::entry::Entry::Occupied(slot) => {
                let existing = *slot.get();
                if existing.oid == oid && existing.tag == tag {
                    Allocation::Bound(candidate)
                } else {
                    self.clash.insert(candidate);
                    if let Some(path) = &self.state_file {
                        if let Err(e) = append_record(path, candidate, &oid, tag, true) {
                            warn!("failed to persist clash record for {oid}: {e}");
                        }
                    }
                    debug!(
                        "inode {candidate:#x} clash: existing={existing:?} loser={oid}/{tag:?}"
                    );
                    Allocation::Clash
                }
            }
        }
    }

    /// `bound(ino) → (oid, tag) | Unbound`.
    pub fn bound(&self, ino: u64) -> Option<Binding> {
        self.bindings.get(&ino).map(|r| *r)
    }

    pub fn is_clash(&self, ino: u64) -> bool {
        self.clash.contains(&ino)
    }

    /// Fsyncs the state file, if configured. Called at quiesce
    /// boundaries and before every exec handover.
    pub fn flush(&self) -> io::Result<()> {
        if let Some(path) = &self.state_file {
            let file = OpenOptions::new().append(true).open(path)?;
            file.sync_all()?;
        }
        Ok(())
    }

    fn replay(&self, path: &Path) -> io::Result<()> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let whole_records = buf.len() / RECORD_LEN;
        let tail_garbage = buf.len() % RECORD_LEN;
        if tail_garbage != 0 {
            warn!(
                "ledger state file has a truncated tail record ({tail_garbage} bytes); discarding it"
            );
        }

        for i in 0..whole_records {
            let rec = &buf[i * RECORD_LEN..(i + 1) * RECORD_LEN];
            if let Some((ino, oid, tag, is_clash)) = decode_record(rec) {
                if is_clash {
                    self.clash.insert(ino);
                } else {
                    self.bindings.entry(ino).or_insert(Binding {
                        oid,
                        tag,
                        raw_mode: default_raw_mode(tag),
                        commit_time: None,
                    });
                }
            } else {
                warn!("ledger state file contains an unrecognized record; skipping");
            }
        }
        Ok(())
    }
}

fn append_record(path: &Path, ino: u64, oid: &Oid, tag: Tag, is_clash: bool) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let rec = encode_record(ino, oid, tag, is_clash);
    file.write_all(&rec)?;
    Ok(())
}

/// `{ ino: u64, tag: u8, oid_len: u8, oid_bytes: [u8; 32], flags: u8, _pad: u8 }`
/// little-endian.
fn encode_record(ino: u64, oid: &Oid, tag: Tag, is_clash: bool) -> [u8; RECORD_LEN] {
    let mut rec = [0u8; RECORD_LEN];
    rec[0..8].copy_from_slice(&ino.to_le_bytes());
    rec[8] = tag as u8;
    rec[9] = oid.len() as u8;
    rec[10..10 + oid.len()].copy_from_slice(oid.as_bytes());
    rec[10 + 32] = if is_clash { 1 } else { 0 };
    rec[10 + 32 + 1] = 0; // _pad
    rec
}

/// Fallback git filemode for a binding recovered from disk without its
/// live `raw_mode`, conservative (non-executable) for blobs.
pub fn default_raw_mode(tag: Tag) -> u32 {
    match tag {
        Tag::Blob => 0o100644,
        Tag::Tree => 0o040000,
        Tag::Symlink => 0o120000,
        Tag::Commit | Tag::Synthetic => 0,
    }
}

fn decode_record(rec: &[u8]) -> Option<(u64, Oid, Tag, bool)> {
    if rec.len() != RECORD_LEN {
        return None;
    }
    let ino = u64::from_le_bytes(rec[0..8].try_into().ok()?);
    let tag = Tag::from_raw(rec[8])?;
    let oid_len = rec[9] as usize;
    if oid_len != Oid::SHA1_LEN && oid_len != Oid::SHA256_LEN {
        return None;
    }
    let oid = Oid::from_bytes(&rec[10..10 + oid_len])?;
    let flags = rec[10 + 32];
    let is_clash = flags & 0b1 != 0;
    Some((ino, oid, tag, is_clash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn oid_of(byte: u8) -> Oid {
        let mut raw = [0u8; 20];
        raw[19] = byte;
        Oid::from_bytes(&raw).unwrap()
    }

    #[test]
    fn first_allocation_binds_and_repeats_agree() {
        let ledger = Ledger::new(None).unwrap();
        let oid = oid_of(1);
        let first = ledger.allocate(oid, Tag::Blob, 0o100644, None);
        let second = ledger.allocate(oid, Tag::Blob, 0o100644, None);
        assert_eq!(first, second);
        assert!(matches!(first, Allocation::Bound(_)));
    }

    #[test]
    fn different_object_same_candidate_clashes() {
        let ledger = Ledger::new(None).unwrap();
        // Craft two OIDs whose low-60-bits (post tag mask) collide:
        // same low 8 bytes, differing in an untouched high byte only
        // affects low60 if that byte falls in the last 8, so instead
        // we directly exercise the allocator by forcing identical
        // low60 through identical last-8-bytes but different OIDs.
        let mut a = [0u8; 20];
        let mut b = [0u8; 20];
        a[0] = 0xAA;
        b[0] = 0xBB;
        let oid_a = Oid::from_bytes(&a).unwrap();
        let oid_b = Oid::from_bytes(&b).unwrap();

        let first = ledger.allocate(oid_a, Tag::Blob, 0o100644, None);
        let Allocation::Bound(ino) = first else {
            panic!("expected bound")
        };
        let second = ledger.allocate(oid_b, Tag::Blob, 0o100644, None);
        assert_eq!(second, Allocation::Clash);
        assert!(ledger.is_clash(ino));
        // winner's binding is unchanged
        let bound = ledger.bound(ino).unwrap();
        assert_eq!(bound.oid, oid_a);
    }

    #[test]
    fn different_tag_same_oid_does_not_clash() {
        let ledger = Ledger::new(None).unwrap();
        let oid = oid_of(7);
        let blob_ino = ledger.allocate(oid, Tag::Blob, 0o100644, None);
        let tree_ino = ledger.allocate(oid, Tag::Tree, 0o040000, None);
        assert_ne!(blob_ino, tree_ino);
    }

    #[test]
    fn persists_and_reloads_winning_binding() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("ledger.log");

        let oid = oid_of(42);
        {
            let ledger = Ledger::new(Some(state_path.clone())).unwrap();
            ledger.allocate(oid, Tag::Commit, 0, Some(1_700_000_000));
            ledger.flush().unwrap();
        }

        let reloaded = Ledger::new(Some(state_path)).unwrap();
        let candidate = candidate_ino(&oid, Tag::Commit);
        let bound = reloaded.bound(candidate).unwrap();
        assert_eq!(bound.oid, oid);
        assert_eq!(bound.tag, Tag::Commit);
    }

    #[test]
    fn truncated_tail_record_is_discarded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("ledger.log");

        let oid = oid_of(9);
        {
            let ledger = Ledger::new(Some(state_path.clone())).unwrap();
            ledger.allocate(oid, Tag::Tree, 0o040000, None);
        }
        // Append a partial, garbage tail record.
        {
            let mut f = OpenOptions::new().append(true).open(&state_path).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }

        let reloaded = Ledger::new(Some(state_path)).unwrap();
        let candidate = candidate_ino(&oid, Tag::Tree);
        assert!(reloaded.bound(candidate).is_some());
    }
}
