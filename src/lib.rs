//! GitSnapFS: a read-only FUSE filesystem exposing Git repository
//! snapshots (commits, trees, blobs, and refs) as ordinary files and
//! directories.
//!
//! The crate is organized around the three core components spec'd out
//! for this filesystem plus the glue that turns them into a running
//! FUSE daemon:
//!
//! - [`oid`] / [`inode`]: the Inode Allocator, deriving stable inode
//!   numbers from Git object ids and detecting collisions.
//! - [`adapter`]: the Object Access Adapter, the narrow read-only
//!   contract onto the underlying Git object store.
//! - [`resolver`]: the Path Resolver, the stateless functions that
//!   turn `(parent_ino, name)` and `ino` lookups into directory
//!   listings, attributes, and file contents.
//! - [`notify`]: the Ref-Freshness Notifier, watching branch/tag/HEAD
//!   movement and invalidating the kernel's dentry cache.
//! - [`upgrade`]: the Hot-Upgrade Coordinator, handing the mounted
//!   FUSE channel across a `execve` re-exec without ever unmounting.
//! - [`fuse_fs`]: the `fuser::Filesystem` impl wiring all of the above
//!   into kernel request/reply pairs.
//! - [`config`]: CLI parsing and the config struct threaded through
//!   every component.
//! - [`error`]: error kinds and their POSIX errno mapping.
//! - [`logging`]: `log`/`colog` initialization.

pub mod adapter;
pub mod config;
pub mod error;
pub mod fuse_fs;
pub mod inode;
pub mod logging;
pub mod notify;
pub mod oid;
pub mod resolver;
pub mod upgrade;
