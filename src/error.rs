//! Error kinds for the core, and their mapping onto POSIX errno values.
//!
//! `AdapterError` is what the Object Access Adapter (§4.A) returns.
//! `FsError` is what the Path Resolver (§4.C) returns; it is a superset
//! that folds in ledger and protocol failures. `src/fuse_fs.rs` is the
//! only place that turns an `FsError` into a kernel-visible errno.

use thiserror::Error;

/// Failures the Object Access Adapter can report. Every lookup that
/// cannot find the named object is `NotFound`; anything else reading
/// from the underlying store is `Io`.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("object not found")]
    NotFound,
    #[error("object store I/O error: {0}")]
    Io(#[from] git2::Error),
}

/// Failures the Path Resolver (and, transitively, the FUSE glue) can
/// report. One variant per POSIX error condition the filesystem
/// ever has to surface.
#[derive(Debug, Error)]
pub enum FsError {
    /// Name not found; malformed commit id under `/commits`; unknown
    /// ref under `/branches`, `/tags`.
    #[error("no such file or directory")]
    NotFound,

    /// Any mutating request.
    #[error("read-only file system")]
    ReadOnly,

    /// Inode collision loser, detected via the ledger.
    #[error("structure needs cleaning (inode collision)")]
    InodeClash,

    /// `getattr`/`read`/`readlink` on an inode absent from the ledger
    /// and not synthetic.
    #[error("stale file handle")]
    Stale,

    /// Underlying object store returned an I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// xattr reads, and any unimplemented-but-valid FUSE op.
    #[error("operation not supported")]
    Unsupported,

    /// Reserved for protocol-level malformed requests from the
    /// channel; never used for name-resolution failures.
    #[error("invalid argument")]
    Protocol,
}

impl FsError {
    /// The errno the FUSE glue should hand the kernel for this error.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::ReadOnly => libc::EROFS,
            FsError::InodeClash => libc::EUCLEAN,
            FsError::Stale => libc::ESTALE,
            FsError::Io(_) => libc::EIO,
            FsError::Unsupported => libc::ENOTSUP,
            FsError::Protocol => libc::EINVAL,
        }
    }
}

impl From<AdapterError> for FsError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::NotFound => FsError::NotFound,
            AdapterError::Io(e) => FsError::Io(e.to_string()),
        }
    }
}
