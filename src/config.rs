//! CLI parsing and the `GitSnapConfig` threaded through every
//! component. Long options only, no field here carries a `short`
//! alias.

use std::path::PathBuf;
use std::time::Duration;

use argh::FromArgValue;

const ENV_FUSE_FD: &str = "GITSNAPFS_FUSE_FD";
const ENV_STATE: &str = "GITSNAPFS_STATE";

/// Parsed command line, plus the two ambient flags (`--log-level`,
/// `--workers`) a daemon can't ship without.
/// read-only FUSE filesystem exposing Git repository snapshots
#[derive(argh::FromArgs, PartialEq, Debug)]
pub struct Args {
    /// path to `.git` or a bare repository
    #[argh(option)]
    pub repo: PathBuf,

    /// existing empty directory to mount onto
    #[argh(option)]
    pub mountpoint: PathBuf,

    /// pass `allow_other` through to the mount syscall
    #[argh(switch)]
    pub allow_other: bool,

    /// attribute cache TTL in seconds, for commit-backed entries
    #[argh(option, default = "300")]
    pub attr_ttl: u64,

    /// directory entry cache TTL in seconds
    #[argh(option, default = "300")]
    pub entry_ttl: u64,

    /// attribute cache TTL in seconds for `/branches`, `/tags`, `HEAD`
    #[argh(option, default = "2")]
    pub ref_ttl: u64,

    /// LRU bound on decoded trees held in memory
    #[argh(option, default = "4096")]
    pub tree_cache: usize,

    /// LRU byte bound on small blobs held in memory
    #[argh(option, default = "134_217_728")]
    pub blob_small_cache: u64,

    /// ledger persistence path; omit to run without crash recovery
    #[argh(option)]
    pub state_file: Option<PathBuf>,

    /// internal: equivalent to setting GITSNAPFS_FUSE_FD directly
    #[argh(option)]
    pub takeover_fuse_fd: Option<i32>,

    /// log verbosity: trace, debug, info, warn, or error
    #[argh(option, default = "LogLevel::Info")]
    pub log_level: LogLevel,

    /// number of FUSE session worker threads
    #[argh(option, default = "4")]
    pub workers: usize,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl FromArgValue for LogLevel {
    fn from_arg_value(val: &str) -> Result<Self, String> {
        match val.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level {other}, try trace|debug|info|warn|error")),
        }
    }
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// The config struct threaded through every component, built once
/// in `main` from `Args` plus two environment variables that carry
/// state across a hot-upgrade re-exec.
pub struct GitSnapConfig {
    pub repo: PathBuf,
    pub mountpoint: PathBuf,
    pub allow_other: bool,
    pub attr_ttl: Duration,
    pub entry_ttl: Duration,
    pub ref_ttl: Duration,
    pub tree_cache_entries: usize,
    pub blob_small_cache_bytes: u64,
    pub state_file: Option<PathBuf>,
    pub log_level: LogLevel,
    pub workers: usize,
    /// `GITSNAPFS_FUSE_FD`, from the environment or `--takeover-fuse-fd`.
    pub inherited_fuse_fd: Option<i32>,
    /// `GITSNAPFS_STATE`, from the environment, overriding `--state-file`
    /// when a hot upgrade handed a ledger path across exec.
    pub inherited_state_path: Option<PathBuf>,
}

impl GitSnapConfig {
    pub fn from_args(args: Args) -> Self {
        let inherited_fuse_fd = args.takeover_fuse_fd.or_else(|| {
            std::env::var(ENV_FUSE_FD).ok().and_then(|v| v.parse().ok())
        });
        let inherited_state_path = std::env::var(ENV_STATE).ok().map(PathBuf::from);

        GitSnapConfig {
            repo: args.repo,
            mountpoint: args.mountpoint,
            allow_other: args.allow_other,
            attr_ttl: Duration::from_secs(args.attr_ttl),
            entry_ttl: Duration::from_secs(args.entry_ttl),
            ref_ttl: Duration::from_secs(args.ref_ttl),
            tree_cache_entries: args.tree_cache,
            blob_small_cache_bytes: args.blob_small_cache,
            state_file: inherited_state_path.clone().or(args.state_file),
            log_level: args.log_level,
            workers: args.workers.max(1),
            inherited_fuse_fd,
            inherited_state_path,
        }
    }
}
