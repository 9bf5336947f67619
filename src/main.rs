//! Thin binary entry point: parse CLI, initialize logging, open the
//! object store and ledger, arm the hot-upgrade signal plumbing, mount,
//! and run the FUSE session across `--workers` threads until a clean
//! unmount.
//!
//! Everything that matters lives in the library (`gitsnapfs::*`); this
//! file is glue between CLI parsing/setup and the long-running session.

use std::sync::Arc;

use anyhow::{Context, Result};
use gitsnapfs::adapter::{CacheLimits, Git2Adapter, ObjectStore};
use gitsnapfs::config::{Args, GitSnapConfig};
use gitsnapfs::fuse_fs::{FuserInvalidator, GitSnapFs};
use gitsnapfs::inode::Ledger;
use gitsnapfs::logging;
use gitsnapfs::notify;
use gitsnapfs::upgrade::{self, Coordinator, Trigger};

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    let config = Arc::new(GitSnapConfig::from_args(args));

    logging::init(config.log_level);

    let adapter: Arc<dyn ObjectStore> = Arc::new(
        Git2Adapter::open(
            &config.repo,
            CacheLimits {
                tree_entries: config.tree_cache_entries,
                small_blob_bytes: config.blob_small_cache_bytes,
            },
        )
        .context("failed to open git repository")?,
    );

    let ledger = Arc::new(
        Ledger::new(config.state_file.clone()).context("failed to open ledger state file")?,
    );

    upgrade::arm_signals().context("failed to install hot-upgrade signal handlers")?;
    let channel = upgrade::acquire_channel().context("failed to check for an inherited FUSE channel")?;

    let fs = Arc::new(GitSnapFs::new(adapter.clone(), ledger.clone(), config.clone()));

    let mount_options = mount_options_for(&config);
    let session = fuser::Session::new(fs.clone(), &config.mountpoint, &mount_options)
        .context("failed to start FUSE session")?;

    let invalidator: Arc<dyn notify::EntryInvalidator> =
        Arc::new(FuserInvalidator(session.notifier()));
    let _watch_handle = notify::start(adapter.clone(), config.ref_ttl, invalidator);

    let mut worker_handles = Vec::with_capacity(config.workers);
    for _ in 0..config.workers {
        let mut worker_session = session.try_clone().context("failed to clone FUSE session for a worker")?;
        worker_handles.push(std::thread::spawn(move || {
            if let Err(e) = worker_session.run() {
                log::error!("FUSE worker session exited: {e}");
            }
        }));
    }

    let coordinator = Coordinator::new(std::time::Duration::from_millis(200));
    loop {
        match upgrade::wait_for_trigger() {
            Trigger::Upgrade => {
                coordinator.upgrade(&ledger, channel.fd, config.state_file.as_deref(), fs.in_flight_counter());
                // Only reached if execve failed; keep serving.
            }
            Trigger::Shutdown => {
                log::info!("shutdown requested, unmounting");
                drop(session);
                break;
            }
        }
    }

    for handle in worker_handles {
        let _ = handle.join();
    }
    let _ = ledger.flush();
    Ok(())
}

fn mount_options_for(config: &GitSnapConfig) -> Vec<fuser::MountOption> {
    let mut options = vec![fuser::MountOption::RO, fuser::MountOption::FSName("gitsnapfs".to_string())];
    if config.allow_other {
        options.push(fuser::MountOption::AllowOther);
    }
    options
}

