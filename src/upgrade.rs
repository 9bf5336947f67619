//! Tracks the FUSE channel fd across a hot upgrade where the kernel
//! already knows it, drains in-flight work behind a quiesce barrier,
//! serializes the ledger, and re-`execve`s the binary.
//!
//! The upgrade trigger is `SIGHUP`; a
//! self-pipe wakes a dedicated coordinator thread from signal context,
//! since the handler itself may only touch an `AtomicBool` and write
//! one byte (the only async-signal-safe operations available).
//! `SIGTERM`/`SIGINT` use the same plumbing but request a clean
//! unmount instead of re-exec.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::inode::Ledger;

const ENV_FUSE_FD: &str = "GITSNAPFS_FUSE_FD";
const ENV_STATE: &str = "GITSNAPFS_STATE";

static SELF_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);
static GOT_UPGRADE: AtomicBool = AtomicBool::new(false);
static GOT_SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// The channel fd, and whether this process adopted it from a prior
/// process across an exec handover (in which case `fuser::Session`
/// must not mount again) or has none yet because this is a fresh start
/// (in which case `fuser::Session::new` performs the real mount).
pub struct Channel {
    pub fd: Option<RawFd>,
    pub adopted: bool,
}

/// Checks for an inherited FUSE channel: `GITSNAPFS_FUSE_FD` is only
/// ever set by `Coordinator::upgrade` just before `execv`, so its
/// presence means this process is the far side of a hot-upgrade
/// handover, not a first mount. A fresh start never has a channel fd
/// of its own at this point; `fuser::Session::new` acquires and mounts
/// one later in `main.rs`, and the coordinator doesn't learn its
/// number (see DESIGN.md).
pub fn acquire_channel() -> std::io::Result<Channel> {
    if let Ok(raw) = std::env::var(ENV_FUSE_FD) {
        let fd: RawFd = raw
            .parse()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "malformed GITSNAPFS_FUSE_FD"))?;
        info!("adopting inherited FUSE channel fd {fd}");
        return Ok(Channel { fd: Some(fd), adopted: true });
    }
    Ok(Channel { fd: None, adopted: false })
}

fn clear_cloexec(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Arms the self-pipe and installs handlers for `SIGHUP`, `SIGTERM`,
/// `SIGINT`. Must be called once, before the FUSE session starts
/// serving, so there is no window where a signal could arrive and be
/// missed.
pub fn arm_signals() -> std::io::Result<()> {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    SELF_PIPE_WRITE.store(fds[1], Ordering::SeqCst);

    unsafe {
        install_handler(libc::SIGHUP, handle_sighup)?;
        install_handler(libc::SIGTERM, handle_shutdown_signal)?;
        install_handler(libc::SIGINT, handle_shutdown_signal)?;
    }

    PIPE_READ.store(fds[0], Ordering::SeqCst);
    Ok(())
}

static PIPE_READ: AtomicI32 = AtomicI32::new(-1);

unsafe fn install_handler(signum: libc::c_int, handler: extern "C" fn(libc::c_int)) -> std::io::Result<()> {
    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = handler as usize;
    libc::sigemptyset(&mut action.sa_mask);
    action.sa_flags = libc::SA_RESTART;
    if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Async-signal-safe: only touches an `AtomicBool` and writes one byte
/// to an already-open pipe fd.
extern "C" fn handle_sighup(_signum: libc::c_int) {
    GOT_UPGRADE.store(true, Ordering::SeqCst);
    wake_self_pipe();
}

extern "C" fn handle_shutdown_signal(_signum: libc::c_int) {
    GOT_SHUTDOWN.store(true, Ordering::SeqCst);
    wake_self_pipe();
}

fn wake_self_pipe() {
    let fd = SELF_PIPE_WRITE.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = [0u8; 1];
        unsafe {
            libc::write(fd, byte.as_ptr() as *const libc::c_void, 1);
        }
    }
}

/// What the coordinator thread's `poll()` wait resolved to.
#[derive(Debug, Eq, PartialEq)]
pub enum Trigger {
    Upgrade,
    Shutdown,
}

/// Blocks the calling (coordinator) thread until `SIGHUP` or a
/// shutdown signal arrives, draining the self-pipe on wake.
pub fn wait_for_trigger() -> Trigger {
    loop {
        let read_fd = PIPE_READ.load(Ordering::SeqCst);
        let mut pfd = libc::pollfd {
            fd: read_fd,
            events: libc::POLLIN,
            revents: 0,
        };
        unsafe {
            libc::poll(&mut pfd, 1, -1);
        }
        let mut buf = [0u8; 64];
        unsafe {
            libc::read(read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len());
        }
        if GOT_SHUTDOWN.swap(false, Ordering::SeqCst) {
            return Trigger::Shutdown;
        }
        if GOT_UPGRADE.swap(false, Ordering::SeqCst) {
            return Trigger::Upgrade;
        }
    }
}

/// Coordinates the quiesce barrier and re-exec (the handover steps
/// 1–5). `in_flight` is a shared counter the FUSE glue increments per
/// dispatched request and decrements on reply; the coordinator waits
/// for it to hit zero (bounded by `quiesce_timeout`) before handing
/// over.
pub struct Coordinator {
    pub quiesce: Arc<AtomicBool>,
    pub quiesce_timeout: Duration,
}

impl Coordinator {
    pub fn new(quiesce_timeout: Duration) -> Self {
        Coordinator {
            quiesce: Arc::new(AtomicBool::new(false)),
            quiesce_timeout,
        }
    }

    /// Runs the re-exec sequence. On success this never returns, the
    /// process image is replaced. On `execve` failure, clears quiesce
    /// and returns so the caller resumes serving with the old binary.
    pub fn upgrade(
        &self,
        ledger: &Ledger,
        channel_fd: Option<RawFd>,
        state_path: Option<&Path>,
        in_flight: &std::sync::atomic::AtomicU64,
    ) {
        self.quiesce.store(true, Ordering::SeqCst);
        self.drain_in_flight(in_flight);

        if let Err(e) = ledger.flush() {
            warn!("ledger flush before upgrade failed: {e}; proceeding anyway");
        }

        let argv: Vec<CString> = std::env::args()
            .map(|a| CString::new(a).unwrap())
            .collect();
        let argv_ptrs: Vec<*const libc::c_char> = argv
            .iter()
            .map(|a| a.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        match channel_fd {
            Some(fd) => {
                if let Err(e) = clear_cloexec(fd) {
                    warn!("failed to clear close-on-exec on channel fd before upgrade: {e}");
                }
                std::env::set_var(ENV_FUSE_FD, fd.to_string());
            }
            None => {
                warn!(
                    "no inherited channel fd to hand across the upgrade; the new process \
                     will remount instead of taking over the existing channel"
                );
                std::env::remove_var(ENV_FUSE_FD);
            }
        }
        if let Some(path) = state_path {
            std::env::set_var(ENV_STATE, path);
        }

        let exe = CString::new(std::env::current_exe().unwrap().into_os_string().into_encoded_bytes()).unwrap();
        info!("hot-upgrade: re-executing {exe:?}, channel fd = {channel_fd:?}");
        unsafe {
            libc::execv(exe.as_ptr(), argv_ptrs.as_ptr());
        }

        // execve only returns on failure.
        error!("execve failed during hot-upgrade: {}", std::io::Error::last_os_error());
        self.quiesce.store(false, Ordering::SeqCst);
    }

    fn drain_in_flight(&self, in_flight: &std::sync::atomic::AtomicU64) {
        let deadline = std::time::Instant::now() + self.quiesce_timeout;
        while in_flight.load(Ordering::SeqCst) > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
