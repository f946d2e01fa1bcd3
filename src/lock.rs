/*
 * lock.rs
 *
 * runlock: hold an exclusive fcntl lock on a file for as long as the
 * command runs. A second runlock on the same file waits up to N seconds,
 * then gives up with EX_CANTCREAT.
 *
 * The wait bound is a one-shot SIGALRM. The handler only sets a flag;
 * F_SETLKW comes back with EINTR (no SA_RESTART) and the flag tells a
 * timeout apart from some other signal that happened to land.
 *
 * fcntl locks belong to the process, not the fd, and fork doesn't inherit
 * them. The child never holds the lock. We do, until it's reaped.
 * std opens with O_CLOEXEC so the command doesn't get the fd either.
 */

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CronError, Result};
use crate::signal::{Signal, errno, install_handler};
use crate::supervisor::{ChildStatus, run_subprocess};
use crate::tempdir::{command_basename, make_tempdir};
use crate::timer;

/// How long to wait for a busy lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u32 = 5;

/* set by the handler when the wait bound runs out */
static TIMEOUT_EXPIRED: AtomicBool = AtomicBool::new(false);

extern "C" fn lock_timeout_handler(_sig: i32) {
    TIMEOUT_EXPIRED.store(true, Ordering::SeqCst);
}

/// runlock settings. Built from the command line by `args.rs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Seconds to wait for the lock. 0 waits forever.
    pub timeout_secs: u32,
    /// Explicit lock file; `None` means `<tempdir>/<command>.pid`.
    pub lock_path: Option<PathBuf>,
    pub command: String,
    /// Full argv for the command, `args[0]` included.
    pub args: Vec<String>,
}

/// How a blocking lock request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// The wait bound ran out while someone else held it.
    TimedOut,
    /// The kernel refused outright.
    Contended,
}

/// An exclusive lock we hold. Dropping it closes the file, which releases
/// the lock. The file itself stays on disk.
#[derive(Debug)]
pub struct HeldLock {
    file: File,
    path: PathBuf,
}

impl HeldLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the file, which drops the lock.
    pub fn release(self) {
        tracing::debug!("releasing lock on {}", self.path.display());
        drop(self.file);
    }
}

/// `<tempdir>/<basename(command)>.pid` unless a path was given.
#[must_use]
pub fn resolve_lock_path(explicit: Option<&Path>, tempdir: &Path, command: &str) -> PathBuf {
    explicit.map_or_else(
        || tempdir.join(format!("{}.pid", command_basename(command))),
        Path::to_path_buf,
    )
}

fn lock_io(path: &Path, e: &io::Error) -> CronError {
    CronError::LockIo(path.display().to_string(), e.raw_os_error().unwrap_or(libc::EIO))
}

/* F_SETLKW until it succeeds or we have a reason to stop */
fn request_lock(file: &File, path: &Path) -> Result<LockOutcome> {
    // SAFETY: flock is a plain C struct, all-zero means "from offset 0,
    // whole file", which is what we want.
    let mut fl: libc::flock = unsafe { core::mem::zeroed() };
    #[allow(clippy::cast_possible_truncation)]
    let (l_type, l_whence) = (libc::F_WRLCK as libc::c_short, libc::SEEK_SET as libc::c_short);
    fl.l_type = l_type;
    fl.l_whence = l_whence;

    loop {
        /* an alarm between arming and here, or between retries, would
         * otherwise leave F_SETLKW blocked with nothing left to wake it */
        if TIMEOUT_EXPIRED.load(Ordering::SeqCst) {
            return Ok(LockOutcome::TimedOut);
        }

        // SAFETY: fd is open for the life of `file`, fl is a valid flock.
        let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLKW, &raw const fl) };
        if ret == 0 {
            return Ok(LockOutcome::Acquired);
        }

        match errno() {
            libc::EINTR if TIMEOUT_EXPIRED.load(Ordering::SeqCst) => return Ok(LockOutcome::TimedOut),
            libc::EINTR => {
                tracing::debug!("lock wait interrupted, retrying");
            }
            libc::EACCES | libc::EAGAIN => return Ok(LockOutcome::Contended),
            err => return Err(CronError::LockIo(path.display().to_string(), err)),
        }
    }
}

/// Take an exclusive lock on `path`, waiting at most `timeout_secs`
/// (0 = forever).
///
/// The file is created mode 0600 if missing. On success it's truncated and
/// holds our pid. Timeout and contention come back as
/// [`CronError::LockTimedOut`] and [`CronError::LockContended`]. The timer
/// is disarmed and the old SIGALRM disposition restored on every path.
pub fn acquire_lock(path: &Path, timeout_secs: u32) -> Result<HeldLock> {
    /* no O_TRUNC: whoever holds it keeps their pid visible until we win */
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
        .map_err(|e| {
            CronError::LockOpen(path.display().to_string(), e.raw_os_error().unwrap_or(libc::EIO))
        })?;

    TIMEOUT_EXPIRED.store(false, Ordering::SeqCst);
    let saved = install_handler(Signal::SIGALRM, lock_timeout_handler, &[])?;

    let outcome = timer::arm(timeout_secs).and_then(|()| request_lock(&file, path));

    let _ = timer::clear();
    if let Err(e) = saved.restore() {
        tracing::warn!("could not restore SIGALRM disposition: {e}");
    }
    TIMEOUT_EXPIRED.store(false, Ordering::SeqCst);

    match outcome? {
        LockOutcome::Acquired => {}
        LockOutcome::TimedOut => return Err(CronError::LockTimedOut(timeout_secs)),
        LockOutcome::Contended => return Err(CronError::LockContended),
    }

    file.set_len(0).map_err(|e| lock_io(path, &e))?;
    writeln!(file, "{}", std::process::id()).map_err(|e| lock_io(path, &e))?;
    file.sync_all().map_err(|e| lock_io(path, &e))?;
    tracing::debug!("lock granted");

    Ok(HeldLock {
        file,
        path: path.to_path_buf(),
    })
}

/// runlock: lock, run the command without a timeout, unlock after reaping.
pub fn run_locked(config: &LockConfig) -> Result<ChildStatus> {
    let path = match &config.lock_path {
        Some(p) => p.clone(),
        None => resolve_lock_path(None, &make_tempdir()?, &config.command),
    };
    tracing::debug!("lock filename is {}", path.display());

    let held = acquire_lock(&path, config.timeout_secs)?;
    let status = run_subprocess(&config.command, &config.args, None);
    held.release();
    status
}

/*
 * fcntl locks don't conflict within one process, so contention is
 * covered by the integration tests, which run two runlock processes.
 */
