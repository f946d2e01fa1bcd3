/*
 * process.rs
 *
 * fork + setsid + execvp. The child gets its own session, which makes it
 * the leader of a fresh process group, so killpg later hits it and every
 * descendant that didn't wander off into yet another group.
 *
 * Everything the child needs (C strings, argv pointer array, the error
 * message) is built before fork. Between fork and exec the child only
 * makes async-signal-safe calls: no allocation, no locks, no tracing.
 *
 * The parent doesn't return the pid until the child has called setsid.
 * A close-on-exec pipe does the handshake: EOF on the read end means the
 * child's copy of the write end is gone. Until then the child is still in
 * our group, and a killpg on "its" group would hit us.
 *
 * posix_spawn would be cheaper, but POSIX_SPAWN_SETSID isn't everywhere and
 * exec failure must come back as an exit status the parent's wait sees.
 */

use std::ffi::{CString, c_char};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use crate::error::{CronError, Result, exit_codes};
use crate::signal::{errno, raw_signal_name, write_stderr_raw};

/// Exit status from waitpid, undecoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawExitStatus {
    status: i32,
}

impl RawExitStatus {
    #[inline]
    pub const fn from_raw(status: i32) -> Self {
        Self { status }
    }

    /// Returns the exit code if the process exited normally
    #[inline]
    pub fn code(&self) -> Option<i32> {
        if libc::WIFEXITED(self.status) {
            Some(libc::WEXITSTATUS(self.status))
        } else {
            None
        }
    }

    /// Returns the signal number if the process was killed by a signal
    #[inline]
    pub fn signal(&self) -> Option<i32> {
        if libc::WIFSIGNALED(self.status) {
            Some(libc::WTERMSIG(self.status))
        } else {
            None
        }
    }
}

impl core::fmt::Display for RawExitStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match (self.code(), self.signal()) {
            (Some(code), _) => write!(f, "exit status {code}"),
            (None, Some(sig)) => write!(f, "killed by {}", raw_signal_name(sig)),
            (None, None) => write!(f, "raw wait status {:#x}", self.status),
        }
    }
}

/// A command line ready to hand to execvp.
///
/// Built in the parent. Holds the C strings the argv pointers point into,
/// so it must outlive the fork.
pub struct ExecImage {
    program: CString,
    argv: Vec<CString>,
    exec_failed_msg: Vec<u8>,
}

impl ExecImage {
    /// `args` is the full argv, `args[0]` included. An empty slice means
    /// argv[0] is the program itself.
    pub fn new(program: &str, args: &[String]) -> Result<Self> {
        let program_c = CString::new(program)
            .map_err(|_| CronError::InvalidArg(format!("NUL byte in command: {program:?}")))?;

        let mut argv = Vec::with_capacity(args.len().max(1));
        if args.is_empty() {
            argv.push(program_c.clone());
        }
        for arg in args {
            argv.push(
                CString::new(arg.as_str())
                    .map_err(|_| CronError::InvalidArg(format!("NUL byte in argument: {arg:?}")))?,
            );
        }

        Ok(Self {
            program: program_c,
            argv,
            exec_failed_msg: format!("execvp: {program}: cannot execute\n").into_bytes(),
        })
    }

    pub fn program(&self) -> &str {
        self.program.to_str().unwrap_or("?")
    }
}

/* close-on-exec pipe, so no exec'd process ever holds either end */
#[cfg(any(target_os = "linux", target_os = "android"))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];
    // SAFETY: fds is a valid 2-element array, pipe2() writes exactly 2 fds.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(CronError::ForkError(errno()));
    }
    // SAFETY: both fds were just returned by pipe2 and nothing else owns them.
    #[allow(clippy::multiple_unsafe_ops_per_block)]
    let ends = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok(ends)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];
    // SAFETY: fds is a valid 2-element array, pipe() writes exactly 2 fds.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(CronError::ForkError(errno()));
    }
    // SAFETY: both fds were just returned by pipe() and nothing else owns them.
    #[allow(clippy::multiple_unsafe_ops_per_block)]
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    // SAFETY: F_SETFD on fds we own. Both calls share the same invariant.
    #[allow(clippy::multiple_unsafe_ops_per_block)]
    unsafe {
        libc::fcntl(read.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC);
        libc::fcntl(write.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC);
    }
    Ok((read, write))
}

/* block until every copy of the write end is closed: the child closes its
 * copy right after setsid (or dies trying) */
fn wait_for_detach(read: &OwnedFd) {
    let mut byte = 0u8;
    loop {
        // SAFETY: read is an open fd, byte is a valid 1-byte buffer.
        let ret = unsafe { libc::read(read.as_raw_fd(), (&raw mut byte).cast(), 1) };
        if ret >= 0 || errno() != libc::EINTR {
            return;
        }
    }
}

/// Fork and exec `image` in a new session.
///
/// Returns the child's pid in the parent, and only once the child has left
/// our process group: a kill aimed at the child's group can never land on
/// ours. The child never returns: it either becomes the command or
/// `_exit`s with `EX_OSERR` (setsid failed) or `EX_UNAVAILABLE` (exec
/// failed), which the parent's waitpid will report.
pub fn spawn_detached(image: &ExecImage) -> Result<libc::pid_t> {
    /* pointer array built before fork - the child must not allocate */
    let mut argv_ptrs: Vec<*const c_char> = Vec::with_capacity(image.argv.len() + 1);
    for arg in &image.argv {
        argv_ptrs.push(arg.as_ptr());
    }
    argv_ptrs.push(ptr::null());

    let (detach_read, detach_write) = cloexec_pipe()?;

    // SAFETY: fork has no memory preconditions. After fork the child only
    // calls async-signal-safe functions (setsid, close, execvp, write,
    // _exit) on memory prepared above.
    let pid = unsafe { libc::fork() };

    if pid < 0 {
        return Err(CronError::ForkError(errno()));
    }

    if pid == 0 {
        exec_child(image, &argv_ptrs, detach_write.as_raw_fd());
    }

    drop(detach_write);
    wait_for_detach(&detach_read);
    Ok(pid)
}

/* child side of the fork. never returns. */
fn exec_child(image: &ExecImage, argv_ptrs: &[*const c_char], detached_fd: RawFd) -> ! {
    /* own session = own process group, detached from our controlling tty */
    // SAFETY: setsid has no memory preconditions.
    if unsafe { libc::setsid() } == -1 {
        write_stderr_raw(b"Unable to detach child.  Aborting\n");
        // SAFETY: _exit is async-signal-safe and never returns.
        unsafe { libc::_exit(i32::from(exit_codes::OSERR)) };
    }

    /* parent stops waiting here */
    // SAFETY: detached_fd is our copy of the write end, closed exactly once.
    unsafe { libc::close(detached_fd) };

    // SAFETY: program and every argv entry are valid NUL-terminated strings
    // owned by `image`, and argv_ptrs is NULL-terminated.
    unsafe {
        libc::execvp(image.program.as_ptr(), argv_ptrs.as_ptr());
    }

    /* only reachable if exec failed - on success this image is gone */
    write_stderr_raw(&image.exec_failed_msg);
    // SAFETY: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(i32::from(exit_codes::UNAVAILABLE)) }
}

/*
 * Tests for status decoding and the raw launcher.
 *
 * These tests are skipped under Miri because fork and waitpid are
 * unsupported foreign functions.
 */
