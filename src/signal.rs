/*
 * signal.rs
 *
 * Signal numbers, names, and the sigaction plumbing the supervisor needs.
 *
 * Everything called from a handler lives here too: errno save/restore,
 * resetting to SIG_DFL, raise. Those must stay async-signal-safe, so no
 * allocation, no locks, no tracing.
 *
 * Local Signal enum with libc constants - no nix dependency.
 */

use crate::error::{CronError, Result};

/* POSIX signals as i32 values from libc. Copy/PartialEq for easy comparison. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Signal {
    SIGHUP = libc::SIGHUP,
    SIGINT = libc::SIGINT,
    SIGQUIT = libc::SIGQUIT,
    SIGILL = libc::SIGILL,
    SIGTRAP = libc::SIGTRAP,
    SIGABRT = libc::SIGABRT,
    SIGBUS = libc::SIGBUS,
    SIGFPE = libc::SIGFPE,
    SIGKILL = libc::SIGKILL,
    SIGUSR1 = libc::SIGUSR1,
    SIGSEGV = libc::SIGSEGV,
    SIGUSR2 = libc::SIGUSR2,
    SIGPIPE = libc::SIGPIPE,
    SIGALRM = libc::SIGALRM,
    SIGTERM = libc::SIGTERM,
    SIGCHLD = libc::SIGCHLD,
    SIGCONT = libc::SIGCONT,
    SIGSTOP = libc::SIGSTOP,
    SIGTSTP = libc::SIGTSTP,
    SIGTTIN = libc::SIGTTIN,
    SIGTTOU = libc::SIGTTOU,
    SIGURG = libc::SIGURG,
    SIGXCPU = libc::SIGXCPU,
    SIGXFSZ = libc::SIGXFSZ,
    SIGVTALRM = libc::SIGVTALRM,
    SIGPROF = libc::SIGPROF,
    SIGWINCH = libc::SIGWINCH,
    SIGIO = libc::SIGIO,
    SIGSYS = libc::SIGSYS,
}

/// The "please die" signals. If we get one of these the child group goes first.
pub const TERMINATION_SIGNALS: [Signal; 4] =
    [Signal::SIGINT, Signal::SIGHUP, Signal::SIGTERM, Signal::SIGQUIT];

impl Signal {
    /* convert from raw signal number */
    pub fn try_from_raw(num: i32) -> Option<Self> {
        match num {
            libc::SIGHUP => Some(Self::SIGHUP),
            libc::SIGINT => Some(Self::SIGINT),
            libc::SIGQUIT => Some(Self::SIGQUIT),
            libc::SIGILL => Some(Self::SIGILL),
            libc::SIGTRAP => Some(Self::SIGTRAP),
            libc::SIGABRT => Some(Self::SIGABRT),
            libc::SIGBUS => Some(Self::SIGBUS),
            libc::SIGFPE => Some(Self::SIGFPE),
            libc::SIGKILL => Some(Self::SIGKILL),
            libc::SIGUSR1 => Some(Self::SIGUSR1),
            libc::SIGSEGV => Some(Self::SIGSEGV),
            libc::SIGUSR2 => Some(Self::SIGUSR2),
            libc::SIGPIPE => Some(Self::SIGPIPE),
            libc::SIGALRM => Some(Self::SIGALRM),
            libc::SIGTERM => Some(Self::SIGTERM),
            libc::SIGCHLD => Some(Self::SIGCHLD),
            libc::SIGCONT => Some(Self::SIGCONT),
            libc::SIGSTOP => Some(Self::SIGSTOP),
            libc::SIGTSTP => Some(Self::SIGTSTP),
            libc::SIGTTIN => Some(Self::SIGTTIN),
            libc::SIGTTOU => Some(Self::SIGTTOU),
            libc::SIGURG => Some(Self::SIGURG),
            libc::SIGXCPU => Some(Self::SIGXCPU),
            libc::SIGXFSZ => Some(Self::SIGXFSZ),
            libc::SIGVTALRM => Some(Self::SIGVTALRM),
            libc::SIGPROF => Some(Self::SIGPROF),
            libc::SIGWINCH => Some(Self::SIGWINCH),
            libc::SIGIO => Some(Self::SIGIO),
            libc::SIGSYS => Some(Self::SIGSYS),
            _ => None,
        }
    }

    /* get raw signal number */
    #[inline]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}

/* human-readable name for log lines */
#[must_use]
pub const fn signal_name(signal: Signal) -> &'static str {
    match signal {
        Signal::SIGHUP => "SIGHUP",
        Signal::SIGINT => "SIGINT",
        Signal::SIGQUIT => "SIGQUIT",
        Signal::SIGILL => "SIGILL",
        Signal::SIGTRAP => "SIGTRAP",
        Signal::SIGABRT => "SIGABRT",
        Signal::SIGBUS => "SIGBUS",
        Signal::SIGFPE => "SIGFPE",
        Signal::SIGKILL => "SIGKILL",
        Signal::SIGUSR1 => "SIGUSR1",
        Signal::SIGSEGV => "SIGSEGV",
        Signal::SIGUSR2 => "SIGUSR2",
        Signal::SIGPIPE => "SIGPIPE",
        Signal::SIGALRM => "SIGALRM",
        Signal::SIGTERM => "SIGTERM",
        Signal::SIGCHLD => "SIGCHLD",
        Signal::SIGCONT => "SIGCONT",
        Signal::SIGSTOP => "SIGSTOP",
        Signal::SIGTSTP => "SIGTSTP",
        Signal::SIGTTIN => "SIGTTIN",
        Signal::SIGTTOU => "SIGTTOU",
        Signal::SIGURG => "SIGURG",
        Signal::SIGXCPU => "SIGXCPU",
        Signal::SIGXFSZ => "SIGXFSZ",
        Signal::SIGVTALRM => "SIGVTALRM",
        Signal::SIGPROF => "SIGPROF",
        Signal::SIGWINCH => "SIGWINCH",
        Signal::SIGIO => "SIGIO",
        Signal::SIGSYS => "SIGSYS",
    }
}

/* name for a raw number, "signal N" style fallback for realtime signals */
#[must_use]
pub fn raw_signal_name(num: i32) -> String {
    Signal::try_from_raw(num).map_or_else(|| format!("signal {num}"), |s| signal_name(s).to_string())
}

/* errno lives in thread-local storage behind a libc accessor */
#[cfg(any(target_os = "linux", target_os = "android"))]
#[inline]
fn errno_location() -> *mut i32 {
    // SAFETY: __errno_location has no preconditions and always returns a valid
    // pointer to the calling thread's errno.
    unsafe { libc::__errno_location() }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
#[inline]
fn errno_location() -> *mut i32 {
    // SAFETY: __error has no preconditions and always returns a valid pointer
    // to the calling thread's errno.
    unsafe { libc::__error() }
}

/// Current errno. Async-signal-safe.
#[inline]
pub fn errno() -> i32 {
    // SAFETY: errno_location returns a valid, aligned pointer for this thread.
    unsafe { *errno_location() }
}

/// Overwrite errno. Handlers use this to put back what they found.
#[inline]
pub fn set_errno(value: i32) {
    // SAFETY: errno_location returns a valid, aligned pointer for this thread.
    unsafe {
        *errno_location() = value;
    }
}

/// Handler signature for [`install_handler`].
pub type Handler = extern "C" fn(i32);

/// A disposition we replaced. Hand it back to [`SavedAction::restore`] when done.
pub struct SavedAction {
    signal: Signal,
    action: libc::sigaction,
}

impl SavedAction {
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Put the previous disposition back.
    pub fn restore(self) -> Result<()> {
        // SAFETY: self.action was filled in by sigaction() for this signal, so it
        // is a valid sigaction struct. Passing null for oldact is allowed.
        let ret = unsafe { libc::sigaction(self.signal.as_raw(), &self.action, core::ptr::null_mut()) };
        if ret != 0 {
            return Err(CronError::SignalError(errno()));
        }
        Ok(())
    }
}

/* build a sigaction with the given handler and mask. no SA_RESTART:
 * we want waitpid/fcntl to come back with EINTR so the flags get checked. */
fn build_action(handler: Handler, mask: &[Signal]) -> libc::sigaction {
    // SAFETY: sigaction is a plain C struct, all-zero is a valid initial value.
    let mut sa: libc::sigaction = unsafe { core::mem::zeroed() };
    sa.sa_sigaction = handler as *const () as libc::sighandler_t;
    sa.sa_flags = 0;
    // SAFETY: sa.sa_mask is a valid sigset_t owned by sa.
    unsafe {
        libc::sigemptyset(&raw mut sa.sa_mask);
    }
    for sig in mask {
        // SAFETY: sa.sa_mask was initialized by sigemptyset, sig is a valid signal.
        unsafe {
            libc::sigaddset(&raw mut sa.sa_mask, sig.as_raw());
        }
    }
    sa
}

/// Install `handler` for `sig`, blocking `mask` while it runs.
///
/// Returns the disposition it replaced.
pub fn install_handler(sig: Signal, handler: Handler, mask: &[Signal]) -> Result<SavedAction> {
    let sa = build_action(handler, mask);
    // SAFETY: zeroed sigaction is a valid out-parameter for the old action.
    let mut old: libc::sigaction = unsafe { core::mem::zeroed() };
    // SAFETY: sa is fully initialized above, old is a valid out-pointer.
    let ret = unsafe { libc::sigaction(sig.as_raw(), &sa, &mut old) };
    if ret != 0 {
        return Err(CronError::SignalError(errno()));
    }
    Ok(SavedAction {
        signal: sig,
        action: old,
    })
}

/// Like [`install_handler`], but leave the signal alone if someone above us
/// set it to SIG_IGN. An explicit ignore is their policy, not ours to undo.
///
/// Returns `None` when the signal was ignored and nothing was installed.
pub fn install_handler_unless_ignored(
    sig: Signal,
    handler: Handler,
    mask: &[Signal],
) -> Result<Option<SavedAction>> {
    // SAFETY: zeroed sigaction is a valid out-parameter.
    let mut current: libc::sigaction = unsafe { core::mem::zeroed() };
    // SAFETY: null act means query only; current is a valid out-pointer.
    let ret = unsafe { libc::sigaction(sig.as_raw(), core::ptr::null(), &mut current) };
    if ret != 0 {
        return Err(CronError::SignalError(errno()));
    }
    if current.sa_sigaction == libc::SIG_IGN {
        return Ok(None);
    }
    install_handler(sig, handler, mask).map(Some)
}

/// Back to SIG_DFL. Async-signal-safe, errors ignored.
#[inline]
pub fn reset_default(sig: i32) {
    // SAFETY: signal() with SIG_DFL is async-signal-safe and valid for any
    // catchable signal number; an invalid one just returns SIG_ERR.
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}

/// Send `sig` to ourselves. Async-signal-safe.
#[inline]
pub fn raise(sig: i32) {
    // SAFETY: raise() is async-signal-safe and has no memory preconditions.
    unsafe {
        libc::raise(sig);
    }
}

/// Write a fixed message to stderr from handler context.
///
/// write(2) is on the async-signal-safe list; eprintln! is not.
#[inline]
pub fn write_stderr_raw(msg: &[u8]) {
    // SAFETY: msg is a valid byte slice, fd 2 may be closed in which case
    // write returns EBADF and we ignore it.
    unsafe {
        libc::write(2, msg.as_ptr().cast(), msg.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn test_as_raw() {
        assert_eq!(Signal::SIGTERM.as_raw(), libc::SIGTERM);
        assert_eq!(Signal::try_from_raw(libc::SIGHUP), Some(Signal::SIGHUP));
    }

    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(Signal::SIGTERM), "SIGTERM");
        assert_eq!(signal_name(Signal::SIGALRM), "SIGALRM");
    }

    #[test]
    fn test_raw_signal_name_fallback() {
        assert_eq!(raw_signal_name(libc::SIGINT), "SIGINT");
        assert_eq!(raw_signal_name(200), "signal 200");
    }

    #[test]
    fn test_try_from_raw_round_trip() {
        for sig in TERMINATION_SIGNALS {
            assert_eq!(Signal::try_from_raw(sig.as_raw()), Some(sig));
        }
        assert_eq!(Signal::try_from_raw(0), None);
    }

    #[test]
    fn test_errno_save_restore() {
        let saved = errno();
        set_errno(libc::EINTR);
        assert_eq!(errno(), libc::EINTR);
        set_errno(saved);
        assert_eq!(errno(), saved);
    }

    static SEEN: AtomicI32 = AtomicI32::new(0);

    extern "C" fn record(sig: i32) {
        SEEN.store(sig, Ordering::SeqCst);
    }

    /* SIGUSR2 is unused by the rest of the test suite */
    #[test]
    #[cfg(not(miri))]
    fn test_install_and_restore_handler() {
        let saved = install_handler(Signal::SIGUSR2, record, &[]).unwrap();
        assert_eq!(saved.signal(), Signal::SIGUSR2);
        raise(libc::SIGUSR2);
        assert_eq!(SEEN.load(Ordering::SeqCst), libc::SIGUSR2);
        saved.restore().unwrap();
    }
}
