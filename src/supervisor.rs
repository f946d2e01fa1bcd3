/*
 * supervisor.rs
 *
 * Launch one child, wait for it, kill its whole group if we have to.
 * All the tricky bits live here.
 *
 * Shared state: signal handlers need to know which group to kill, and the
 * wait loop needs to know whether an EINTR was our own doing. That's three
 * atomics in a static. Handlers only store flags and read the pid; the main
 * flow writes the pid and reads the flags after every interrupted call.
 * No locks anywhere near a handler.
 *
 * Ordering: pid is published before any handler that reads it is installed
 * and before any timer is armed. killed_by_us is set before killpg, so an
 * EINTR seen afterwards is always attributable.
 *
 * If we get SIGTERM (cron shutdown, someone's kill), the child's group dies
 * first, then we put SIG_DFL back and re-raise so our parent sees us die of
 * the same signal instead of some made-up exit code.
 */

use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::error::{CronError, Result, exit_codes};
use crate::process::{ExecImage, RawExitStatus, spawn_detached};
use crate::signal::{
    SavedAction, Signal, TERMINATION_SIGNALS, errno, install_handler_unless_ignored, raise,
    raw_signal_name, reset_default, set_errno, write_stderr_raw,
};
use crate::timer;

/* -1 means no child. pids are always positive. */
const NO_CHILD: i32 = -1;

/// State shared between the supervisor and its signal handlers.
///
/// One child at a time per process. Every field is lock-free and written by
/// one side only (handler sets flags, main flow owns the pid).
pub struct SupervisorState {
    child_pid: AtomicI32,
    killed_by_us: AtomicBool,
    fatal_error_in_progress: AtomicBool,
}

impl SupervisorState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            child_pid: AtomicI32::new(NO_CHILD),
            killed_by_us: AtomicBool::new(false),
            fatal_error_in_progress: AtomicBool::new(false),
        }
    }

    /// Pid of the supervised child, if one is running.
    #[inline]
    pub fn child_pid(&self) -> Option<i32> {
        let pid = self.child_pid.load(Ordering::SeqCst);
        if pid > 0 { Some(pid) } else { None }
    }

    /// Did we send the kill ourselves?
    #[inline]
    pub fn killed_by_us(&self) -> bool {
        self.killed_by_us.load(Ordering::SeqCst)
    }

    fn begin(&self, pid: i32) {
        self.killed_by_us.store(false, Ordering::SeqCst);
        self.fatal_error_in_progress.store(false, Ordering::SeqCst);
        self.child_pid.store(pid, Ordering::SeqCst);
    }

    /* the pid is gone the moment waitpid hands it back; handlers must not
     * aim at it again */
    fn reaped(&self) {
        self.child_pid.store(NO_CHILD, Ordering::SeqCst);
    }

    fn end(&self) {
        self.child_pid.store(NO_CHILD, Ordering::SeqCst);
        self.killed_by_us.store(false, Ordering::SeqCst);
        self.fatal_error_in_progress.store(false, Ordering::SeqCst);
    }
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::new()
    }
}

/// The one supervisor per process.
pub static SUPERVISOR: SupervisorState = SupervisorState::new();

/// How the supervised command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Exited on its own with this code.
    Exited(i32),
    /// Terminated by this signal.
    Signaled(i32),
    /// We killed the group and stopped waiting before reaping it.
    Abandoned,
}

impl ChildStatus {
    fn from_raw(status: RawExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(sig)) => Self::Signaled(sig),
            /* stopped/continued can't come back from a blocking waitpid
             * without WUNTRACED - treat as a plain failure */
            (None, None) => Self::Exited(1),
        }
    }

    /// Shell convention: exit code as-is, `128 + signo` for a signal death.
    ///
    /// An abandoned child reports the SIGTERM we sent it.
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Exited(code) => (*code & 0xFF) as u8,
            Self::Signaled(sig) => ((128 + *sig) & 0xFF) as u8,
            Self::Abandoned => ((128 + Signal::SIGTERM.as_raw()) & 0xFF) as u8,
        }
    }
}

impl core::fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled(sig) => write!(f, "killed by {}", raw_signal_name(*sig)),
            Self::Abandoned => write!(f, "terminated by supervisor"),
        }
    }
}

/// SIGTERM the whole process group of the supervised child.
///
/// Safe from a signal handler: no allocation, no locks. The group id is
/// looked up from the live pid every time. Sets `killed_by_us` before
/// sending. With no child running, or once the group is gone, this fails
/// with `KillError(ESRCH)`.
///
/// killpg is only used when the child leads its own group and that group
/// isn't ours. Otherwise only the child itself gets the SIGTERM.
pub fn kill_process_group() -> Result<()> {
    let Some(pid) = SUPERVISOR.child_pid() else {
        return Err(CronError::KillError(libc::ESRCH));
    };

    SUPERVISOR.killed_by_us.store(true, Ordering::SeqCst);

    // SAFETY: getpgid has no memory preconditions.
    let pgid = unsafe { libc::getpgid(pid) };
    if pgid < 0 {
        return Err(CronError::KillError(errno()));
    }

    // SAFETY: getpgrp has no preconditions and cannot fail.
    let own_group = unsafe { libc::getpgrp() };
    let ret = if pgid == pid && pgid != own_group {
        // SAFETY: killpg has no memory preconditions, returns -1 on error.
        unsafe { libc::killpg(pgid, Signal::SIGTERM.as_raw()) }
    } else {
        // SAFETY: kill has no memory preconditions, returns -1 on error.
        unsafe { libc::kill(pid, Signal::SIGTERM.as_raw()) }
    };
    if ret < 0 {
        return Err(CronError::KillError(errno()));
    }
    Ok(())
}

/// Handler-context wrapper. Returns whether a SIGTERM went out.
///
/// No child, or a child that is already gone (ESRCH), is nothing to do.
/// Any other failure means our bookkeeping is wrong and nothing we do next
/// can be trusted: bail out with EX_OSERR.
pub fn kill_process_group_or_exit() -> bool {
    match kill_process_group() {
        Ok(()) => true,
        Err(CronError::KillError(libc::ESRCH)) => false,
        Err(_) => {
            write_stderr_raw(b"killpg: failed to signal child process group\n");
            // SAFETY: _exit is async-signal-safe and never returns.
            unsafe { libc::_exit(i32::from(exit_codes::OSERR)) }
        }
    }
}

/* we got a "please die" signal. take the child's group with us. */
extern "C" fn termination_handler(sig: i32) {
    /* second fatal signal while cleaning up: don't retry, just die */
    if SUPERVISOR.fatal_error_in_progress.swap(true, Ordering::SeqCst) {
        reset_default(sig);
        raise(sig);
        return;
    }

    if SUPERVISOR.child_pid().is_some() {
        let saved = errno();
        let _ = kill_process_group_or_exit();
        set_errno(saved);
    }

    /* sig is blocked while we run; it is delivered with SIG_DFL on return */
    reset_default(sig);
    raise(sig);
}

/// Install the termination handlers (INT, HUP, TERM, QUIT).
///
/// Signals an ancestor set to SIG_IGN stay ignored. Returns what was
/// replaced so it can be put back after the child is reaped.
pub fn install_termination_handlers() -> Result<Vec<SavedAction>> {
    let mut saved = Vec::with_capacity(TERMINATION_SIGNALS.len());
    for sig in TERMINATION_SIGNALS {
        match install_handler_unless_ignored(sig, termination_handler, &TERMINATION_SIGNALS) {
            Ok(Some(action)) => saved.push(action),
            Ok(None) => tracing::debug!(signal = ?sig, "signal ignored by parent, leaving it"),
            Err(e) => {
                restore_handlers(saved);
                return Err(e);
            }
        }
    }
    Ok(saved)
}

fn restore_handlers(saved: Vec<SavedAction>) {
    for action in saved {
        let sig = action.signal();
        if let Err(e) = action.restore() {
            tracing::warn!(signal = ?sig, "could not restore signal disposition: {e}");
        }
    }
}

/// Optional hook run once the child exists, right before blocking.
pub type PreWait<'a> = &'a dyn Fn() -> Result<()>;

/// Run `command` with argv `args` (`args[0]` included) in its own process
/// group and wait for it.
///
/// `pre_wait` runs exactly once, after the child exists and before the
/// first wait; that's where a timeout gets armed. The interval timer is
/// cleared on the way out no matter what.
pub fn run_subprocess(command: &str, args: &[String], pre_wait: Option<PreWait<'_>>) -> Result<ChildStatus> {
    let image = ExecImage::new(command, args)?;
    let pid = spawn_detached(&image)?;
    SUPERVISOR.begin(pid);
    tracing::debug!(pid, command = image.program(), "child started");

    let result = supervise(pid, pre_wait);

    let _ = timer::clear();
    SUPERVISOR.end();
    result
}

fn supervise(pid: i32, pre_wait: Option<PreWait<'_>>) -> Result<ChildStatus> {
    /* only the parent gets these, and only once the pid is published */
    let handlers = match install_termination_handlers() {
        Ok(h) => h,
        Err(e) => {
            let _ = kill_process_group();
            return Err(e);
        }
    };

    let result = pre_wait
        .map_or(Ok(()), |hook| hook())
        .and_then(|()| wait_for_child(pid));

    if result.is_err() {
        /* don't leave an orphaned group behind on our error paths */
        let _ = kill_process_group();
    }

    let _ = timer::clear();
    restore_handlers(handlers);
    result
}

/* blocking wait for exactly our child. EINTR is normal. */
fn wait_for_child(pid: i32) -> Result<ChildStatus> {
    let mut status: i32 = 0;
    let reaped = loop {
        // SAFETY: pid is our child, status is a valid out-pointer.
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret == pid {
            /* before anything else can be interrupted by SIGALRM */
            SUPERVISOR.reaped();
            let _ = timer::clear();
            break ret;
        }
        if ret > 0 {
            break ret;
        }

        let err = errno();
        if err == libc::EINTR {
            if SUPERVISOR.killed_by_us() {
                /* the group is being torn down; nothing left to wait for */
                tracing::debug!(pid, "stopped waiting, child group was killed");
                return Ok(ChildStatus::Abandoned);
            }
            tracing::debug!(pid, "waitpid interrupted, waiting again");
            continue;
        }

        return Err(CronError::WaitError(err));
    };

    if reaped != pid {
        tracing::error!("childpid {pid} not returned by waitpid! instead {reaped}");
        return Err(CronError::UnexpectedChild {
            expected: pid,
            got: reaped,
        });
    }

    let child = ChildStatus::from_raw(RawExitStatus::from_raw(status));
    match child {
        ChildStatus::Exited(code) => tracing::debug!("child exited with status {code}"),
        ChildStatus::Signaled(sig) => tracing::debug!("child exited via signal {sig}"),
        ChildStatus::Abandoned => {}
    }
    Ok(child)
}
