/*
 * alarm.rs
 *
 * runalarm: run a command, kill its process group if it's still going
 * after N seconds.
 *
 * SIGALRM goes in without SA_RESTART so the supervisor's waitpid comes
 * back with EINTR. By then the handler has already set killed_by_us and
 * sent SIGTERM to the group, so the wait loop stops instead of retrying.
 *
 * The handler touches one flag and calls the terminator. That's it. A
 * late alarm, after the child was reaped, finds no pid and does nothing.
 */

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::signal::{Signal, errno, install_handler, set_errno};
use crate::supervisor::{ChildStatus, kill_process_group_or_exit, run_subprocess};
use crate::timer;

/// One day. Long enough that only a wedged job hits it.
pub const DEFAULT_TIMEOUT_SECS: u32 = 86_400;

/* set by the handler, read after the wait returns */
static ALARM_FIRED: AtomicBool = AtomicBool::new(false);

/* the flag goes up before the kill so the waiter never sees the child die
 * without it; an alarm that finds no child puts it back down */
extern "C" fn alarm_handler(_sig: i32) {
    let saved = errno();
    ALARM_FIRED.store(true, Ordering::SeqCst);
    if !kill_process_group_or_exit() {
        ALARM_FIRED.store(false, Ordering::SeqCst);
    }
    set_errno(saved);
}

/// What runalarm needs to know. Built from the command line by `args.rs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmConfig {
    /// 0 disables the timeout.
    pub timeout_secs: u32,
    pub command: String,
    /// Full argv for the command, `args[0]` included.
    pub args: Vec<String>,
}

/// Result of a supervised run under a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmResult {
    pub status: ChildStatus,
    pub timed_out: bool,
}

impl AlarmResult {
    /// `128 + SIGALRM` on timeout, the child's own status otherwise.
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn exit_code(&self) -> u8 {
        if self.timed_out {
            ((128 + Signal::SIGALRM.as_raw()) & 0xFF) as u8
        } else {
            self.status.exit_code()
        }
    }
}

/// Run the command, killing its process group after `timeout_secs`.
///
/// The timer is armed only once the child exists, and it is always
/// disarmed and the previous SIGALRM disposition put back before this
/// returns.
pub fn run_with_timeout(config: &AlarmConfig) -> Result<AlarmResult> {
    ALARM_FIRED.store(false, Ordering::SeqCst);
    let saved = install_handler(Signal::SIGALRM, alarm_handler, &[])?;

    let secs = config.timeout_secs;
    let arm = || timer::arm(secs);
    let result = run_subprocess(&config.command, &config.args, Some(&arm));

    let _ = timer::clear();
    if let Err(e) = saved.restore() {
        tracing::warn!("could not restore SIGALRM disposition: {e}");
    }

    let status = result?;
    let timed_out = ALARM_FIRED.swap(false, Ordering::SeqCst);
    if timed_out {
        tracing::info!(
            "command '{}' timed out after {} seconds",
            config.command,
            config.timeout_secs
        );
    }

    Ok(AlarmResult { status, timed_out })
}
