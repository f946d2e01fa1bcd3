/*
 * timer.rs
 *
 * One-shot ITIMER_REAL. Fires SIGALRM once after N seconds.
 *
 * Zero seconds disarms, which is also how you cancel. it_interval stays
 * zero so the timer never re-arms itself after firing.
 */

use crate::error::{CronError, Result};
use crate::signal::errno;

/* whole seconds only - the CLI takes integer seconds */
fn set_real_timer(seconds: u32) -> Result<()> {
    #[allow(clippy::cast_possible_wrap)]
    let secs = seconds as libc::time_t;
    let timer = libc::itimerval {
        it_interval: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        it_value: libc::timeval {
            tv_sec: secs,
            tv_usec: 0,
        },
    };
    // SAFETY: timer is a fully initialized itimerval, old value pointer may be null.
    let ret = unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, core::ptr::null_mut()) };
    if ret != 0 {
        return Err(CronError::SignalError(errno()));
    }
    Ok(())
}

/// Arm the timer. SIGALRM arrives after `seconds`; 0 leaves it disarmed.
pub fn arm(seconds: u32) -> Result<()> {
    set_real_timer(seconds)
}

/// Disarm the timer. A pending expiry is discarded.
///
/// Never fails in practice (ITIMER_REAL with a valid struct), so callers on
/// cleanup paths can ignore the result.
pub fn clear() -> Result<()> {
    set_real_timer(0)
}
