/*
 * lib.rs
 *
 * Exists mostly for testing. Integration tests need our types, doc tests
 * need a lib. You could use this as a library but honestly just shell out.
 *
 * One process supervises one child at a time: the supervisor state, the
 * interval timer and the signal dispositions are all process-wide.
 */

//! # cronutils
//!
//! Cron job wrappers that run one command and enforce something around it:
//!
//! - `runalarm` kills the command's process group after a timeout
//! - `runlock` holds an exclusive lock file while the command runs
//! - `runstat` records the command's exit status and resource usage
//!
//! ## Quick Start
//!
//! ```rust
//! use cronutils::{ChildStatus, parse_timeout};
//!
//! assert_eq!(parse_timeout("30").unwrap(), 30);
//! assert!(parse_timeout("-1").is_err());
//!
//! // shell convention: 128 + signal number
//! assert_eq!(ChildStatus::Signaled(15).exit_code(), 143);
//! assert_eq!(ChildStatus::Exited(3).exit_code(), 3);
//! ```

pub mod alarm;
pub mod args;
pub mod collectd;
pub mod error;
pub mod lock;
pub mod logging;
pub mod process;
pub mod signal;
pub mod stats;
pub mod supervisor;
pub mod tempdir;
pub mod timer;

pub use alarm::{AlarmConfig, AlarmResult, run_with_timeout};
pub use args::{AlarmArgs, LockArgs, StatArgs, Tool, parse_timeout};
pub use error::{CronError, Result, exit_codes};
pub use lock::{HeldLock, LockConfig, LockOutcome, acquire_lock, resolve_lock_path, run_locked};
pub use signal::{Signal, signal_name};
pub use stats::{StatConfig, Statistics, resolve_stats_path, run_with_stats};
pub use supervisor::{ChildStatus, SUPERVISOR, kill_process_group, run_subprocess};
pub use tempdir::{command_basename, make_tempdir, make_tempdir_in};

/* tests that fork, arm the itimer or swap signal handlers share process
 * state; they take this first */
#[cfg(test)]
pub(crate) fn test_serial() -> std::sync::MutexGuard<'static, ()> {
    static SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());
    SERIAL
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
