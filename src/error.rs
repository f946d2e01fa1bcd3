/*
 * error.rs
 *
 * Exit codes come from sysexits.h. Cron reads them, mail filters read them,
 * people grep for 73 in their crontab mail. Don't renumber.
 *
 * The supervised command's own exit status is not an error. It never shows
 * up here, it goes straight through as our exit code.
 */

use std::fmt;

/// exit codes per sysexits.h. don't change these.
pub mod exit_codes {
    /// Command line usage error (missing command, unknown option)
    pub const USAGE: u8 = 64;
    /// Bad input data (non-numeric or negative timeout)
    pub const DATAERR: u8 = 65;
    /// Cannot open input (lock file)
    pub const NOINPUT: u8 = 66;
    /// Service unavailable (exec of the command failed)
    pub const UNAVAILABLE: u8 = 69;
    /// System error (fork, wait, kill, sigaction failed)
    pub const OSERR: u8 = 71;
    /// Can't create (user) output file - runlock uses it for "already locked"
    pub const CANTCREAT: u8 = 73;
    /// Input/output error
    pub const IOERR: u8 = 74;
    /// Permission denied (temp dir not ours, or world writable)
    pub const NOPERM: u8 = 77;
}

/* everything that can go wrong */
#[derive(Debug)]
pub enum CronError {
    InvalidTimeout(String),
    MissingCommand,
    InvalidArg(String),
    ForkError(i32),    // errno from fork
    WaitError(i32),    // errno from waitpid
    KillError(i32),    // errno from getpgid/killpg
    SignalError(i32),  // errno from sigaction/setitimer
    UnexpectedChild { expected: i32, got: i32 },
    LockOpen(String, i32), // lock path + errno from open
    LockIo(String, i32),   // lock path + errno from fcntl/write/fsync
    LockTimedOut(u32),     // seconds we waited
    LockContended,
    TempDir(String),
    TempDirNotDirectory(String),
    TempDirInsecure(String),
    UnknownUser(u32),
    Stats(String),
    Collectd(String),
}

impl fmt::Display for CronError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTimeout(s) => write!(f, "invalid timeout specified: {s}"),
            Self::MissingCommand => write!(f, "missing command"),
            Self::InvalidArg(s) => write!(f, "invalid argument: {s}"),
            Self::ForkError(errno) => write!(f, "fork failed: errno {errno}"),
            Self::WaitError(errno) => write!(f, "waitpid failed: errno {errno}"),
            Self::KillError(errno) => write!(f, "killpg failed: errno {errno}"),
            Self::SignalError(errno) => write!(f, "signal setup failed: errno {errno}"),
            Self::UnexpectedChild { expected, got } => {
                write!(f, "childpid {expected} not returned by waitpid! instead {got}")
            }
            Self::LockOpen(path, errno) => write!(f, "{path}: cannot open lock file: errno {errno}"),
            Self::LockIo(path, errno) => write!(f, "{path}: lock file i/o error: errno {errno}"),
            Self::LockTimedOut(secs) => {
                write!(f, "waited {secs} seconds, already locked by another process")
            }
            Self::LockContended => write!(f, "already locked by another process"),
            Self::TempDir(s) => write!(f, "temp dir error: {s}"),
            Self::TempDirNotDirectory(path) => write!(f, "{path} is not a directory"),
            Self::TempDirInsecure(s) => write!(f, "{s}"),
            Self::UnknownUser(uid) => write!(f, "no passwd entry for uid {uid}"),
            Self::Stats(s) => write!(f, "statistics error: {s}"),
            Self::Collectd(s) => write!(f, "collectd error: {s}"),
        }
    }
}

impl std::error::Error for CronError {}

impl CronError {
    /* map errors to exit codes. 73 is what cron users match on for runlock. */
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingCommand | Self::InvalidArg(_) => exit_codes::USAGE,
            Self::InvalidTimeout(_) => exit_codes::DATAERR,
            Self::LockOpen(_, _) => exit_codes::NOINPUT,
            /* timed out and contended are the same thing to the caller */
            Self::LockTimedOut(_) | Self::LockContended => exit_codes::CANTCREAT,
            Self::LockIo(_, _) | Self::TempDirNotDirectory(_) | Self::Stats(_) => {
                exit_codes::IOERR
            }
            Self::TempDirInsecure(_) => exit_codes::NOPERM,
            Self::ForkError(_)
            | Self::WaitError(_)
            | Self::KillError(_)
            | Self::SignalError(_)
            | Self::UnexpectedChild { .. }
            | Self::TempDir(_)
            | Self::UnknownUser(_)
            | Self::Collectd(_) => exit_codes::OSERR,
        }
    }

    /* expected outcomes get logged at info, not error */
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::LockTimedOut(_) | Self::LockContended)
    }
}

pub type Result<T> = core::result::Result<T, CronError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_outcomes_share_exit_code() {
        assert_eq!(CronError::LockTimedOut(5).exit_code(), exit_codes::CANTCREAT);
        assert_eq!(CronError::LockContended.exit_code(), exit_codes::CANTCREAT);
    }

    #[test]
    fn test_lock_timed_out_display() {
        let msg = CronError::LockTimedOut(7).to_string();
        assert_eq!(msg, "waited 7 seconds, already locked by another process");
    }

    #[test]
    fn test_expected_errors() {
        assert!(CronError::LockContended.is_expected());
        assert!(CronError::LockTimedOut(1).is_expected());
        assert!(!CronError::ForkError(libc::EAGAIN).is_expected());
        assert!(!CronError::LockIo("x".into(), libc::EIO).is_expected());
    }

    #[test]
    fn test_resource_errors_are_oserr() {
        assert_eq!(CronError::ForkError(libc::EAGAIN).exit_code(), exit_codes::OSERR);
        assert_eq!(
            CronError::UnexpectedChild { expected: 10, got: 11 }.exit_code(),
            exit_codes::OSERR
        );
    }

    #[test]
    fn test_usage_errors() {
        assert_eq!(CronError::MissingCommand.exit_code(), exit_codes::USAGE);
        assert_eq!(
            CronError::InvalidTimeout("abc".into()).exit_code(),
            exit_codes::DATAERR
        );
    }
}
