/*
 * args.rs
 *
 * Clap derive macros handle parsing. Life's too short to do this by hand.
 *
 * Same flags as the cronutils tools people already have in their
 * crontabs: -t, -f, -C, -d. Don't rename them.
 *
 * The command is one trailing positional. Once the first word of the
 * command is seen everything after it belongs to the command, so
 * `runlock -t 10 rsync -d src dst` hands -d to rsync, not to us.
 *
 * Timeouts are taken as strings and checked here: a bad number is a data
 * error (65), not a usage error (64).
 */

use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use clap_complete::Shell;

use crate::alarm::{AlarmConfig, DEFAULT_TIMEOUT_SECS};
use crate::error::{CronError, Result};
use crate::lock::{DEFAULT_LOCK_TIMEOUT_SECS, LockConfig};
use crate::stats::StatConfig;

#[derive(Parser, Debug)]
#[command(
    name = "runalarm",
    version,
    about = "Run a command, killing it if it runs too long",
    long_about = "Try to run COMMAND in a subprocess, and kill its whole process group \
                  if it is still running after the timeout.\n\n\
                  A timeout of 0 disables the alarm.",
    after_help = "Exit status:\n\
                  128+SIGALRM if COMMAND timed out\n\
                  128+N if COMMAND was killed by signal N\n\
                  the exit status of COMMAND otherwise"
)]
pub struct AlarmArgs {
    /// Seconds to let the command run before killing it.
    #[arg(short = 't', value_name = "SECONDS", allow_hyphen_values = true, default_value_t = DEFAULT_TIMEOUT_SECS.to_string())]
    pub timeout: String,

    /// Send log messages to stderr as well as syslog.
    #[arg(short = 'd')]
    pub debug: bool,

    /// Generate shell completions and exit.
    #[arg(long = "completions", value_name = "SHELL")]
    pub completions: Option<Shell>,

    /// Command to run, followed by its arguments.
    #[arg(value_name = "COMMAND", trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(
    name = "runlock",
    version,
    about = "Run a command while holding an exclusive lock",
    long_about = "Prevent concurrent execution of COMMAND by holding an exclusive lock \
                  while it runs. Another runlock on the same lock file waits up to the \
                  timeout, then exits with status 73 without running anything.\n\n\
                  A timeout of 0 waits forever.",
    after_help = "Exit status:\n\
                  73 if the lock is held by another process\n\
                  the exit status of COMMAND otherwise"
)]
pub struct LockArgs {
    /// Seconds to wait to acquire the lock.
    #[arg(short = 't', value_name = "SECONDS", allow_hyphen_values = true, default_value_t = DEFAULT_LOCK_TIMEOUT_SECS.to_string())]
    pub timeout: String,

    /// Path to use as the lock file (default: per-user temp dir).
    #[arg(short = 'f', value_name = "LOCKFILE")]
    pub lock_file: Option<PathBuf>,

    /// Send log messages to stderr as well as syslog.
    #[arg(short = 'd')]
    pub debug: bool,

    /// Generate shell completions and exit.
    #[arg(long = "completions", value_name = "SHELL")]
    pub completions: Option<Shell>,

    /// Command to run, followed by its arguments.
    #[arg(value_name = "COMMAND", trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(
    name = "runstat",
    version,
    about = "Run a command and record its runtime statistics",
    long_about = "Execute COMMAND in a subprocess and, once it has terminated, write its \
                  exit status, timestamps, elapsed time and resource usage to a \
                  statistics file. Optionally push the same values to collectd."
)]
pub struct StatArgs {
    /// Path to save the statistics file (default: per-user temp dir).
    #[arg(short = 'f', value_name = "STATFILE")]
    pub stats_file: Option<PathBuf>,

    /// Path to the collectd unixsock plugin socket.
    #[arg(short = 'C', value_name = "SOCKET")]
    pub collectd_socket: Option<PathBuf>,

    /// Send log messages to stderr as well as syslog.
    #[arg(short = 'd')]
    pub debug: bool,

    /// Generate shell completions and exit.
    #[arg(long = "completions", value_name = "SHELL")]
    pub completions: Option<Shell>,

    /// Command to run, followed by its arguments.
    #[arg(value_name = "COMMAND", trailing_var_arg = true)]
    pub command: Vec<String>,
}

/// Which utility we are, picked from the name we were run as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Alarm,
    Lock,
    Stat,
}

impl Tool {
    /// `argv[0]`, path and all. Install-time renames like `runlock-1.5`
    /// still match on the prefix.
    #[must_use]
    pub fn from_argv0(argv0: &str) -> Option<Self> {
        let name = crate::tempdir::command_basename(argv0);
        if name.starts_with("runalarm") {
            Some(Self::Alarm)
        } else if name.starts_with("runlock") {
            Some(Self::Lock)
        } else if name.starts_with("runstat") {
            Some(Self::Stat)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Alarm => "runalarm",
            Self::Lock => "runlock",
            Self::Stat => "runstat",
        }
    }
}

/// Whole seconds, non-negative. Anything else is a data error.
pub fn parse_timeout(s: &str) -> Result<u32> {
    s.parse::<u32>()
        .map_err(|_| CronError::InvalidTimeout(s.to_string()))
}

/* first word is the program, the whole vec is its argv */
fn split_command(command: Vec<String>) -> Result<(String, Vec<String>)> {
    match command.first() {
        Some(program) => Ok((program.clone(), command)),
        None => Err(CronError::MissingCommand),
    }
}

/// Generate shell completions for `C` to stdout.
pub fn print_completions<C: CommandFactory>(shell: Shell, bin_name: &str) {
    let mut cmd = C::command();
    clap_complete::generate(shell, &mut cmd, bin_name, &mut io::stdout());
}

impl AlarmConfig {
    pub fn from_args(args: AlarmArgs) -> Result<Self> {
        let timeout_secs = parse_timeout(&args.timeout)?;
        let (command, args) = split_command(args.command)?;
        Ok(Self {
            timeout_secs,
            command,
            args,
        })
    }
}

impl LockConfig {
    pub fn from_args(args: LockArgs) -> Result<Self> {
        let timeout_secs = parse_timeout(&args.timeout)?;
        let lock_path = args.lock_file;
        let (command, args) = split_command(args.command)?;
        Ok(Self {
            timeout_secs,
            lock_path,
            command,
            args,
        })
    }
}

impl StatConfig {
    pub fn from_args(args: StatArgs) -> Result<Self> {
        let stats_path = args.stats_file;
        let collectd_socket = args.collectd_socket;
        let (command, args) = split_command(args.command)?;
        Ok(Self {
            stats_path,
            collectd_socket,
            command,
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_minimal_args() {
        let args = AlarmArgs::try_parse_from(["runalarm", "sleep", "10"]).unwrap();
        assert_eq!(args.timeout, "86400");
        assert!(!args.debug);
        assert!(args.completions.is_none());
        assert_eq!(args.command, vec!["sleep", "10"]);

        let config = AlarmConfig::from_args(args).unwrap();
        assert_eq!(config.timeout_secs, 86_400);
        assert_eq!(config.command, "sleep");
        assert_eq!(config.args, vec!["sleep", "10"]);
    }

    #[test]
    fn test_alarm_all_options() {
        let args = AlarmArgs::try_parse_from(["runalarm", "-d", "-t", "30", "backup", "--full"]).unwrap();
        assert!(args.debug);
        let config = AlarmConfig::from_args(args).unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.args, vec!["backup", "--full"]);
    }

    #[test]
    fn test_command_flags_not_ours() {
        /* -d after the command word belongs to the command */
        let args = AlarmArgs::try_parse_from(["runalarm", "-t", "5", "rsync", "-d", "-t", "x"]).unwrap();
        assert!(!args.debug);
        assert_eq!(args.timeout, "5");
        assert_eq!(args.command, vec!["rsync", "-d", "-t", "x"]);
    }

    #[test]
    fn test_command_with_dashes() {
        /* commands starting with - need the -- separator */
        let args = LockArgs::try_parse_from(["runlock", "--", "-weird", "arg"]).unwrap();
        assert_eq!(args.command, vec!["-weird", "arg"]);
    }

    #[test]
    fn test_missing_command() {
        let args = AlarmArgs::try_parse_from(["runalarm", "-t", "5"]).unwrap();
        let err = AlarmConfig::from_args(args).unwrap_err();
        assert!(matches!(err, CronError::MissingCommand));
        assert_eq!(err.exit_code(), crate::exit_codes::USAGE);
    }

    #[test]
    fn test_unknown_option_is_clap_error() {
        assert!(AlarmArgs::try_parse_from(["runalarm", "-x", "cmd"]).is_err());
    }

    #[test]
    fn test_bad_timeouts() {
        for bad in ["abc", "-5", "1.5", "", "10s", "99999999999"] {
            let err = parse_timeout(bad).unwrap_err();
            assert!(matches!(err, CronError::InvalidTimeout(_)), "{bad:?}");
            assert_eq!(err.exit_code(), crate::exit_codes::DATAERR);
        }
        assert_eq!(parse_timeout("0").unwrap(), 0);
    }

    #[test]
    fn test_lock_defaults() {
        let args = LockArgs::try_parse_from(["runlock", "backup"]).unwrap();
        let config = LockConfig::from_args(args).unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert!(config.lock_path.is_none());
        assert_eq!(config.command, "backup");
    }

    #[test]
    fn test_lock_all_options() {
        let args =
            LockArgs::try_parse_from(["runlock", "-d", "-f", "/var/lock/job", "-t", "0", "job", "a"]).unwrap();
        assert!(args.debug);
        let config = LockConfig::from_args(args).unwrap();
        assert_eq!(config.timeout_secs, 0);
        assert_eq!(config.lock_path, Some(PathBuf::from("/var/lock/job")));
        assert_eq!(config.args, vec!["job", "a"]);
    }

    #[test]
    fn test_lock_negative_timeout() {
        let args = LockArgs::try_parse_from(["runlock", "-t", "-5", "job"]).unwrap();
        assert_eq!(args.timeout, "-5");
        let err = LockConfig::from_args(args).unwrap_err();
        assert_eq!(err.exit_code(), crate::exit_codes::DATAERR);
    }

    #[test]
    fn test_stat_options() {
        let args = StatArgs::try_parse_from([
            "runstat",
            "-f",
            "/var/tmp/job.stat",
            "-C",
            "/var/run/collectd.sock",
            "job",
        ])
        .unwrap();
        let config = StatConfig::from_args(args).unwrap();
        assert_eq!(config.stats_path, Some(PathBuf::from("/var/tmp/job.stat")));
        assert_eq!(config.collectd_socket, Some(PathBuf::from("/var/run/collectd.sock")));
        assert_eq!(config.command, "job");
    }

    #[test]
    fn test_stat_has_no_timeout() {
        assert!(StatArgs::try_parse_from(["runstat", "-t", "5", "job"]).is_err());
    }

    #[test]
    fn test_tool_from_argv0() {
        assert_eq!(Tool::from_argv0("runalarm"), Some(Tool::Alarm));
        assert_eq!(Tool::from_argv0("/usr/bin/runlock"), Some(Tool::Lock));
        assert_eq!(Tool::from_argv0("./target/debug/runstat"), Some(Tool::Stat));
        assert_eq!(Tool::from_argv0("runlock-1.5"), Some(Tool::Lock));
        assert_eq!(Tool::from_argv0("cronutils"), None);
        assert_eq!(Tool::Alarm.name(), "runalarm");
    }

    #[test]
    fn test_completions_flag() {
        let args = StatArgs::try_parse_from(["runstat", "--completions", "bash"]).unwrap();
        assert_eq!(args.completions, Some(Shell::Bash));
        assert!(args.command.is_empty());
    }
}
