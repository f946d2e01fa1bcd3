/*
 * stats.rs
 *
 * runstat: run the command, then write down how it went.
 *
 * One CSV line per variable: command,name,value,units. The file is
 * replaced atomically (temp file in the same dir, fsync, rename) so a
 * monitoring script never reads half a run.
 *
 * Resource numbers come from getrusage(RUSAGE_CHILDREN), i.e. everything
 * reaped so far. We only ever reap one child, so that's the command.
 */

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tempfile::NamedTempFile;

use crate::error::{CronError, Result};
use crate::signal::errno;
use crate::supervisor::{ChildStatus, run_subprocess};
use crate::tempdir::{command_basename, make_tempdir};

/// How collectd should treat a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Gauge,
    /// A point in time rather than a measurement.
    Absolute,
}

impl VarKind {
    /// Data source type in a PUTVAL identifier.
    #[must_use]
    pub const fn collectd_type(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Absolute => "counter",
        }
    }
}

/// One recorded number. The value is already formatted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: &'static str,
    pub value: String,
    pub units: &'static str,
    pub kind: VarKind,
}

/// Wall clock and monotonic readings around the run.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub start: SystemTime,
    pub end: SystemTime,
    pub elapsed: Duration,
}

/// Everything runstat knows about one run, in recording order.
#[derive(Debug, Clone)]
pub struct Statistics {
    command: String,
    end_secs: u64,
    vars: Vec<Variable>,
}

impl Statistics {
    #[must_use]
    pub fn new(command: &str, end: SystemTime) -> Self {
        Self {
            command: command.to_string(),
            end_secs: epoch(end).as_secs(),
            vars: Vec::new(),
        }
    }

    pub fn push(&mut self, name: &'static str, kind: VarKind, units: &'static str, value: impl fmt::Display) {
        self.vars.push(Variable {
            name,
            value: value.to_string(),
            units,
            kind,
        });
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// End of the run, whole seconds since the epoch.
    pub fn end_secs(&self) -> u64 {
        self.end_secs
    }

    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.iter().find(|v| v.name == name).map(|v| v.value.as_str())
    }

    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for var in &self.vars {
            out.push_str(&format!("{},{},{},{}\n", self.command, var.name, var.value, var.units));
        }
        out
    }

    /// Replace `path` with the CSV, atomically.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let stats_err = |what: &str, e: std::io::Error| CronError::Stats(format!("{}: {what}: {e}", path.display()));

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| stats_err("create temp file", e))?;
        tmp.write_all(self.to_csv().as_bytes())
            .map_err(|e| stats_err("write", e))?;
        tmp.as_file().sync_all().map_err(|e| stats_err("fsync", e))?;
        tmp.persist(path).map_err(|e| stats_err("rename", e.error))?;
        Ok(())
    }
}

fn epoch(t: SystemTime) -> Duration {
    /* clocks before 1970 are somebody else's problem */
    t.duration_since(UNIX_EPOCH).unwrap_or_default()
}

fn fmt_micros(d: Duration) -> String {
    format!("{}.{:06}", d.as_secs(), d.subsec_micros())
}

fn fmt_timeval(tv: libc::timeval) -> String {
    format!("{}.{:06}", tv.tv_sec, tv.tv_usec)
}

/// Resource usage of every reaped child so far.
pub fn children_rusage() -> Result<libc::rusage> {
    // SAFETY: rusage is a plain C struct, all-zero is a valid out-parameter.
    let mut ru: libc::rusage = unsafe { core::mem::zeroed() };
    // SAFETY: ru is a valid out-pointer.
    if unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, &mut ru) } != 0 {
        return Err(CronError::Stats(format!("getrusage: errno {}", errno())));
    }
    Ok(ru)
}

/// Build the variable list for one run.
///
/// `usage` is optional: a failed getrusage still leaves status and timing.
#[must_use]
pub fn collect(command: &str, status: ChildStatus, timing: &Timing, usage: Option<&libc::rusage>) -> Statistics {
    let mut stats = Statistics::new(command, timing.end);

    stats.push("exit_status", VarKind::Gauge, "", status.exit_code());

    stats.push("start_timestamp", VarKind::Absolute, "time_t", fmt_micros(epoch(timing.start)));
    stats.push("end_timestamp", VarKind::Absolute, "time_t", fmt_micros(epoch(timing.end)));

    let elapsed = timing.elapsed;
    stats.push(
        "elapsed_time",
        VarKind::Gauge,
        "s",
        format!("{}.{:09}", elapsed.as_secs(), elapsed.subsec_nanos()),
    );

    if let Some(ru) = usage {
        stats.push("user_time", VarKind::Gauge, "s", fmt_timeval(ru.ru_utime));
        stats.push("system_time", VarKind::Gauge, "s", fmt_timeval(ru.ru_stime));

        stats.push("rss-max", VarKind::Gauge, "B", ru.ru_maxrss);
        stats.push("rss-shared", VarKind::Gauge, "B", ru.ru_ixrss);
        stats.push("rss-data_unshared", VarKind::Gauge, "B", ru.ru_idrss);
        stats.push("rss-stack_unshared", VarKind::Gauge, "B", ru.ru_isrss);

        stats.push("page-reclaims", VarKind::Gauge, "pages", ru.ru_minflt);
        stats.push("page-faults", VarKind::Gauge, "pages", ru.ru_majflt);
        stats.push("swaps", VarKind::Gauge, "swaps", ru.ru_nswap);

        stats.push("block_ios-in", VarKind::Gauge, "block_ios", ru.ru_inblock);
        stats.push("block_ios-out", VarKind::Gauge, "block_ios", ru.ru_oublock);

        stats.push("messages-sent", VarKind::Gauge, "messages", ru.ru_msgsnd);
        stats.push("messages-received", VarKind::Gauge, "messages", ru.ru_msgrcv);

        stats.push("signals-received", VarKind::Gauge, "signals", ru.ru_nsignals);
        stats.push("ctx_switch-voluntary", VarKind::Gauge, "context switches", ru.ru_nvcsw);
        stats.push("ctx_switch-involuntary", VarKind::Gauge, "context switches", ru.ru_nivcsw);
    }

    stats
}

/// runstat settings. Built from the command line by `args.rs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatConfig {
    /// Explicit stats file; `None` means `<tempdir>/<command>.stat`.
    pub stats_path: Option<PathBuf>,
    /// collectd unixsock plugin socket, if any.
    pub collectd_socket: Option<PathBuf>,
    pub command: String,
    /// Full argv for the command, `args[0]` included.
    pub args: Vec<String>,
}

/// `<tempdir>/<basename(command)>.stat` unless a path was given.
#[must_use]
pub fn resolve_stats_path(explicit: Option<&Path>, tempdir: &Path, command: &str) -> PathBuf {
    explicit.map_or_else(
        || tempdir.join(format!("{}.stat", command_basename(command))),
        Path::to_path_buf,
    )
}

/// Run the command, then write its statistics file.
///
/// The stats file is written only after the child is reaped. Returns the
/// child's status plus what was recorded, for the collectd push.
pub fn run_with_stats(config: &StatConfig) -> Result<(ChildStatus, Statistics)> {
    let start = SystemTime::now();
    let started = Instant::now();
    let status = run_subprocess(&config.command, &config.args, None)?;
    let elapsed = started.elapsed();
    let end = SystemTime::now();

    let usage = match children_rusage() {
        Ok(ru) => Some(ru),
        Err(e) => {
            tracing::warn!("{e}");
            None
        }
    };
    let timing = Timing { start, end, elapsed };
    let stats = collect(&config.command, status, &timing, usage.as_ref());

    let path = match &config.stats_path {
        Some(p) => p.clone(),
        None => resolve_stats_path(None, &make_tempdir()?, &config.command),
    };
    tracing::debug!("statistics filename is {}", path.display());
    stats.write_atomic(&path)?;

    Ok((status, stats))
}
