/*
 * collectd.rs
 *
 * Push runstat's variables to collectd's unixsock plugin. One PUTVAL per
 * variable, one response line read back after each:
 *
 *   PUTVAL "<host>/runstat-<command>/<type>-<name>" <end>:<value>
 *
 * Best effort. By the time we get here the command already ran and the
 * stats file is written; a missing collectd must not change our exit code.
 */

use std::ffi::CStr;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use crate::error::{CronError, Result};
use crate::signal::errno;
use crate::stats::{Statistics, Variable};
use crate::tempdir::command_basename;

/* a healthy collectd answers in microseconds */
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// This machine's hostname, for the PUTVAL identifier.
pub fn hostname() -> Result<String> {
    let mut buf = [0 as libc::c_char; 256];
    // SAFETY: buf is valid for buf.len() bytes; one byte is kept back so the
    // result is NUL-terminated even if the name was truncated.
    if unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len() - 1) } != 0 {
        return Err(CronError::Collectd(format!("gethostname: errno {}", errno())));
    }
    // SAFETY: buf is zero-initialized and its last byte never written.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

/// One PUTVAL command line, newline included.
#[must_use]
pub fn putval_line(host: &str, command: &str, end_secs: u64, var: &Variable) -> String {
    format!(
        "PUTVAL \"{host}/runstat-{}/{}-{}\" {end_secs}:{}\n",
        command_basename(command),
        var.kind.collectd_type(),
        var.name,
        var.value
    )
}

/// Send every variable in `stats` to the collectd socket at `socket`.
///
/// Returns how many values collectd acknowledged with a success status.
pub fn push(socket: &Path, stats: &Statistics) -> Result<usize> {
    let host = hostname()?;
    let sock_err = |what: &str, e: std::io::Error| {
        CronError::Collectd(format!("{}: {what}: {e}", socket.display()))
    };

    let stream = UnixStream::connect(socket).map_err(|e| sock_err("connect", e))?;
    stream
        .set_read_timeout(Some(IO_TIMEOUT))
        .and_then(|()| stream.set_write_timeout(Some(IO_TIMEOUT)))
        .map_err(|e| sock_err("set timeout", e))?;

    let mut writer = stream.try_clone().map_err(|e| sock_err("clone", e))?;
    let mut reader = BufReader::new(stream);
    let mut accepted = 0;
    let mut reply = String::new();

    for var in stats.variables() {
        let line = putval_line(&host, stats.command(), stats.end_secs(), var);
        writer
            .write_all(line.as_bytes())
            .map_err(|e| sock_err("write", e))?;

        reply.clear();
        reader.read_line(&mut reply).map_err(|e| sock_err("read", e))?;

        /* unixsock answers "<status> <message>", status 0 on success */
        if reply.split_whitespace().next() == Some("0") {
            accepted += 1;
        } else {
            tracing::debug!(variable = var.name, "collectd: {}", reply.trim_end());
        }
    }

    Ok(accepted)
}
