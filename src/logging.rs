/*
 * logging.rs
 *
 * Cron jobs have no terminal, so the real log is syslog (LOG_CRON, with
 * our pid). Errors also go to stderr, which cron mails to the owner.
 * With -d everything down to debug goes to both.
 *
 * The rest of the crate only emits tracing events. Sinks are set up here,
 * once, by main.
 */

use std::ffi::{CStr, CString};
use std::fmt::{self, Write as _};
use std::sync::OnceLock;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

/* openlog keeps the pointer, so the ident has to outlive every syslog call */
static IDENT: OnceLock<CString> = OnceLock::new();

/// Where formatted syslog lines go. Swapped out in tests.
pub type SyslogSink = fn(priority: i32, message: &CStr);

fn send_to_syslog(priority: i32, message: &CStr) {
    // SAFETY: "%s" with one NUL-terminated string argument is a valid
    // format/argument pair; message outlives the call.
    unsafe {
        libc::syslog(priority, c"%s".as_ptr(), message.as_ptr());
    }
}

/// Map a tracing level onto a syslog priority.
#[must_use]
pub fn syslog_priority(level: &Level) -> i32 {
    match *level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        _ => libc::LOG_DEBUG,
    }
}

/* "message" first, then any other fields as key=value */
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl MessageVisitor {
    fn finish(self) -> String {
        let mut line = self.message;
        line.push_str(&self.fields);
        /* syslog takes a C string */
        line.retain(|c| c != '\0');
        line
    }
}

/// Forwards events to syslog(3).
pub struct SyslogLayer {
    sink: SyslogSink,
}

impl SyslogLayer {
    #[must_use]
    pub fn new() -> Self {
        Self { sink: send_to_syslog }
    }

    #[must_use]
    pub fn with_sink(sink: SyslogSink) -> Self {
        Self { sink }
    }
}

impl Default for SyslogLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Subscriber> Layer<S> for SyslogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if let Ok(line) = CString::new(visitor.finish()) {
            (self.sink)(syslog_priority(event.metadata().level()), &line);
        }
    }
}

/// Open syslog as `ident` under LOG_CRON.
pub fn open_syslog(ident: &str) {
    let ident = IDENT.get_or_init(|| {
        CString::new(ident).unwrap_or_else(|_| CString::from(c"cronutils"))
    });
    // SAFETY: ident is stored in a static and never dropped, as openlog requires.
    unsafe {
        libc::openlog(ident.as_ptr(), libc::LOG_PID | libc::LOG_ODELAY, libc::LOG_CRON);
    }
}

/// Install the global subscriber. Call once, before anything logs.
///
/// syslog gets INFO and up (DEBUG with `debug`); stderr gets ERROR only
/// (DEBUG with `debug`).
pub fn init(ident: &str, debug: bool) {
    open_syslog(ident);

    let (syslog_level, stderr_level) = if debug {
        (LevelFilter::DEBUG, LevelFilter::DEBUG)
    } else {
        (LevelFilter::INFO, LevelFilter::ERROR)
    };

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .with_filter(stderr_level);

    let _ = tracing_subscriber::registry()
        .with(SyslogLayer::new().with_filter(syslog_level))
        .with(stderr)
        .try_init();
}
