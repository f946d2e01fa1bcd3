/*
 * main.rs
 *
 * Parse args, call the library, turn the result into an exit code.
 * Boring on purpose. The interesting stuff is in supervisor.rs.
 *
 * One source, three binaries. Which tool we are comes from argv[0].
 *
 * Exit code is the command's own status when it ran, a sysexits code when
 * we failed before or around it. Don't change the mapping, crontabs and
 * monitoring check for these numbers.
 */

use std::ffi::OsString;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use cronutils::args::print_completions;
use cronutils::{
    AlarmArgs, AlarmConfig, CronError, LockArgs, LockConfig, StatArgs, StatConfig, Tool, collectd,
    exit_codes, logging, run_locked, run_with_stats, run_with_timeout,
};

fn main() -> ExitCode {
    let argv: Vec<OsString> = std::env::args_os().collect();
    let argv0 = argv
        .first()
        .map(|a| a.to_string_lossy().into_owned())
        .unwrap_or_default();

    let Some(tool) = Tool::from_argv0(&argv0) else {
        eprintln!("cronutils: run as runalarm, runlock or runstat (got {argv0:?})");
        return ExitCode::from(exit_codes::USAGE);
    };

    let code = match tool {
        Tool::Alarm => runalarm(&argv),
        Tool::Lock => runlock(&argv),
        Tool::Stat => runstat(&argv),
    };
    ExitCode::from(code)
}

/* clap prints its own message; help and version are not failures */
fn parse<A: Parser>(argv: &[OsString]) -> Result<A, u8> {
    A::try_parse_from(argv).map_err(|e| {
        let _ = e.print();
        match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
            _ => exit_codes::USAGE,
        }
    })
}

/* log once, at the right level, and pick the exit code */
fn fail<A: CommandFactory>(e: &CronError) -> u8 {
    if e.is_expected() {
        tracing::info!("{e}");
    } else {
        tracing::error!("{e}");
    }
    if matches!(e, CronError::MissingCommand) {
        eprintln!("{}", A::command().render_usage());
    }
    e.exit_code()
}

fn runalarm(argv: &[OsString]) -> u8 {
    let tool = Tool::Alarm;
    let args: AlarmArgs = match parse(argv) {
        Ok(args) => args,
        Err(code) => return code,
    };
    if let Some(shell) = args.completions {
        print_completions::<AlarmArgs>(shell, tool.name());
        return 0;
    }
    logging::init(tool.name(), args.debug);

    let config = match AlarmConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => return fail::<AlarmArgs>(&e),
    };

    match run_with_timeout(&config) {
        Ok(result) => result.exit_code(),
        Err(e) => fail::<AlarmArgs>(&e),
    }
}

fn runlock(argv: &[OsString]) -> u8 {
    let tool = Tool::Lock;
    let args: LockArgs = match parse(argv) {
        Ok(args) => args,
        Err(code) => return code,
    };
    if let Some(shell) = args.completions {
        print_completions::<LockArgs>(shell, tool.name());
        return 0;
    }
    logging::init(tool.name(), args.debug);

    let config = match LockConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => return fail::<LockArgs>(&e),
    };

    match run_locked(&config) {
        Ok(status) => status.exit_code(),
        Err(e) => fail::<LockArgs>(&e),
    }
}

fn runstat(argv: &[OsString]) -> u8 {
    let tool = Tool::Stat;
    let args: StatArgs = match parse(argv) {
        Ok(args) => args,
        Err(code) => return code,
    };
    if let Some(shell) = args.completions {
        print_completions::<StatArgs>(shell, tool.name());
        return 0;
    }
    logging::init(tool.name(), args.debug);

    let config = match StatConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => return fail::<StatArgs>(&e),
    };

    let (status, stats) = match run_with_stats(&config) {
        Ok(done) => done,
        Err(e) => return fail::<StatArgs>(&e),
    };

    /* the command already ran; collectd trouble doesn't change our status */
    if let Some(socket) = &config.collectd_socket {
        match collectd::push(socket, &stats) {
            Ok(accepted) => tracing::debug!(accepted, "pushed statistics to collectd"),
            Err(e) => tracing::warn!("{e}"),
        }
    }

    status.exit_code()
}
