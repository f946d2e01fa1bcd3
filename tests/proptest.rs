/*
 * proptest.rs
 *
 * property-based tests for status translation, timeout parsing and the
 * per-command file naming. generates thousands of inputs to find edge cases.
 */

use proptest::prelude::*;
use std::path::{Path, PathBuf};

use cronutils::stats::resolve_stats_path;
use cronutils::{ChildStatus, CronError, Tool, command_basename, parse_timeout, resolve_lock_path};

/* ============================================================================
 * Status Translation Properties
 * ============================================================================ */

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /* a normal exit passes through untouched */
    #[test]
    fn exited_code_passes_through(code in 0i32..=255) {
        prop_assert_eq!(i32::from(ChildStatus::Exited(code).exit_code()), code);
    }

    /* signal deaths are 128 + signo, as the shell reports them */
    #[test]
    fn signaled_is_128_plus_signo(signo in 1i32..=64) {
        prop_assert_eq!(i32::from(ChildStatus::Signaled(signo).exit_code()), 128 + signo);
    }

    /* exited and signaled never collide for real signal numbers */
    #[test]
    fn signal_codes_above_128(signo in 1i32..=64) {
        prop_assert!(ChildStatus::Signaled(signo).exit_code() > 128);
    }
}

/* ============================================================================
 * Timeout Parsing Properties
 * ============================================================================ */

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn timeout_any_u32_parses(secs: u32) {
        prop_assert_eq!(parse_timeout(&secs.to_string()).unwrap(), secs);
    }

    #[test]
    fn timeout_negative_rejected(secs in 1i64..=i64::from(u32::MAX)) {
        let err = parse_timeout(&format!("-{secs}")).unwrap_err();
        prop_assert!(matches!(err, CronError::InvalidTimeout(_)));
        prop_assert_eq!(err.exit_code(), 65);
    }

    #[test]
    fn timeout_with_suffix_rejected(secs: u32, suffix in "[a-z.]{1,3}") {
        let input = format!("{secs}{suffix}");
        prop_assert!(parse_timeout(&input).is_err());
    }

    /* never panics on garbage */
    #[test]
    fn timeout_garbage_no_panic(s in "\\PC*") {
        let _ = parse_timeout(&s);
    }
}

/* ============================================================================
 * File Naming Properties
 * ============================================================================ */

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn basename_drops_directories(dirs in prop::collection::vec("[a-z0-9_]{1,8}", 0..4), name in "[a-z0-9_.-]{1,12}") {
        prop_assume!(name != "." && name != "..");
        let mut command = String::new();
        for dir in &dirs {
            command.push('/');
            command.push_str(dir);
        }
        if !command.is_empty() {
            command.push('/');
        }
        command.push_str(&name);
        prop_assert_eq!(command_basename(&command), name.as_str());
    }

    #[test]
    fn default_lock_path_in_tempdir(name in "[a-z][a-z0-9_]{0,12}") {
        let tempdir = Path::new("/tmp/cronutils-someone");
        let path = resolve_lock_path(None, tempdir, &format!("/usr/bin/{name}"));
        prop_assert_eq!(path.parent(), Some(tempdir));
        prop_assert_eq!(path.file_name().unwrap().to_str().unwrap(), format!("{name}.pid"));
    }

    #[test]
    fn explicit_paths_win(explicit in "/[a-z]{1,8}/[a-z]{1,8}", name in "[a-z]{1,8}") {
        let explicit = PathBuf::from(explicit);
        let tempdir = Path::new("/tmp/x");
        prop_assert_eq!(resolve_lock_path(Some(&explicit), tempdir, &name), explicit.clone());
        prop_assert_eq!(resolve_stats_path(Some(&explicit), tempdir, &name), explicit);
    }

    #[test]
    fn lock_and_stat_files_differ(name in "[a-z][a-z0-9_]{0,12}") {
        let tempdir = Path::new("/tmp/x");
        prop_assert_ne!(
            resolve_lock_path(None, tempdir, &name),
            resolve_stats_path(None, tempdir, &name)
        );
    }

    #[test]
    fn tool_found_under_any_directory(dir in "(/[a-z]{1,8}){0,3}") {
        prop_assert_eq!(Tool::from_argv0(&format!("{dir}/runalarm")), Some(Tool::Alarm));
        prop_assert_eq!(Tool::from_argv0(&format!("{dir}/runlock")), Some(Tool::Lock));
        prop_assert_eq!(Tool::from_argv0(&format!("{dir}/runstat")), Some(Tool::Stat));
    }
}
