/*
 * tempdir.rs
 *
 * Per-user scratch directory: /tmp/cronutils-<user>. Default home for
 * runlock's .pid files and runstat's .stat files.
 *
 * /tmp is shared, so a directory that's already there gets checked before
 * we trust it: real directory (not a symlink), ours, and nobody else can
 * write into it.
 */

use std::ffi::{CStr, OsStr};
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

use crate::error::{CronError, Result};

const DEFAULT_BASE: &str = "/tmp";
const PREFIX: &str = "cronutils-";

/* passwd lookups can need more than the usual 1k for big NSS backends */
const PWBUF_START: usize = 1024;
const PWBUF_MAX: usize = 1 << 20;

/// Last path component of `command`, e.g. `backup` for `/usr/local/bin/backup`.
///
/// Used to name per-command files in the temp dir.
#[must_use]
pub fn command_basename(command: &str) -> &str {
    Path::new(command)
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or(command)
}

/// Login name for `uid`, via getpwuid_r.
pub fn username_for(uid: libc::uid_t) -> Result<String> {
    let mut buf: Vec<libc::c_char> = vec![0; PWBUF_START];
    loop {
        // SAFETY: passwd is a plain C struct, all-zero is a valid out-parameter.
        let mut pwd: libc::passwd = unsafe { core::mem::zeroed() };
        let mut found: *mut libc::passwd = core::ptr::null_mut();

        // SAFETY: pwd, buf and found are valid for the duration of the call,
        // and buf.len() is the real size of buf.
        let ret = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut found) };

        if ret == libc::ERANGE && buf.len() < PWBUF_MAX {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if ret != 0 {
            return Err(CronError::TempDir(format!("getpwuid_r: errno {ret}")));
        }
        if found.is_null() {
            return Err(CronError::UnknownUser(uid));
        }

        // SAFETY: on success pw_name points at a NUL-terminated string inside buf.
        let name = unsafe { CStr::from_ptr(pwd.pw_name) };
        return Ok(name.to_string_lossy().into_owned());
    }
}

/// `/tmp/cronutils-<user>` for the effective uid, created if missing.
pub fn make_tempdir() -> Result<PathBuf> {
    make_tempdir_in(Path::new(DEFAULT_BASE))
}

/// Same as [`make_tempdir`] but under `base` instead of `/tmp`.
pub fn make_tempdir_in(base: &Path) -> Result<PathBuf> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };

    /* containers often run as a uid with no passwd entry */
    let user = match username_for(euid) {
        Ok(name) => name,
        Err(CronError::UnknownUser(uid)) => {
            tracing::debug!(uid, "no passwd entry, naming temp dir by uid");
            uid.to_string()
        }
        Err(e) => return Err(e),
    };

    let dir = base.join(format!("{PREFIX}{user}"));
    tracing::debug!("temp dir is {}", dir.display());

    match DirBuilder::new().mode(0o700).create(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(CronError::TempDir(format!("{}: {e}", dir.display()))),
    }

    check_tempdir(&dir, euid, &user)?;
    Ok(dir)
}

/* we created it or found it; either way it has to pass before we write there */
fn check_tempdir(dir: &Path, euid: libc::uid_t, user: &str) -> Result<()> {
    let shown = dir.display();
    let meta = fs::symlink_metadata(dir).map_err(|e| CronError::TempDir(format!("{shown}: {e}")))?;

    if !meta.is_dir() {
        return Err(CronError::TempDirNotDirectory(shown.to_string()));
    }
    if meta.uid() != euid {
        return Err(CronError::TempDirInsecure(format!("{shown} is not owned by {user}")));
    }

    let mode = meta.mode() & 0o777;
    if mode & 0o700 != 0o700 || mode & 0o022 != 0 {
        return Err(CronError::TempDirInsecure(format!(
            "{shown} has insecure permissions {mode:o}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn euid() -> libc::uid_t {
        // SAFETY: geteuid has no preconditions.
        unsafe { libc::geteuid() }
    }

    #[test]
    fn test_command_basename() {
        assert_eq!(command_basename("/usr/local/bin/backup"), "backup");
        assert_eq!(command_basename("backup"), "backup");
        assert_eq!(command_basename("./jobs/rotate.sh"), "rotate.sh");
    }

    #[test]
    fn test_creates_private_dir() {
        let base = tempfile::tempdir().unwrap();
        let dir = make_tempdir_in(base.path()).unwrap();

        assert!(dir.starts_with(base.path()));
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("cronutils-"), "{name}");

        let meta = fs::metadata(&dir).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.uid(), euid());
        assert_eq!(meta.mode() & 0o077, 0, "group/other bits on fresh dir");
    }

    #[test]
    fn test_existing_dir_reused() {
        let base = tempfile::tempdir().unwrap();
        let first = make_tempdir_in(base.path()).unwrap();
        fs::write(first.join("keep"), b"x").unwrap();
        let second = make_tempdir_in(base.path()).unwrap();
        assert_eq!(first, second);
        assert!(second.join("keep").exists());
    }

    #[test]
    fn test_regular_file_rejected() {
        let base = tempfile::tempdir().unwrap();
        let dir = make_tempdir_in(base.path()).unwrap();
        fs::remove_dir(&dir).unwrap();
        fs::write(&dir, b"not a dir").unwrap();

        let err = make_tempdir_in(base.path()).unwrap_err();
        assert!(matches!(err, CronError::TempDirNotDirectory(_)), "{err:?}");
        assert_eq!(err.exit_code(), crate::exit_codes::IOERR);
    }

    #[test]
    fn test_symlink_rejected() {
        let base = tempfile::tempdir().unwrap();
        let dir = make_tempdir_in(base.path()).unwrap();
        let elsewhere = base.path().join("elsewhere");
        fs::rename(&dir, &elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, &dir).unwrap();

        let err = make_tempdir_in(base.path()).unwrap_err();
        assert!(matches!(err, CronError::TempDirNotDirectory(_)), "{err:?}");
    }

    #[test]
    fn test_world_writable_rejected() {
        let base = tempfile::tempdir().unwrap();
        let dir = make_tempdir_in(base.path()).unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o777)).unwrap();

        let err = make_tempdir_in(base.path()).unwrap_err();
        assert!(matches!(err, CronError::TempDirInsecure(_)), "{err:?}");
        assert_eq!(err.exit_code(), crate::exit_codes::NOPERM);
    }

    #[test]
    fn test_owner_without_access_rejected() {
        let base = tempfile::tempdir().unwrap();
        let dir = make_tempdir_in(base.path()).unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o500)).unwrap();

        let err = make_tempdir_in(base.path()).unwrap_err();
        assert!(matches!(err, CronError::TempDirInsecure(_)), "{err:?}");

        /* so tempfile can clean up */
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700)).unwrap();
    }

    #[test]
    fn test_foreign_owner_rejected() {
        /* chown needs root; nothing to check otherwise */
        if euid() != 0 {
            return;
        }
        let base = tempfile::tempdir().unwrap();
        let dir = make_tempdir_in(base.path()).unwrap();
        std::os::unix::fs::chown(&dir, Some(65534), None).unwrap();

        let err = make_tempdir_in(base.path()).unwrap_err();
        assert!(matches!(err, CronError::TempDirInsecure(_)), "{err:?}");
    }

    #[test]
    fn test_username_for_current_user() {
        match username_for(euid()) {
            Ok(name) => assert!(!name.is_empty()),
            Err(CronError::UnknownUser(uid)) => assert_eq!(uid, euid()),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
