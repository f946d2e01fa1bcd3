/*
 * lock_wait.rs
 *
 * A lock wait interrupted by some unrelated signal goes back to waiting.
 * Only the expired flag ends it early.
 *
 * Runs without the libtest harness: SIGALRM and SIGUSR1 are sent to the
 * process, and with a single thread they can only land on the one blocked
 * in fcntl. Under the harness another thread could take them and the
 * wait would never see EINTR.
 */

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cronutils::signal::install_handler;
use cronutils::{CronError, Signal, acquire_lock};

const WAIT_BOUND_SECS: u32 = 3;

static USR1_SEEN: AtomicBool = AtomicBool::new(false);

extern "C" fn note_usr1(_sig: i32) {
    USR1_SEEN.store(true, Ordering::SeqCst);
}

/* another runlock holds `lock` until we kill it */
fn hold_lock(lock: &Path) -> Child {
    let holder = Command::new(env!("CARGO_BIN_EXE_runlock"))
        .args(["-f", lock.to_str().unwrap(), "sleep", "30"])
        .stdin(Stdio::null())
        .spawn()
        .unwrap();

    let expected = format!("{}\n", holder.id());
    let deadline = Instant::now() + Duration::from_secs(10);
    while std::fs::read_to_string(lock).ok().as_deref() != Some(expected.as_str()) {
        assert!(Instant::now() < deadline, "holder never took the lock");
        std::thread::sleep(Duration::from_millis(10));
    }
    holder
}

fn interrupted_wait_still_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let lock = dir.path().join("job.lock");
    let mut holder = hold_lock(&lock);

    let saved = install_handler(Signal::SIGUSR1, note_usr1, &[]).unwrap();
    let mut poker = Command::new("sh")
        .args(["-c", &format!("sleep 1; kill -USR1 {}", std::process::id())])
        .spawn()
        .unwrap();

    let start = Instant::now();
    let result = acquire_lock(&lock, WAIT_BOUND_SECS);
    let waited = start.elapsed();

    let _ = poker.wait();
    saved.restore().unwrap();

    // SAFETY: holder is our own child.
    unsafe { libc::kill(i32::try_from(holder.id()).unwrap(), libc::SIGTERM) };
    let holder_status = holder.wait().unwrap();

    assert!(USR1_SEEN.load(Ordering::SeqCst), "SIGUSR1 never arrived");
    assert!(
        matches!(result, Err(CronError::LockTimedOut(WAIT_BOUND_SECS))),
        "{result:?}"
    );
    assert_eq!(result.unwrap_err().exit_code(), 73);
    assert!(
        waited >= Duration::from_millis(2900),
        "gave up after {waited:?}, before the full bound"
    );
    assert!(waited < Duration::from_secs(10), "waited {waited:?}");
    assert_eq!(holder_status.signal(), Some(libc::SIGTERM));
}

fn main() {
    print!("test interrupted_wait_still_times_out ... ");
    interrupted_wait_still_times_out();
    println!("ok");
}
