//! Signal-safe cleanup state, mirroring the original's global `createFlag`,
//! `mountFlag` and `mountPoint`. These have to be process-global and
//! allocator-free to be touched from a signal handler (§9 "Global mutable
//! state for signal-safe cleanup").

use std::ffi::CString;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use linglong_common::{Error, Result};

static CREATE_FLAG: AtomicBool = AtomicBool::new(false);
static MOUNT_FLAG: AtomicBool = AtomicBool::new(false);
/// Raw byte storage for the mount point path; written once, before any
/// signal handler is installed, so no runtime synchronization is needed to
/// read it from the handler.
static MOUNT_POINT: OnceLock<CString> = OnceLock::new();

const TRAPPED_SIGNALS: [c_int; 6] =
    [libc::SIGTERM, libc::SIGINT, libc::SIGQUIT, libc::SIGHUP, libc::SIGABRT, libc::SIGSEGV];

/// Records the mount point this process will clean up on exit. Must be
/// called exactly once, before [`install_signal_handlers`].
pub fn set_mount_point(path: &std::path::Path) {
    let c = CString::new(path.as_os_str().as_encoded_bytes()).expect("mount point has no NUL bytes");
    MOUNT_POINT.set(c).expect("set_mount_point called twice");
}

/// Transitions `createFlag` from false to true; returns `Err` if it was
/// already set (programming error per §4.1.9 — "double-entry is a
/// programming error and causes terminal log").
pub fn mark_created() -> Result<()> {
    CREATE_FLAG
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .map(|_| ())
        .map_err(|_| Error::contract("createFlag already set"))
}

/// Transitions `mountFlag` from false to true; see [`mark_created`].
pub fn mark_mounted() -> Result<()> {
    MOUNT_FLAG
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .map(|_| ())
        .map_err(|_| Error::contract("mountFlag already set"))
}

/// Installs the shared handler for `SIGTERM, SIGINT, SIGQUIT, SIGHUP,
/// SIGABRT, SIGSEGV` (§4.1.9). Each invokes [`clean_and_exit`] with the
/// signal number as its exit code.
pub fn install_signal_handlers() {
    for &sig in &TRAPPED_SIGNALS {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_signal as usize;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = 0;
            libc::sigaction(sig, &action, std::ptr::null_mut());
        }
    }
}

extern "C" fn handle_signal(sig: c_int) {
    // No allocation, no locale-dependent calls, no locking: only atomics,
    // raw syscalls and a pointer we already own.
    clean_resource();
    unsafe { libc::_exit(128 + sig) };
}

/// Runs the unmount+rmdir sequence once, without exiting. Used both by the
/// signal handler and by normal error paths that call [`clean_and_exit`].
fn clean_resource() {
    if MOUNT_FLAG.swap(false, Ordering::SeqCst) {
        if let Some(mount_point) = MOUNT_POINT.get() {
            unsafe {
                let pid = libc::fork();
                if pid == 0 {
                    let umount = CString::new("umount").unwrap();
                    let dash_l = CString::new("-l").unwrap();
                    let argv = [umount.as_ptr(), dash_l.as_ptr(), mount_point.as_ptr(), std::ptr::null()];
                    libc::execvp(umount.as_ptr(), argv.as_ptr());
                    libc::_exit(127);
                } else if pid > 0 {
                    let mut status = 0;
                    libc::waitpid(pid, &mut status, 0);
                }
            }
        }
    }

    if CREATE_FLAG.swap(false, Ordering::SeqCst) {
        if let Some(mount_point) = MOUNT_POINT.get() {
            unsafe {
                libc::rmdir(mount_point.as_ptr());
            }
        }
    }
}

/// `[[noreturn]]` equivalent of the original's `cleanAndExit`: unmounts (if
/// `mountFlag`), removes the mount-point directory (if `createFlag`), then
/// `_exit`s without running destructors — §4.1.9. `code` is the process exit
/// status to use as-is (a loader's `WEXITSTATUS`, `-1` on fork/exec failure,
/// `0` on success); the `128+signum` convention only applies to signals,
/// handled separately in [`handle_signal`].
pub fn clean_and_exit(code: i32) -> ! {
    clean_resource();
    unsafe { libc::_exit(code) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_flag_transitions_once() {
        CREATE_FLAG.store(false, Ordering::SeqCst);
        assert!(mark_created().is_ok());
        assert!(mark_created().is_err());
        CREATE_FLAG.store(false, Ordering::SeqCst);
    }

    #[test]
    fn mount_flag_transitions_once() {
        MOUNT_FLAG.store(false, Ordering::SeqCst);
        assert!(mark_mounted().is_ok());
        assert!(mark_mounted().is_err());
        MOUNT_FLAG.store(false, Ordering::SeqCst);
    }
}
