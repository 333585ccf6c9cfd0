//! Process-wide SIGPIPE suppression.
//!
//! A write to a pipe whose read end is gone raises SIGPIPE, whose default
//! disposition kills the whole process; with the signal ignored the write
//! returns EPIPE instead, which the pipe endpoints report as a status.
//! Binaries linked against the Rust runtime already start with SIGPIPE
//! ignored; callers embedding this crate elsewhere must invoke
//! [`ignore_sigpipe`] before touching any write end.

use std::io;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

static SIGPIPE_INIT: Once = Once::new();
static SIGPIPE_INIT_OK: AtomicBool = AtomicBool::new(false);

/// Set SIGPIPE to `SIG_IGN` for the whole process, once.
///
/// Subsequent calls are no-ops. Returns the outcome of the first attempt.
pub fn ignore_sigpipe() -> io::Result<()> {
    let mut result = Ok(());

    SIGPIPE_INIT.call_once(|| {
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = libc::SIG_IGN;
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
        }

        let ret = unsafe { libc::sigaction(libc::SIGPIPE, &action, std::ptr::null_mut()) };
        if ret == -1 {
            result = Err(io::Error::last_os_error());
        } else {
            SIGPIPE_INIT_OK.store(true, Ordering::Release);
        }
    });

    if result.is_ok() && !SIGPIPE_INIT_OK.load(Ordering::Acquire) {
        return Err(io::Error::other("SIGPIPE disposition was not installed"));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent() {
        assert!(ignore_sigpipe().is_ok());
        assert!(ignore_sigpipe().is_ok());
    }
}
