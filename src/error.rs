use std::fmt::{Display, Formatter};
use std::io;
use std::time::Duration;

/// Outcome tag attached to every pipe or file transfer.
///
/// `Read`/`write` never fail by themselves; they report one of these states
/// alongside whatever bytes moved. `Eof` is a loop terminator, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The operation moved bytes (possibly fewer than requested).
    Ok,
    /// The peer closed its end; no further bytes will arrive.
    Eof,
    /// Caller misuse: out-of-range slice, wrong redirect option.
    InvalidArg,
    /// A syscall failed with the given errno.
    Errno(i32),
}

impl IoStatus {
    /// Capture the calling thread's current errno.
    pub(crate) fn last_os() -> Self {
        IoStatus::Errno(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, IoStatus::Ok)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, IoStatus::Eof)
    }

    /// EINTR: the syscall was interrupted before moving any bytes.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, IoStatus::Errno(code) if *code == libc::EINTR)
    }

    /// Worth a sleep-and-retry: EINTR, EAGAIN, EWOULDBLOCK.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IoStatus::Errno(code)
                if *code == libc::EINTR || *code == libc::EAGAIN || *code == libc::EWOULDBLOCK
        )
    }

    /// EPIPE: the read end is gone; further writes are pointless.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, IoStatus::Errno(code) if *code == libc::EPIPE)
    }
}

impl Display for IoStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IoStatus::Ok => write!(f, "ok"),
            IoStatus::Eof => write!(f, "eof"),
            IoStatus::InvalidArg => write!(f, "invalid argument"),
            IoStatus::Errno(code) => {
                write!(f, "{}", io::Error::from_raw_os_error(*code))
            }
        }
    }
}

/// A specialized error type for process-control operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PopenError {
    /// Caller misuse: empty command, disallowed redirect, NUL in a token.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    /// The child could not be spawned.
    #[error("failed to spawn '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: io::Error,
    },
    /// A wait or signal syscall failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A deadline elapsed; partial results may be attached.
    #[error(transparent)]
    Timeout(#[from] TimeoutExpired),
    /// The reaper observed a wait status that is neither an exit nor a signal.
    #[error("unrecognized wait status {0:#x}")]
    UnknownWaitStatus(i32),
}

/// A specialized result type for process-control operations.
pub type PopenResult<T> = Result<T, PopenError>;

/// Deadline expiry, carrying whatever the workers had accumulated.
///
/// Raised by [`Popen::wait`](crate::Popen::wait) with an empty payload and by
/// [`Popen::communicate`](crate::Popen::communicate) with the partial stdin
/// count and captured output. The child is still running when this surfaces;
/// terminating it is the caller's decision.
#[derive(Debug, thiserror::Error)]
#[error("command '{cmd}' timed out after {}s", .timeout.as_secs_f64())]
pub struct TimeoutExpired {
    /// Space-joined reconstruction of the command line.
    pub cmd: String,
    /// The deadline that elapsed.
    pub timeout: Duration,
    /// Bytes fed to the child's stdin before expiry, when a feeder ran.
    pub bytes_written: Option<usize>,
    /// Stdout captured before expiry, when a drainer ran.
    pub stdout: Option<Vec<u8>>,
    /// Stderr captured before expiry, when a drainer ran.
    pub stderr: Option<Vec<u8>>,
}

impl TimeoutExpired {
    pub(crate) fn bare(cmd: String, timeout: Duration) -> Self {
        Self {
            cmd,
            timeout,
            bytes_written: None,
            stdout: None,
            stderr: None,
        }
    }
}
