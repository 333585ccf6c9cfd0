//! Non-blocking anonymous pipe endpoints.
//!
//! [`pipe`] yields an owning reader/writer pair over a fresh kernel pipe.
//! Both descriptors are switched to non-blocking mode at construction, so a
//! single chunked [`PipeReader::read`] or [`PipeWriter::write`] call never
//! parks inside the kernel; the bulk loops ([`PipeReader::read_to_end`],
//! [`PipeWriter::write_all`]) turn the resulting EAGAIN stream into a
//! sleep-and-retry cadence that a cancel flag can interrupt.
//!
//! Endpoints are safe to share across threads: every raw syscall runs under
//! the endpoint's mutex, and bulk writes are chunked to `PIPE_BUF` so they
//! stay atomic with respect to other writers on the same descriptor.

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::buf::{slice_in_bounds, ReadOutcome, WriteOutcome};
use crate::error::IoStatus;

/// Upper bound on EINTR retries within one `read`/`write` call.
const EINTR_RETRY_LIMIT: u32 = 100;

/// Chunk granularity for the bulk loops. Writes of at most this size are
/// atomic with respect to concurrent writers on the same pipe (POSIX
/// `PIPE_BUF` guarantee).
pub const PIPE_CHUNK: usize = libc::PIPE_BUF as usize;

/// Backoff applied when the kernel buffer is empty (reads) or full (writes).
const TRANSIENT_RETRY_SLEEP: Duration = Duration::from_millis(100);

/// Set a file descriptor to non-blocking mode.
fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Shared record behind both endpoint roles: the owned descriptor and the
/// mutex that serializes raw syscalls on it.
struct PipeFd {
    fd: OwnedFd,
    io_lock: Mutex<()>,
}

impl PipeFd {
    fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            fd,
            io_lock: Mutex::new(()),
        })
    }

    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Create a bare pipe pair: `(read end, write end)`, both still blocking.
///
/// Both ends are close-on-exec: a concurrently spawned child must not
/// inherit another controller's pipe ends, or it would hold their EOF
/// hostage. The spawner's dup2 file action clears the flag on the one fd
/// the child is meant to keep.
pub(crate) fn raw_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2(2) just handed us two fresh, unowned descriptors.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Create a connected non-blocking reader/writer pair.
pub fn pipe() -> io::Result<(PipeReader, PipeWriter)> {
    let (read_end, write_end) = raw_pipe()?;
    Ok((
        PipeReader::from_owned(read_end)?,
        PipeWriter::from_owned(write_end)?,
    ))
}

/// Owning read end of an anonymous pipe, in non-blocking mode.
pub struct PipeReader {
    inner: PipeFd,
}

impl PipeReader {
    /// Wrap an existing read end, switching it to non-blocking mode.
    pub(crate) fn from_owned(fd: OwnedFd) -> io::Result<Self> {
        Ok(Self {
            inner: PipeFd::new(fd)?,
        })
    }

    /// Pull up to `size` bytes.
    ///
    /// Returns without a syscall when `size` is zero. Loops over short reads;
    /// EINTR is retried up to the limit, then surfaced. A zero-length read
    /// reports [`IoStatus::Eof`]; EAGAIN/EWOULDBLOCK surface as their errno.
    /// In every case the bytes collected so far ride along in the outcome.
    pub fn read(&self, size: usize) -> ReadOutcome {
        if size == 0 {
            return ReadOutcome::empty(IoStatus::Ok);
        }

        let mut data = vec![0u8; size];
        let mut status = IoStatus::Ok;
        let mut eintr_count = 0u32;
        let mut total = 0usize;
        while total < size {
            let n = {
                let _guard = self.inner.io_lock.lock();
                unsafe {
                    libc::read(
                        self.inner.raw(),
                        data[total..].as_mut_ptr() as *mut libc::c_void,
                        size - total,
                    )
                }
            };
            if n < 0 {
                status = IoStatus::last_os();
                if status.is_interrupted() {
                    eintr_count += 1;
                    if eintr_count <= EINTR_RETRY_LIMIT {
                        continue;
                    }
                }
                break;
            } else if n == 0 {
                status = IoStatus::Eof;
                break;
            }
            total += n as usize;
        }
        data.truncate(total);
        ReadOutcome { data, status }
    }

    /// Drain the pipe until EOF, a terminal error, or cancellation.
    ///
    /// Transient states (EINTR, EAGAIN, EWOULDBLOCK) sleep 100ms and retry,
    /// keeping any partial bytes. The cancel flag is consulted at the top of
    /// each iteration; an expired flag returns the accumulation with
    /// [`IoStatus::Ok`]. Blocking call; run it on a worker thread when the
    /// producer's rate is unknown.
    pub fn read_to_end(&self, cancel: Option<&AtomicBool>) -> ReadOutcome {
        let mut out = ReadOutcome::empty(IoStatus::Ok);
        loop {
            if cancel.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                break;
            }

            let mut chunk = self.read(PIPE_CHUNK);
            match chunk.status {
                IoStatus::Ok => out.data.append(&mut chunk.data),
                IoStatus::Eof => {
                    out.data.append(&mut chunk.data);
                    break;
                }
                status if status.is_transient() => {
                    out.data.append(&mut chunk.data);
                    thread::sleep(TRANSIENT_RETRY_SLEEP);
                }
                status => {
                    out.status = status;
                    break;
                }
            }
        }
        out
    }
}

impl AsRawFd for PipeReader {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.raw()
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeReader")
            .field("fd", &self.inner.raw())
            .finish()
    }
}

/// Owning write end of an anonymous pipe, in non-blocking mode.
pub struct PipeWriter {
    inner: PipeFd,
}

impl PipeWriter {
    /// Wrap an existing write end, switching it to non-blocking mode.
    pub(crate) fn from_owned(fd: OwnedFd) -> io::Result<Self> {
        Ok(Self {
            inner: PipeFd::new(fd)?,
        })
    }

    /// Push `data[offset..offset + len]` into the pipe.
    ///
    /// An out-of-range slice reports [`IoStatus::InvalidArg`] with zero bytes
    /// written and no syscall issued, as does `len == 0` with [`IoStatus::Ok`].
    /// EINTR is retried up to the limit; EPIPE and every other errno surface
    /// with the count written so far. SIGPIPE handling is the process's
    /// responsibility (see [`crate::ignore_sigpipe`]).
    pub fn write(&self, data: &[u8], offset: usize, len: usize) -> WriteOutcome {
        if !slice_in_bounds(data.len(), offset, len) {
            return WriteOutcome::none(IoStatus::InvalidArg);
        }
        if len == 0 {
            return WriteOutcome::none(IoStatus::Ok);
        }

        let mut status = IoStatus::Ok;
        let mut eintr_count = 0u32;
        let mut total = 0usize;
        while total < len {
            let n = {
                let _guard = self.inner.io_lock.lock();
                unsafe {
                    libc::write(
                        self.inner.raw(),
                        data[offset + total..].as_ptr() as *const libc::c_void,
                        len - total,
                    )
                }
            };
            if n < 0 {
                status = IoStatus::last_os();
                if status.is_interrupted() {
                    eintr_count += 1;
                    if eintr_count <= EINTR_RETRY_LIMIT {
                        continue;
                    }
                }
                break;
            }
            total += n as usize;
        }
        WriteOutcome {
            bytes_written: total,
            status,
        }
    }

    /// Push everything from `offset` to the end of `data`, in chunks of at
    /// most [`PIPE_CHUNK`] so each chunk stays atomic against concurrent
    /// writers. Transient states sleep 100ms and retry; terminal states
    /// (EPIPE included) return immediately. The cancel flag is consulted
    /// before each chunk, and the count always reflects actual syscall
    /// returns.
    pub fn write_all(&self, data: &[u8], offset: usize, cancel: Option<&AtomicBool>) -> WriteOutcome {
        if offset > data.len() {
            return WriteOutcome::none(IoStatus::InvalidArg);
        }

        let mut out = WriteOutcome::none(IoStatus::Ok);
        let remaining = data.len() - offset;
        while out.bytes_written < remaining {
            if cancel.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                break;
            }

            let len = PIPE_CHUNK.min(remaining - out.bytes_written);
            let written = self.write(data, offset + out.bytes_written, len);
            out.bytes_written += written.bytes_written;
            match written.status {
                IoStatus::Ok => {}
                status if status.is_transient() => thread::sleep(TRANSIENT_RETRY_SLEEP),
                status => {
                    out.status = status;
                    break;
                }
            }
        }
        out
    }
}

impl AsRawFd for PipeWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.raw()
    }
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeWriter")
            .field("fd", &self.inner.raw())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_round_trip() {
        let (reader, writer) = pipe().unwrap();
        let payload = b"hello";
        let written = writer.write(payload, 0, payload.len());
        assert!(written.status.is_ok());
        assert_eq!(written.bytes_written, payload.len());

        let read = reader.read(payload.len());
        assert!(read.status.is_ok());
        assert_eq!(read.data, payload);
    }

    #[test]
    fn zero_size_transfers_skip_syscalls() {
        let (reader, writer) = pipe().unwrap();
        let written = writer.write(b"hello", 0, 0);
        assert!(written.status.is_ok());
        assert_eq!(written.bytes_written, 0);

        let read = reader.read(0);
        assert!(read.status.is_ok());
        assert!(read.data.is_empty());
    }

    #[test]
    fn out_of_range_write_is_invalid_arg() {
        let (_reader, writer) = pipe().unwrap();
        let outcome = writer.write(b"abc", 2, 2);
        assert_eq!(outcome.status, IoStatus::InvalidArg);
        assert_eq!(outcome.bytes_written, 0);
    }

    #[test]
    fn empty_pipe_reports_would_block() {
        let (reader, _writer) = pipe().unwrap();
        let read = reader.read(16);
        assert!(read.status.is_transient(), "got {:?}", read.status);
        assert!(read.data.is_empty());
    }

    #[test]
    fn partial_read_surfaces_would_block_with_data() {
        let (reader, writer) = pipe().unwrap();
        let written = writer.write(b"abc", 0, 3);
        assert_eq!(written.bytes_written, 3);

        // Asking for more than is buffered: partial data rides along with
        // the transient status so the caller can decide to retry.
        let read = reader.read(16);
        assert_eq!(read.data, b"abc");
        assert!(read.status.is_transient());
    }
}
