//! Bulk bidirectional transfer with a running child.
//!
//! `communicate` drives up to three worker threads: a stdin feeder and one
//! drainer per captured output stream. The child's production and
//! consumption rates are unknown, and running the flows concurrently is
//! what breaks the classic pipeline deadlock: a parent that wrote all input
//! before reading output would block on a full stdin pipe while the child
//! blocks on a full stdout pipe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{IoStatus, PopenError, PopenResult, TimeoutExpired};
use crate::pipe::{PipeReader, PipeWriter};
use crate::popen::Popen;

/// What [`Popen::communicate`] accumulated by the time the child exited.
#[derive(Debug, PartialEq, Eq)]
pub struct Communicated {
    /// Bytes actually fed to the child's stdin.
    pub bytes_written: usize,
    /// Everything captured from the stdout pipe, in kernel delivery order.
    pub stdout: Vec<u8>,
    /// Everything captured from the stderr pipe, in kernel delivery order.
    pub stderr: Vec<u8>,
}

/// Feed `input` into the child's stdin in atomic-sized chunks, then close
/// the write end so the child sees EOF. Returns the count of bytes the
/// kernel accepted; a broken pipe just means the child stopped reading.
fn feed_stdin(writer: Arc<PipeWriter>, input: &[u8], cancel: &AtomicBool) -> usize {
    let outcome = writer.write_all(input, 0, Some(cancel));
    match outcome.status {
        status if status.is_broken_pipe() => {
            debug!(bytes_written = outcome.bytes_written, "child closed stdin early");
        }
        IoStatus::Errno(code) => {
            warn!(code, bytes_written = outcome.bytes_written, "stdin feed aborted");
        }
        _ => {}
    }
    drop(writer);
    outcome.bytes_written
}

/// Drain one output pipe into a worker-local accumulator until EOF, a
/// terminal error, or cancellation.
fn drain_output(reader: Arc<PipeReader>, cancel: &AtomicBool, stream: &'static str) -> Vec<u8> {
    let outcome = reader.read_to_end(Some(cancel));
    if let IoStatus::Errno(code) = outcome.status {
        warn!(stream, code, captured = outcome.data.len(), "output drain aborted");
    }
    outcome.data
}

impl Popen {
    /// Feed `input` to the child's stdin and capture its piped stdout and
    /// stderr until the child exits or the deadline passes.
    ///
    /// On a normal exit the full accumulation comes back as a
    /// [`Communicated`]. On deadline expiry the workers are cancelled,
    /// joined, and their partial accumulations travel inside the
    /// [`TimeoutExpired`] (the child itself is left running; see
    /// [`Popen::wait`]). The caller decides between [`Popen::kill`] and
    /// patience.
    ///
    /// Passing non-empty `input` without a piped stdin is caller misuse.
    /// With empty `input`, a piped stdin is closed immediately so the child
    /// sees EOF. Either way the controller gives up its parent-side pipe
    /// handles: the stream observers report expired afterwards.
    pub fn communicate(
        &mut self,
        input: &[u8],
        timeout: Option<Duration>,
    ) -> PopenResult<Communicated> {
        if !input.is_empty() && self.stdin.writer.is_none() {
            return Err(PopenError::InvalidArg(
                "stdin is not piped; cannot feed input".into(),
            ));
        }

        let stdin_writer = self.stdin.writer.take();
        let stdout_reader = self.stdout.reader.take();
        let stderr_reader = self.stderr.reader.take();

        let cancel = AtomicBool::new(false);

        // wait() needs `&mut self` while the workers run, so everything is
        // joined before the scope hands its pieces back.
        let (wait_result, bytes_written, stdout_data, stderr_data) = thread::scope(|scope| {
            let feeder = if input.is_empty() {
                drop(stdin_writer);
                None
            } else {
                let writer = stdin_writer.expect("presence checked above");
                Some(scope.spawn(|| feed_stdin(writer, input, &cancel)))
            };
            let stdout_worker =
                stdout_reader.map(|reader| scope.spawn(|| drain_output(reader, &cancel, "stdout")));
            let stderr_worker =
                stderr_reader.map(|reader| scope.spawn(|| drain_output(reader, &cancel, "stderr")));

            let wait_result = self.wait(timeout);
            if wait_result.is_err() {
                // Deadline (or a wait failure): ask the workers to surface
                // what they have instead of riding the pipes to EOF.
                cancel.store(true, Ordering::Release);
            }

            let bytes_written = feeder.map(|h| h.join().expect("stdin feeder panicked"));
            let stdout_data = stdout_worker.map(|h| h.join().expect("stdout drainer panicked"));
            let stderr_data = stderr_worker.map(|h| h.join().expect("stderr drainer panicked"));
            (wait_result, bytes_written, stdout_data, stderr_data)
        });

        match wait_result {
            Ok(_) => Ok(Communicated {
                bytes_written: bytes_written.unwrap_or(0),
                stdout: stdout_data.unwrap_or_default(),
                stderr: stderr_data.unwrap_or_default(),
            }),
            Err(PopenError::Timeout(bare)) => Err(TimeoutExpired {
                cmd: bare.cmd,
                timeout: bare.timeout,
                bytes_written,
                stdout: stdout_data,
                stderr: stderr_data,
            }
            .into()),
            Err(other) => Err(other),
        }
    }
}
