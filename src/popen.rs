//! Child-process lifecycle: spawn, poll, wait, signal, reap.

use std::ffi::CString;
use std::fmt;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, RawFd};
use std::ptr;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::args::tokenize;
use crate::config::PopenConfig;
use crate::error::{PopenError, PopenResult, TimeoutExpired};
use crate::pipe::{PipeReader, PipeWriter};
use crate::stdio::{OutputChannel, Stdio, StdinChannel};

extern "C" {
    static environ: *const *mut libc::c_char;
}

/// Accounting for a reaped child, decoded from the `wait4` rusage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUsage {
    /// CPU time spent in user mode.
    pub user_time: Duration,
    /// CPU time spent in kernel mode.
    pub system_time: Duration,
    /// Peak resident set size, in kilobytes.
    pub max_rss_kb: i64,
}

impl ResourceUsage {
    fn from_raw(raw: &libc::rusage) -> Self {
        Self {
            user_time: timeval_to_duration(raw.ru_utime),
            system_time: timeval_to_duration(raw.ru_stime),
            max_rss_kb: raw.ru_maxrss as i64,
        }
    }
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    Duration::new(tv.tv_sec.max(0) as u64, tv.tv_usec.clamp(0, 999_999) as u32 * 1_000)
}

/// Map a raw wait status onto the exit disposition: the exit value for a
/// normal exit, the negated signal number for a signal death.
fn decode_wait_status(status: libc::c_int) -> PopenResult<i32> {
    if libc::WIFSIGNALED(status) {
        Ok(-libc::WTERMSIG(status))
    } else if libc::WIFEXITED(status) {
        Ok(libc::WEXITSTATUS(status))
    } else {
        Err(PopenError::UnknownWaitStatus(status))
    }
}

/// RAII wrapper over `posix_spawn_file_actions_t`.
struct FileActions(libc::posix_spawn_file_actions_t);

impl FileActions {
    fn new() -> io::Result<Self> {
        let mut raw = MaybeUninit::uninit();
        let ret = unsafe { libc::posix_spawn_file_actions_init(raw.as_mut_ptr()) };
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
        // SAFETY: init succeeded, the list is valid until destroy.
        Ok(Self(unsafe { raw.assume_init() }))
    }

    fn dup2(&mut self, src: RawFd, dst: RawFd) -> io::Result<()> {
        let ret = unsafe { libc::posix_spawn_file_actions_adddup2(&mut self.0, src, dst) };
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
        Ok(())
    }

    fn close(&mut self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe { libc::posix_spawn_file_actions_addclose(&mut self.0, fd) };
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
        Ok(())
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.0
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(&mut self.0);
        }
    }
}

/// A spawned child process and the parent-side ends of its redirections.
///
/// The child starts in the constructor. [`Popen::poll`] and [`Popen::wait`]
/// reap it; [`Popen::communicate`](crate::Popen::communicate) drives bulk
/// stdin/stdout/stderr transfer under an optional deadline. Dropping a
/// `Popen` whose child is still running escalates SIGTERM → SIGKILL with a
/// grace period in between.
///
/// # Examples
///
/// ```no_run
/// use procpipe::{Popen, Stdio};
///
/// # fn example() -> procpipe::PopenResult<()> {
/// let mut child = Popen::new("echo Hello", Stdio::Inherit, Stdio::Piped, Stdio::Inherit)?;
/// let result = child.communicate(&[], None)?;
/// assert_eq!(result.stdout, b"Hello\n");
/// # Ok(())
/// # }
/// ```
pub struct Popen {
    argv: Vec<String>,
    pid: libc::pid_t,
    returncode: Option<i32>,
    usage: Option<ResourceUsage>,
    pub(crate) stdin: StdinChannel,
    pub(crate) stdout: OutputChannel,
    pub(crate) stderr: OutputChannel,
    pub(crate) config: PopenConfig,
}

impl Popen {
    /// Tokenize `command`, wire the three standard streams per the given
    /// redirect choices, and spawn the child (PATH search, inherited
    /// environment).
    pub fn new(command: &str, stdin: Stdio, stdout: Stdio, stderr: Stdio) -> PopenResult<Self> {
        Self::with_config(command, stdin, stdout, stderr, PopenConfig::default())
    }

    /// [`Popen::new`] with explicit lifecycle tunables.
    pub fn with_config(
        command: &str,
        stdin: Stdio,
        stdout: Stdio,
        stderr: Stdio,
        config: PopenConfig,
    ) -> PopenResult<Self> {
        let argv = tokenize(command);
        if argv.is_empty() {
            return Err(PopenError::InvalidArg("empty command".into()));
        }

        let mut popen = Self {
            argv,
            pid: 0,
            returncode: None,
            usage: None,
            stdin: StdinChannel::resolve(stdin)?,
            stdout: OutputChannel::resolve(stdout, false)?,
            stderr: OutputChannel::resolve(stderr, true)?,
            config: config.normalized(),
        };
        popen.spawn_child()?;
        Ok(popen)
    }

    fn spawn_child(&mut self) -> PopenResult<()> {
        let c_argv = self
            .argv
            .iter()
            .map(|arg| {
                CString::new(arg.as_str())
                    .map_err(|_| PopenError::InvalidArg(format!("NUL byte in token '{arg}'")))
            })
            .collect::<PopenResult<Vec<_>>>()?;
        let mut argv_ptrs: Vec<*mut libc::c_char> = c_argv
            .iter()
            .map(|arg| arg.as_ptr() as *mut libc::c_char)
            .collect();
        argv_ptrs.push(ptr::null_mut());

        let spawn_err = |source: io::Error, cmd: String| PopenError::Spawn { cmd, source };

        let mut actions = FileActions::new().map_err(|e| spawn_err(e, self.args()))?;
        self.wire_channels(&mut actions)
            .map_err(|e| spawn_err(e, self.args()))?;

        let mut pid: libc::pid_t = 0;
        let ret = unsafe {
            libc::posix_spawnp(
                &mut pid,
                c_argv[0].as_ptr(),
                actions.as_ptr(),
                ptr::null(),
                argv_ptrs.as_ptr(),
                environ,
            )
        };
        drop(actions);
        if ret != 0 {
            return Err(spawn_err(io::Error::from_raw_os_error(ret), self.args()));
        }
        self.pid = pid;
        debug!(pid, cmd = %self.args(), "spawned child");

        // The child owns its copies now; keeping these open in the parent
        // would hold the pipes' EOF hostage and deadlock communicate.
        self.stdin.source = None;
        self.stdin.child_end = None;
        self.stdout.sink = None;
        self.stdout.child_end = None;
        self.stderr.sink = None;
        self.stderr.child_end = None;
        Ok(())
    }

    /// Queue the dup2/close list the child executes between fork and exec:
    /// each redirected stream lands on its standard descriptor, and both the
    /// child-side and parent-side spares are closed in the child.
    fn wire_channels(&self, actions: &mut FileActions) -> io::Result<()> {
        if let Some(source) = &self.stdin.source {
            actions.dup2(source.as_raw_fd(), libc::STDIN_FILENO)?;
            actions.close(source.as_raw_fd())?;
        } else if let Some(child_read) = &self.stdin.child_end {
            actions.dup2(child_read.as_raw_fd(), libc::STDIN_FILENO)?;
            actions.close(child_read.as_raw_fd())?;
            if let Some(writer) = &self.stdin.writer {
                actions.close(writer.as_raw_fd())?;
            }
        }

        for (channel, std_fd) in [
            (&self.stdout, libc::STDOUT_FILENO),
            (&self.stderr, libc::STDERR_FILENO),
        ] {
            if let Some(sink) = &channel.sink {
                actions.dup2(sink.as_raw_fd(), std_fd)?;
                actions.close(sink.as_raw_fd())?;
            } else if let Some(child_write) = &channel.child_end {
                actions.dup2(child_write.as_raw_fd(), std_fd)?;
                actions.close(child_write.as_raw_fd())?;
                if let Some(reader) = &channel.reader {
                    actions.close(reader.as_raw_fd())?;
                }
            } else if channel.merge_with_stdout {
                actions.dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO)?;
            }
        }
        Ok(())
    }

    /// Non-blocking reap. Returns the recorded exit disposition if the child
    /// has been reaped (now or earlier), `None` while it is still running.
    pub fn poll(&mut self) -> PopenResult<Option<i32>> {
        if self.returncode.is_some() {
            return Ok(self.returncode);
        }

        let mut status: libc::c_int = 0;
        let mut usage = MaybeUninit::<libc::rusage>::zeroed();
        let reaped =
            unsafe { libc::wait4(self.pid, &mut status, libc::WNOHANG, usage.as_mut_ptr()) };
        if reaped == -1 {
            return Err(io::Error::last_os_error().into());
        }
        if reaped == self.pid {
            self.returncode = Some(decode_wait_status(status)?);
            // SAFETY: wait4 filled the record it reaped into.
            self.usage = Some(ResourceUsage::from_raw(unsafe { &usage.assume_init() }));
            debug!(pid = self.pid, returncode = ?self.returncode, "reaped child");
        }
        Ok(self.returncode)
    }

    /// Block until the child is reaped, polling every
    /// [`PopenConfig::poll_interval`]. With a timeout, deadline expiry
    /// raises [`PopenError::Timeout`] and leaves the child running; cleanup
    /// is the caller's move (or the drop path's).
    pub fn wait(&mut self, timeout: Option<Duration>) -> PopenResult<i32> {
        match timeout {
            None => loop {
                if let Some(code) = self.poll()? {
                    return Ok(code);
                }
                thread::sleep(self.config.poll_interval);
            },
            Some(limit) => {
                let start = Instant::now();
                loop {
                    // Poll before the deadline check so a zero timeout still
                    // reports an already-exited child.
                    if let Some(code) = self.poll()? {
                        return Ok(code);
                    }
                    if start.elapsed() >= limit {
                        return Err(TimeoutExpired::bare(self.args(), limit).into());
                    }
                    thread::sleep(self.config.poll_interval);
                }
            }
        }
    }

    /// Deliver `signal` to the child. A no-op once the child is reaped.
    pub fn send_signal(&mut self, signal: i32) -> PopenResult<()> {
        if self.returncode.is_some() {
            return Ok(());
        }
        if unsafe { libc::kill(self.pid, signal) } == -1 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Send SIGTERM.
    pub fn terminate(&mut self) -> PopenResult<()> {
        self.send_signal(libc::SIGTERM)
    }

    /// Send SIGKILL.
    pub fn kill(&mut self) -> PopenResult<()> {
        self.send_signal(libc::SIGKILL)
    }

    /// Space-joined reconstruction of the tokenized command line.
    pub fn args(&self) -> String {
        self.argv.join(" ")
    }

    /// OS process id of the child.
    pub fn pid(&self) -> u32 {
        self.pid as u32
    }

    /// Exit disposition, once reaped: `0..=255` for a normal exit, the
    /// negated signal number for a signal death.
    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    /// Resource accounting captured at reap time.
    pub fn usage(&self) -> Option<ResourceUsage> {
        self.usage
    }

    /// Non-owning handle to the parent-side stdin write end. Expired when
    /// stdin was not piped or the controller has already closed its side.
    pub fn std_in(&self) -> Weak<PipeWriter> {
        self.stdin.writer.as_ref().map_or_else(Weak::new, Arc::downgrade)
    }

    /// Non-owning handle to the parent-side stdout read end.
    pub fn std_out(&self) -> Weak<PipeReader> {
        self.stdout.reader.as_ref().map_or_else(Weak::new, Arc::downgrade)
    }

    /// Non-owning handle to the parent-side stderr read end.
    pub fn std_err(&self) -> Weak<PipeReader> {
        self.stderr.reader.as_ref().map_or_else(Weak::new, Arc::downgrade)
    }
}

impl fmt::Debug for Popen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Popen")
            .field("pid", &self.pid)
            .field("cmd", &self.args())
            .field("returncode", &self.returncode)
            .finish()
    }
}

impl Drop for Popen {
    fn drop(&mut self) {
        // A constructor that failed before posix_spawnp leaves pid at 0;
        // wait4/kill on pid 0 would address the whole process group.
        if self.pid <= 0 {
            return;
        }
        match self.poll() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(err) => {
                warn!(pid = self.pid, %err, "status probe failed during drop");
                return;
            }
        }

        if let Err(err) = self.terminate() {
            warn!(pid = self.pid, %err, "SIGTERM failed during drop");
        }
        match self.wait(Some(self.config.terminate_grace)) {
            Ok(_) => return,
            Err(PopenError::Timeout(_)) => {}
            Err(err) => {
                warn!(pid = self.pid, %err, "wait failed during drop");
                return;
            }
        }

        warn!(pid = self.pid, "child outlived the SIGTERM grace period, sending SIGKILL");
        if let Err(err) = self.kill() {
            error!(pid = self.pid, %err, "SIGKILL failed during drop");
            return;
        }
        if let Err(err) = self.wait(Some(self.config.kill_grace)) {
            warn!(pid = self.pid, %err, "child not reaped after SIGKILL");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_status_decoding() {
        // Exit value lives in the second byte.
        assert_eq!(decode_wait_status(3 << 8).unwrap(), 3);
        assert_eq!(decode_wait_status(0).unwrap(), 0);
        // A signal death carries the signal in the low bits.
        assert_eq!(decode_wait_status(libc::SIGKILL).unwrap(), -9);
        assert_eq!(decode_wait_status(libc::SIGTERM).unwrap(), -15);
        // Stop statuses are neither exits nor signal deaths.
        assert!(matches!(
            decode_wait_status((libc::SIGSTOP << 8) | 0x7f),
            Err(PopenError::UnknownWaitStatus(_))
        ));
    }

    #[test]
    fn timeval_conversion_clamps_negative_fields() {
        let tv = libc::timeval {
            tv_sec: 2,
            tv_usec: 500_000,
        };
        assert_eq!(timeval_to_duration(tv), Duration::from_millis(2_500));

        let negative = libc::timeval {
            tv_sec: -1,
            tv_usec: -1,
        };
        assert_eq!(timeval_to_duration(negative), Duration::ZERO);
    }
}
