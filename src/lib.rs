//! Process control with pipe redirection and deadline-bounded transfer.
//!
//! This crate spawns an external command, connects its three standard
//! streams to caller-chosen endpoints (inherit, regular file, anonymous
//! pipe, `/dev/null`, or a stderr-into-stdout merge), and coordinates bulk
//! bidirectional byte transfer with the running child under an optional
//! deadline.
//!
//! # Overview
//!
//! The main types are:
//!
//! - [`Popen`]: spawns and owns a child process; poll, wait, signal, reap
//! - [`Stdio`]: per-stream redirect choice resolved at spawn time
//! - [`Communicated`]: the result of a full [`Popen::communicate`] exchange
//! - [`PipeReader`] / [`PipeWriter`]: non-blocking anonymous-pipe endpoints
//! - [`FileSource`] / [`FileSink`]: role-typed regular-file endpoints
//!
//! # Examples
//!
//! Capture a command's output:
//!
//! ```no_run
//! use procpipe::{Popen, Stdio};
//!
//! # fn example() -> procpipe::PopenResult<()> {
//! let mut child = Popen::new("echo Hello", Stdio::Inherit, Stdio::Piped, Stdio::Inherit)?;
//! let result = child.communicate(&[], None)?;
//! assert_eq!(result.stdout, b"Hello\n");
//! # Ok(())
//! # }
//! ```
//!
//! Feed stdin and read it back, bounded by a deadline:
//!
//! ```no_run
//! use std::time::Duration;
//! use procpipe::{Popen, PopenError, Stdio};
//!
//! # fn example() -> procpipe::PopenResult<()> {
//! let mut child = Popen::new("cat", Stdio::Piped, Stdio::Piped, Stdio::Inherit)?;
//! match child.communicate(b"Hello from stdin", Some(Duration::from_secs(5))) {
//!     Ok(result) => assert_eq!(result.stdout, b"Hello from stdin"),
//!     Err(PopenError::Timeout(expired)) => {
//!         // Partial output rides along; the child is still running.
//!         let _ = expired.stdout;
//!         child.kill()?;
//!         child.wait(None)?;
//!     }
//!     Err(other) => return Err(other),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A [`PopenError::Timeout`] from [`Popen::communicate`] is recoverable:
//! inspect the partial data, then kill and reap. Dropping a [`Popen`] whose
//! child is alive escalates SIGTERM → SIGKILL automatically.

mod args;
mod buf;
mod comm;
mod config;
mod error;
mod file;
mod pipe;
mod popen;
mod signal;
mod stdio;

pub use buf::{ReadOutcome, WriteOutcome};
pub use comm::Communicated;
pub use config::PopenConfig;
pub use error::{IoStatus, PopenError, PopenResult, TimeoutExpired};
pub use file::{copy, FileSink, FileSource};
pub use pipe::{pipe, PipeReader, PipeWriter, PIPE_CHUNK};
pub use popen::{Popen, ResourceUsage};
pub use signal::ignore_sigpipe;
pub use stdio::Stdio;
