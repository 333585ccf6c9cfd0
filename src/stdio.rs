//! Redirect choices for the child's standard streams and their spawn-time
//! resolution into concrete descriptors.

use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{PopenError, PopenResult};
use crate::file::{FileSink, FileSource};
use crate::pipe::{raw_pipe, PipeReader, PipeWriter};

/// Where one of the child's standard streams should be connected.
///
/// `MergeWithStdout` is only meaningful for stderr ("send stderr wherever
/// stdout goes"); `Null` and `MergeWithStdout` are rejected for stdin, which
/// has no discard or merge semantics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Stdio {
    /// Leave the stream connected to the parent's descriptor.
    #[default]
    Inherit,
    /// Connect the stream to an anonymous pipe whose parent-side end the
    /// controller keeps.
    Piped,
    /// Feed stdin from, or send output to, the named regular file.
    File(PathBuf),
    /// Discard output into `/dev/null`.
    Null,
    /// Stderr only: duplicate the child's stdout descriptor onto stderr.
    MergeWithStdout,
}

/// Resolved stdin wiring. The child end and the source file exist only
/// between resolution and spawn; the parent keeps the pipe write end.
pub(crate) struct StdinChannel {
    pub(crate) source: Option<FileSource>,
    pub(crate) child_end: Option<OwnedFd>,
    pub(crate) writer: Option<Arc<PipeWriter>>,
}

impl StdinChannel {
    fn unwired() -> Self {
        Self {
            source: None,
            child_end: None,
            writer: None,
        }
    }

    pub(crate) fn resolve(choice: Stdio) -> PopenResult<Self> {
        match choice {
            Stdio::Inherit => Ok(Self::unwired()),
            Stdio::File(path) => Ok(Self {
                source: Some(FileSource::open(path)?),
                ..Self::unwired()
            }),
            Stdio::Piped => {
                let (child_read, parent_write) = raw_pipe()?;
                Ok(Self {
                    source: None,
                    child_end: Some(child_read),
                    writer: Some(Arc::new(PipeWriter::from_owned(parent_write)?)),
                })
            }
            Stdio::Null | Stdio::MergeWithStdout => Err(PopenError::InvalidArg(format!(
                "{choice:?} is not a valid stdin redirect"
            ))),
        }
    }
}

/// Resolved stdout/stderr wiring. The child end and the sink file exist only
/// between resolution and spawn; the parent keeps the pipe read end.
pub(crate) struct OutputChannel {
    pub(crate) sink: Option<FileSink>,
    pub(crate) child_end: Option<OwnedFd>,
    pub(crate) reader: Option<Arc<PipeReader>>,
    pub(crate) merge_with_stdout: bool,
}

impl OutputChannel {
    fn unwired() -> Self {
        Self {
            sink: None,
            child_end: None,
            reader: None,
            merge_with_stdout: false,
        }
    }

    pub(crate) fn resolve(choice: Stdio, allow_merge: bool) -> PopenResult<Self> {
        match choice {
            Stdio::Inherit => Ok(Self::unwired()),
            Stdio::File(path) => Ok(Self {
                sink: Some(FileSink::create(path)?),
                ..Self::unwired()
            }),
            Stdio::Null => Ok(Self {
                sink: Some(FileSink::dev_null()?),
                ..Self::unwired()
            }),
            Stdio::Piped => {
                let (parent_read, child_write) = raw_pipe()?;
                Ok(Self {
                    reader: Some(Arc::new(PipeReader::from_owned(parent_read)?)),
                    child_end: Some(child_write),
                    ..Self::unwired()
                })
            }
            Stdio::MergeWithStdout if allow_merge => Ok(Self {
                merge_with_stdout: true,
                ..Self::unwired()
            }),
            Stdio::MergeWithStdout => Err(PopenError::InvalidArg(
                "merge-with-stdout is only valid for stderr".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_rejects_output_only_options() {
        assert!(matches!(
            StdinChannel::resolve(Stdio::Null),
            Err(PopenError::InvalidArg(_))
        ));
        assert!(matches!(
            StdinChannel::resolve(Stdio::MergeWithStdout),
            Err(PopenError::InvalidArg(_))
        ));
    }

    #[test]
    fn stdout_rejects_merge() {
        assert!(matches!(
            OutputChannel::resolve(Stdio::MergeWithStdout, false),
            Err(PopenError::InvalidArg(_))
        ));
        let stderr = OutputChannel::resolve(Stdio::MergeWithStdout, true).unwrap();
        assert!(stderr.merge_with_stdout);
    }

    #[test]
    fn piped_stdin_keeps_parent_write_end() {
        let chan = StdinChannel::resolve(Stdio::Piped).unwrap();
        assert!(chan.child_end.is_some());
        assert!(chan.writer.is_some());
        assert!(chan.source.is_none());
    }

    #[test]
    fn piped_output_keeps_parent_read_end() {
        let chan = OutputChannel::resolve(Stdio::Piped, false).unwrap();
        assert!(chan.child_end.is_some());
        assert!(chan.reader.is_some());
        assert!(chan.sink.is_none());
    }
}
