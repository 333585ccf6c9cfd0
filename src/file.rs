//! Role-typed regular-file endpoints.
//!
//! These are the sources and sinks behind `Stdio::File` and `Stdio::Null`
//! redirection: a [`FileSource`] can only be read, a [`FileSink`] can only be
//! written, and the mismatched operation does not exist. Both are plain
//! blocking I/O over regular files; the non-blocking machinery lives in
//! [`crate::pipe`].

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use crate::buf::{slice_in_bounds, ReadOutcome, WriteOutcome};
use crate::error::{IoStatus, PopenError, PopenResult};

const COPY_CHUNK: usize = 8192;

fn errno_of(err: &std::io::Error) -> IoStatus {
    IoStatus::Errno(err.raw_os_error().unwrap_or(libc::EIO))
}

/// Read-only endpoint over an existing regular file.
pub struct FileSource {
    file: File,
}

impl FileSource {
    /// Open `path` read-only. A missing path is caller misuse, not an OS
    /// error, matching the redirect-option validation in [`crate::Stdio`].
    pub fn open<P: AsRef<Path>>(path: P) -> PopenResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PopenError::InvalidArg(format!(
                "file '{}' does not exist",
                path.display()
            )));
        }
        let file = File::open(path)?;
        Ok(Self { file })
    }

    /// Pull up to `size` bytes, looping over short reads until the buffer is
    /// full or EOF. EOF before the buffer fills reports [`IoStatus::Eof`]
    /// with the partial data.
    pub fn read(&self, size: usize) -> ReadOutcome {
        if size == 0 {
            return ReadOutcome::empty(IoStatus::Ok);
        }

        let mut data = vec![0u8; size];
        let mut status = IoStatus::Ok;
        let mut total = 0usize;
        while total < size {
            match (&self.file).read(&mut data[total..]) {
                Ok(0) => {
                    status = IoStatus::Eof;
                    break;
                }
                Ok(n) => total += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    status = errno_of(&err);
                    break;
                }
            }
        }
        data.truncate(total);
        ReadOutcome { data, status }
    }
}

impl AsRawFd for FileSource {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

/// Write-only endpoint over a regular file or `/dev/null`.
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Create or truncate `path` for writing.
    pub fn create<P: AsRef<Path>>(path: P) -> PopenResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Open `/dev/null` write-only, the discard sink behind `Stdio::Null`.
    pub fn dev_null() -> PopenResult<Self> {
        let file = OpenOptions::new().write(true).open("/dev/null")?;
        Ok(Self { file })
    }

    /// Push `data[offset..offset + len]`, looping over short writes, then
    /// flush. An out-of-range slice reports [`IoStatus::InvalidArg`] with
    /// nothing written.
    pub fn write(&self, data: &[u8], offset: usize, len: usize) -> WriteOutcome {
        if !slice_in_bounds(data.len(), offset, len) {
            return WriteOutcome::none(IoStatus::InvalidArg);
        }
        if len == 0 {
            return WriteOutcome::none(IoStatus::Ok);
        }

        let mut status = IoStatus::Ok;
        let mut total = 0usize;
        while total < len {
            match (&self.file).write(&data[offset + total..offset + len]) {
                Ok(n) => total += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    status = errno_of(&err);
                    break;
                }
            }
        }
        if status.is_ok() {
            if let Err(err) = (&self.file).flush() {
                status = errno_of(&err);
            }
        }
        WriteOutcome {
            bytes_written: total,
            status,
        }
    }
}

impl AsRawFd for FileSink {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl fmt::Debug for FileSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSink")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

/// Bulk-copy a source into a sink, returning the byte count moved.
pub fn copy(source: &FileSource, sink: &FileSink) -> PopenResult<usize> {
    let mut total = 0usize;
    loop {
        let chunk = source.read(COPY_CHUNK);
        if !chunk.data.is_empty() {
            let written = sink.write(&chunk.data, 0, chunk.data.len());
            total += written.bytes_written;
            if let IoStatus::Errno(code) = written.status {
                return Err(std::io::Error::from_raw_os_error(code).into());
            }
        }
        match chunk.status {
            IoStatus::Ok => {}
            IoStatus::Eof => return Ok(total),
            IoStatus::InvalidArg => {
                return Err(PopenError::InvalidArg("copy read rejected".into()))
            }
            IoStatus::Errno(code) => {
                return Err(std::io::Error::from_raw_os_error(code).into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_with(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn missing_source_is_invalid_arg() {
        let err = FileSource::open("/definitely/not/here").unwrap_err();
        assert!(matches!(err, PopenError::InvalidArg(_)));
    }

    #[test]
    fn source_reads_to_eof_with_partial_buffer() {
        let file = temp_with(b"abcdef");
        let source = FileSource::open(file.path()).unwrap();

        let full = source.read(6);
        assert!(full.status.is_ok());
        assert_eq!(full.data, b"abcdef");

        let past_end = source.read(4);
        assert!(past_end.status.is_eof());
        assert!(past_end.data.is_empty());
    }

    #[test]
    fn sink_bounds_check() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sink = FileSink::create(file.path()).unwrap();
        let outcome = sink.write(b"abc", 1, 3);
        assert_eq!(outcome.status, IoStatus::InvalidArg);
        assert_eq!(outcome.bytes_written, 0);
    }

    #[test]
    fn copy_moves_everything() {
        let input = temp_with(b"copy me through the chunk loop");
        let output = tempfile::NamedTempFile::new().unwrap();

        let source = FileSource::open(input.path()).unwrap();
        let sink = FileSink::create(output.path()).unwrap();
        let moved = copy(&source, &sink).unwrap();

        assert_eq!(moved, 30);
        assert_eq!(std::fs::read(output.path()).unwrap(), b"copy me through the chunk loop");
    }

    #[test]
    fn dev_null_swallows_writes() {
        let sink = FileSink::dev_null().unwrap();
        let outcome = sink.write(b"gone", 0, 4);
        assert!(outcome.status.is_ok());
        assert_eq!(outcome.bytes_written, 4);
    }
}
