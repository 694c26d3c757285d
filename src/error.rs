use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Describes how a record failed validation during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptKind {
    /// Fewer than a full header's bytes remained before end-of-file.
    TruncatedHeader,
    /// The header claims more payload bytes than the file holds.
    TruncatedPayload,
    /// The stored CRC-32 does not match the header bytes.
    ChecksumMismatch,
    /// `offset + header + size` does not fit in a `u64`.
    SizeOverflow,
}

impl CorruptKind {
    /// True for the damage a crash in the middle of an append leaves behind.
    pub fn is_torn_tail(self) -> bool {
        matches!(self, CorruptKind::TruncatedHeader | CorruptKind::TruncatedPayload)
    }
}

impl fmt::Display for CorruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CorruptKind::TruncatedHeader => "truncated record header",
            CorruptKind::TruncatedPayload => "truncated record payload",
            CorruptKind::ChecksumMismatch => "header checksum mismatch",
            CorruptKind::SizeOverflow => "record size overflows the archive",
        };
        f.write_str(s)
    }
}

/// The primary error type for all operations in the `flatarch` crate.
#[derive(Debug, Error)]
pub enum ArchiverError {
    /// The archive or source file does not exist.
    #[error("'{}' not found", path.display())]
    NotFound { path: PathBuf },

    /// The OS refused access to the archive, source or output file.
    #[error("permission denied on '{}'", path.display())]
    PermissionDenied { path: PathBuf },

    /// The name does not fit the fixed-capacity header field.
    #[error("name '{name}' is {len} bytes, the archive stores at most {max}")]
    NameTooLong { name: String, len: usize, max: usize },

    /// The name cannot be stored or cannot be safely extracted.
    #[error("invalid record name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The record is larger than the configured extraction ceiling.
    #[error("record '{name}' is {size} bytes, above the {limit} byte limit")]
    RecordTooLarge { name: String, size: u64, limit: u64 },

    /// The archive is torn or damaged at the given byte offset.
    #[error("corrupt archive at offset {offset}: {kind}")]
    CorruptArchive { offset: u64, kind: CorruptKind },

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: io::Error, path: PathBuf },
}

impl ArchiverError {
    /// Wraps an I/O error with the path it happened on, promoting the
    /// kinds that have a dedicated variant.
    pub fn io(path: impl AsRef<Path>, err: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound => ArchiverError::NotFound { path },
            io::ErrorKind::PermissionDenied => ArchiverError::PermissionDenied { path },
            _ => ArchiverError::Io { source: err, path },
        }
    }

    pub fn corrupt(offset: u64, kind: CorruptKind) -> Self {
        ArchiverError::CorruptArchive { offset, kind }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<io::Error> for ArchiverError {
    fn from(err: io::Error) -> Self {
        ArchiverError::Io { source: err, path: PathBuf::new() }
    }
}

pub type Result<T> = std::result::Result<T, ArchiverError>;

/// Attaches a path to any `io::Result`.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| ArchiverError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_are_classified() {
        let err = ArchiverError::io("a.txt", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, ArchiverError::NotFound { .. }));

        let err = ArchiverError::io("a.txt", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, ArchiverError::PermissionDenied { .. }));

        let err = ArchiverError::io("a.txt", io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(err, ArchiverError::Io { .. }));
    }

    #[test]
    fn torn_tail_kinds() {
        assert!(CorruptKind::TruncatedHeader.is_torn_tail());
        assert!(CorruptKind::TruncatedPayload.is_torn_tail());
        assert!(!CorruptKind::ChecksumMismatch.is_torn_tail());
        assert!(!CorruptKind::SizeOverflow.is_torn_tail());
    }
}
