//! Error types for file engines and save sessions.

use std::fmt;
use std::path::PathBuf;

use crate::OpenMode;

/// Coarse classification of a failed engine operation.
///
/// Together with the message of an [`EngineError`] this forms the
/// `(kind, message)` pair callers inspect after a failure.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileError {
    /// Reading failed.
    Read,
    /// Writing failed, including short writes.
    Write,
    /// Unrecoverable failure.
    Fatal,
    /// Out of a resource (memory, descriptors, disk space).
    Resource,
    /// A handle could not be created or opened.
    Open,
    /// The operation was aborted.
    Abort,
    /// The operation timed out.
    TimeOut,
    /// The backend failed without classifying the failure.
    Unspecified,
    /// Removal failed.
    Remove,
    /// Renaming failed.
    Rename,
    /// Seeking failed.
    Position,
    /// Resizing failed.
    Resize,
    /// A permission check failed.
    Permissions,
    /// Copying failed.
    Copy,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileError::Read => "read error",
            FileError::Write => "write error",
            FileError::Fatal => "fatal error",
            FileError::Resource => "resource error",
            FileError::Open => "open error",
            FileError::Abort => "aborted",
            FileError::TimeOut => "timed out",
            FileError::Unspecified => "unspecified error",
            FileError::Remove => "remove error",
            FileError::Rename => "rename error",
            FileError::Position => "position error",
            FileError::Resize => "resize error",
            FileError::Permissions => "permission error",
            FileError::Copy => "copy error",
        };
        f.write_str(label)
    }
}

/// Error returned by engine operations and save sessions.
///
/// Every variant carries its [`FileError`] kind (see [`kind`](Self::kind)) and
/// renders a human readable message through `Display`.
///
/// # Examples
///
/// ```rust
/// use anyfs_engine::{EngineError, FileError};
///
/// let err = EngineError::NotSupported { operation: "seek" };
/// assert_eq!(err.kind(), FileError::Unspecified);
/// assert_eq!(err.to_string(), "operation not supported: seek");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The backend does not implement this operation.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: &'static str,
    },

    /// An underlying I/O operation failed.
    #[error("{operation} failed for {}: {message}", path.display())]
    Io {
        /// Classification of the failure.
        kind: FileError,
        /// The operation that failed.
        operation: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The OS-level error kind, when one was reported.
        io_kind: Option<std::io::ErrorKind>,
        /// Text of the underlying error.
        message: String,
    },

    /// The destination exists but may not be written.
    #[error("existing file {} is not writable", path.display())]
    NotWritable {
        /// The destination path.
        path: PathBuf,
    },

    /// The destination is a directory.
    #[error("filename refers to a directory: {}", path.display())]
    IsADirectory {
        /// The destination path.
        path: PathBuf,
    },

    /// The destination can only be written in place and the caller did not
    /// opt into the direct-write fallback.
    #[error("cannot open {} without direct write fallback enabled", path.display())]
    DirectWriteFallbackDisabled {
        /// The destination path.
        path: PathBuf,
    },

    /// The open mode is missing a write intent or combines unsupported flags.
    #[error("unsupported open mode: {mode:?}")]
    UnsupportedOpenMode {
        /// The rejected mode.
        mode: OpenMode,
    },

    /// A write transferred fewer bytes than requested.
    #[error("short write: {written} of {requested} bytes")]
    WriteFailed {
        /// Bytes actually accepted.
        written: usize,
        /// Bytes the caller asked to write.
        requested: usize,
    },

    /// The application canceled the save.
    #[error("writing canceled by application")]
    Canceled,

    /// Nothing could be read.
    #[error("no data available")]
    EndOfData,

    /// The engine or session is not open.
    #[error("device not open")]
    NotOpen,
}

impl EngineError {
    /// Build an [`EngineError::Io`] from an I/O error with context.
    pub fn io(
        kind: FileError,
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: &std::io::Error,
    ) -> Self {
        EngineError::Io {
            kind,
            operation,
            path: path.into(),
            io_kind: Some(source.kind()),
            message: source.to_string(),
        }
    }

    /// The classification of this error.
    pub fn kind(&self) -> FileError {
        match self {
            EngineError::NotSupported { .. } => FileError::Unspecified,
            EngineError::Io { kind, .. } => *kind,
            EngineError::NotWritable { .. } => FileError::Permissions,
            EngineError::IsADirectory { .. } => FileError::Write,
            EngineError::DirectWriteFallbackDisabled { .. } => FileError::Open,
            EngineError::UnsupportedOpenMode { .. } => FileError::Open,
            EngineError::WriteFailed { .. } => FileError::Write,
            EngineError::Canceled => FileError::Write,
            EngineError::EndOfData => FileError::Read,
            EngineError::NotOpen => FileError::Unspecified,
        }
    }

    /// The message half of the `(kind, message)` pair.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Returns `true` if the OS refused access.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            EngineError::Io {
                io_kind: Some(std::io::ErrorKind::PermissionDenied),
                ..
            }
        )
    }

    /// Replace an [`FileError::Unspecified`] kind with `kind`.
    pub(crate) fn classify_unspecified(self, kind: FileError) -> Self {
        match self {
            EngineError::Io {
                kind: FileError::Unspecified,
                operation,
                path,
                io_kind,
                message,
            } => EngineError::Io {
                kind,
                operation,
                path,
                io_kind,
                message,
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::AlreadyExists => FileError::Open,
            std::io::ErrorKind::PermissionDenied => FileError::Permissions,
            std::io::ErrorKind::WriteZero => FileError::Write,
            std::io::ErrorKind::UnexpectedEof => FileError::Read,
            std::io::ErrorKind::OutOfMemory => FileError::Resource,
            std::io::ErrorKind::TimedOut => FileError::TimeOut,
            _ => FileError::Unspecified,
        };
        EngineError::Io {
            kind,
            operation: "io",
            path: PathBuf::new(),
            io_kind: Some(error.kind()),
            message: error.to_string(),
        }
    }
}

impl From<EngineError> for std::io::Error {
    fn from(error: EngineError) -> Self {
        let kind = match &error {
            EngineError::Io {
                io_kind: Some(kind),
                ..
            } => *kind,
            EngineError::NotSupported { .. } => std::io::ErrorKind::Unsupported,
            EngineError::NotWritable { .. } => std::io::ErrorKind::PermissionDenied,
            EngineError::WriteFailed { .. } => std::io::ErrorKind::WriteZero,
            EngineError::EndOfData => std::io::ErrorKind::UnexpectedEof,
            EngineError::UnsupportedOpenMode { .. } => std::io::ErrorKind::InvalidInput,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, error)
    }
}
