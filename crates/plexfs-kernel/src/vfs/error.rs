//! VFS error types.
//!
//! Every contract operation reports one of these kinds. Host error codes
//! are folded into the same taxonomy through a fixed table, and can be
//! folded back out for front-ends that speak errno.

use std::io;
use thiserror::Error;

/// VFS error type.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not exist.
    #[error("no such path: {0}")]
    NoSuchPath(String),

    /// Path is already occupied.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The target is already open and cannot be opened again.
    #[error("already open: {0}")]
    AlreadyOpen(String),

    /// Handle is unknown, stale, or was issued by another backend.
    #[error("invalid file handle")]
    InvalidFileHandle,

    /// Requested and actual node type differ.
    #[error("invalid file type: {0}")]
    InvalidFileType(String),

    /// Caller-supplied metadata does not fit the operation.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Path is structurally unusable.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A file binding and a directory binding would collide on one node.
    #[error("type conflict: {0}")]
    TypeConflict(String),

    /// Operation needs an open handle.
    #[error("not open")]
    NotOpen,

    /// The backend has no implementation of this operation.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Valid operation the target cannot perform.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Structurally invalid payload.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Payload could not be decoded.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Link target escapes the backend's namespace.
    #[error("malformed link: {0}")]
    MalformedLink(String),

    #[error("out of range")]
    OutOfRange,

    #[error("memory error")]
    MemoryError,

    #[error("no data")]
    NoData,

    /// Directory still has children.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Entry still has open handles.
    #[error("busy: {0}")]
    Busy(String),

    #[error("invalid user: {0}")]
    InvalidUser(String),

    #[error("invalid group: {0}")]
    InvalidGroup(String),

    /// Permission denied, and the fallback for unmapped host errors.
    #[error("invalid permissions: {0}")]
    InvalidPermissions(String),

    #[error("{0}")]
    Other(String),
}

impl FsError {
    /// Create a NoSuchPath error.
    pub fn no_such_path(path: impl Into<String>) -> Self {
        Self::NoSuchPath(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create an InvalidFileType error.
    pub fn invalid_file_type(path: impl Into<String>) -> Self {
        Self::InvalidFileType(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a TypeConflict error.
    pub fn type_conflict(path: impl Into<String>) -> Self {
        Self::TypeConflict(path.into())
    }

    /// Create a NotSupported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create an InvalidPermissions error.
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::InvalidPermissions(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Translate a host error code.
    ///
    /// Codes missing from the table collapse to `InvalidPermissions`.
    pub fn from_errno(errno: i32, context: &str) -> Self {
        let context = context.to_string();
        match errno {
            libc::ENODATA => Self::NoData,
            libc::ENOENT => Self::NoSuchPath(context),
            libc::EINVAL => Self::InvalidPath(context),
            libc::ERANGE => Self::OutOfRange,
            libc::EFAULT | libc::ENOMEM => Self::MemoryError,
            libc::EEXIST => Self::AlreadyExists(context),
            libc::EISDIR | libc::ENOTDIR => Self::InvalidFileType(context),
            libc::ENOTEMPTY => Self::DirectoryNotEmpty(context),
            libc::EBADF => Self::InvalidFileHandle,
            libc::EBUSY => Self::Busy(context),
            libc::ENOSYS => Self::NotImplemented("host syscall"),
            libc::EOPNOTSUPP => Self::NotSupported(context),
            _ => Self::InvalidPermissions(context),
        }
    }

    /// Translate an I/O error, keeping `context` (usually the path) in the
    /// message.
    pub fn from_io(err: io::Error, context: &str) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self::from_errno(errno, context),
            None => match err.kind() {
                io::ErrorKind::NotFound => Self::NoSuchPath(context.to_string()),
                io::ErrorKind::AlreadyExists => Self::AlreadyExists(context.to_string()),
                io::ErrorKind::InvalidInput => Self::InvalidPath(context.to_string()),
                io::ErrorKind::InvalidData => Self::InvalidData(err.to_string()),
                io::ErrorKind::OutOfMemory => Self::MemoryError,
                _ => Self::InvalidPermissions(format!("{context}: {err}")),
            },
        }
    }

    /// The host error code a driver front-end should report.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoData => libc::ENODATA,
            Self::NoSuchPath(_) => libc::ENOENT,
            Self::InvalidPath(_) | Self::InvalidData(_) | Self::InvalidMetadata(_) => libc::EINVAL,
            Self::OutOfRange => libc::ERANGE,
            Self::MemoryError => libc::EFAULT,
            Self::AlreadyExists(_) | Self::TypeConflict(_) => libc::EEXIST,
            Self::InvalidFileType(_) => libc::EISDIR,
            Self::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            Self::InvalidFileHandle | Self::NotOpen => libc::EBADF,
            Self::Busy(_) | Self::AlreadyOpen(_) => libc::EBUSY,
            Self::NotImplemented(_) => libc::ENOSYS,
            Self::NotSupported(_) => libc::EOPNOTSUPP,
            Self::Other(_) => libc::EIO,
            _ => libc::EPERM,
        }
    }
}

/// Fold a host I/O error into the taxonomy without path context.
impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        Self::from_io(e, "")
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        io::Error::from_raw_os_error(e.errno())
    }
}

/// VFS result type.
pub type FsResult<T> = Result<T, FsError>;
