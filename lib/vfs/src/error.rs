use std::io;

use thiserror::Error;

pub type Result<T, E = FsError> = std::result::Result<T, E>;

/// Error type for filesystem operations.
///
/// Host and backend specific failures are translated into this taxonomy at
/// the backend boundary; nothing above the node layer ever sees a raw host
/// error.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FsError {
    /// The requested file or directory could not be found
    #[error("entity not found")]
    EntryNotFound,
    /// Caller was not allowed to perform this operation
    #[error("permission denied")]
    PermissionDenied,
    /// File exists
    #[error("file exists")]
    AlreadyExists,
    /// A path component that must be a directory is not one
    #[error("not a directory")]
    NotADirectory,
    /// Expected a file but found a directory
    #[error("is a directory")]
    IsADirectory,
    /// The provided path or argument is invalid
    #[error("invalid input")]
    InvalidInput,
    /// The descriptor table is full
    #[error("too many open files")]
    TooManyOpenFiles,
    /// No space left for the write
    #[error("no space")]
    NoSpace,
    /// The backend does not implement this operation
    #[error("not supported")]
    NotSupported,
    /// Operation would block, the caller can try again
    #[error("blocking operation. try again")]
    WouldBlock,
    /// A pipe was closed on the other side
    #[error("broken pipe (was closed)")]
    BrokenPipe,
    /// The address was in use
    #[error("address is in use")]
    AddressInUse,
    /// The address could not be found
    #[error("address could not be found")]
    AddressNotAvailable,
    /// The connection was aborted
    #[error("connection aborted")]
    ConnectionAborted,
    /// The connection request was refused
    #[error("connection refused")]
    ConnectionRefused,
    /// The connection was reset
    #[error("connection reset")]
    ConnectionReset,
    /// Could not perform the operation because there was not an open connection
    #[error("connection is not open")]
    NotConnected,
    /// A path component exceeds the name length limit
    #[error("name too long")]
    NameTooLong,
    /// Symlink resolution exceeded the depth bound
    #[error("too many levels of symbolic links")]
    TooManySymlinks,
    /// Removing or replacing a directory that still has children
    #[error("directory not empty")]
    DirectoryNotEmpty,
    /// Rename across mount boundaries
    #[error("cross-device link")]
    CrossDevice,
    /// The fd given was not usable
    #[error("invalid fd")]
    InvalidFd,
    /// Seek on a non-seekable stream
    #[error("illegal seek")]
    NotSeekable,
    /// The operation was interrupted before it could finish
    #[error("operation interrupted")]
    Interrupted,
    /// The operation did not complete within the given amount of time
    #[error("time out")]
    TimedOut,
    /// A lock was poisoned
    #[error("lock poisoned")]
    Lock,
    /// Something failed when doing IO. It may work if tried again.
    #[error("io error")]
    IOError,
    /// Some other unhandled error. If you see this, it's probably a bug.
    #[error("unknown error found")]
    UnknownError,
}

impl From<io::Error> for FsError {
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::AddrInUse => FsError::AddressInUse,
            io::ErrorKind::AddrNotAvailable => FsError::AddressNotAvailable,
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
            io::ErrorKind::ConnectionAborted => FsError::ConnectionAborted,
            io::ErrorKind::ConnectionRefused => FsError::ConnectionRefused,
            io::ErrorKind::ConnectionReset => FsError::ConnectionReset,
            io::ErrorKind::NotConnected => FsError::NotConnected,
            io::ErrorKind::BrokenPipe => FsError::BrokenPipe,
            io::ErrorKind::Interrupted => FsError::Interrupted,
            io::ErrorKind::InvalidData => FsError::IOError,
            io::ErrorKind::InvalidInput => FsError::InvalidInput,
            io::ErrorKind::NotFound => FsError::EntryNotFound,
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
            io::ErrorKind::TimedOut => FsError::TimedOut,
            io::ErrorKind::WouldBlock => FsError::WouldBlock,
            io::ErrorKind::Other => FsError::IOError,
            // if the following triggers, a new error type was added to this non-exhaustive enum
            _ => FsError::UnknownError,
        }
    }
}
