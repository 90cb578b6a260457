//! The caller-facing error-number convention. Every failure crossing the
//! syscall ABI is one of these, negated; backend error types never leak
//! through.

use sandos_vfs::FsError;
use sandos_vnet::NetError;
use sandos_vproc::ProcError;

/// POSIX error numbers (the conventional Linux values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    EPERM = 1,
    ENOENT = 2,
    ESRCH = 3,
    EINTR = 4,
    EIO = 5,
    ENXIO = 6,
    EBADF = 9,
    ECHILD = 10,
    EAGAIN = 11,
    ENOMEM = 12,
    EACCES = 13,
    EFAULT = 14,
    EBUSY = 16,
    EEXIST = 17,
    EXDEV = 18,
    ENODEV = 19,
    ENOTDIR = 20,
    EISDIR = 21,
    EINVAL = 22,
    EMFILE = 24,
    ENOTTY = 25,
    ENOSPC = 28,
    ESPIPE = 29,
    EPIPE = 32,
    ENAMETOOLONG = 36,
    ENOSYS = 38,
    ENOTEMPTY = 39,
    ELOOP = 40,
    ENOTSOCK = 88,
    EDESTADDRREQ = 89,
    EPROTONOSUPPORT = 93,
    EOPNOTSUPP = 95,
    EADDRINUSE = 98,
    EADDRNOTAVAIL = 99,
    ECONNABORTED = 103,
    ECONNRESET = 104,
    EISCONN = 106,
    ENOTCONN = 107,
    ETIMEDOUT = 110,
    ECONNREFUSED = 111,
    EALREADY = 114,
    EINPROGRESS = 115,
}

impl Errno {
    /// The negative return value carried across the ABI.
    pub fn as_neg(self) -> i32 {
        -(self as i32)
    }
}

impl From<FsError> for Errno {
    fn from(err: FsError) -> Self {
        match err {
            FsError::EntryNotFound => Errno::ENOENT,
            FsError::PermissionDenied => Errno::EACCES,
            FsError::AlreadyExists => Errno::EEXIST,
            FsError::NotADirectory => Errno::ENOTDIR,
            FsError::IsADirectory => Errno::EISDIR,
            FsError::InvalidInput => Errno::EINVAL,
            FsError::TooManyOpenFiles => Errno::EMFILE,
            FsError::NoSpace => Errno::ENOSPC,
            FsError::NotSupported => Errno::EOPNOTSUPP,
            FsError::WouldBlock => Errno::EAGAIN,
            FsError::BrokenPipe => Errno::EPIPE,
            FsError::AddressInUse => Errno::EADDRINUSE,
            FsError::AddressNotAvailable => Errno::EADDRNOTAVAIL,
            FsError::ConnectionAborted => Errno::ECONNABORTED,
            FsError::ConnectionRefused => Errno::ECONNREFUSED,
            FsError::ConnectionReset => Errno::ECONNRESET,
            FsError::NotConnected => Errno::ENOTCONN,
            FsError::NameTooLong => Errno::ENAMETOOLONG,
            FsError::TooManySymlinks => Errno::ELOOP,
            FsError::DirectoryNotEmpty => Errno::ENOTEMPTY,
            FsError::CrossDevice => Errno::EXDEV,
            FsError::InvalidFd => Errno::EBADF,
            FsError::NotSeekable => Errno::ESPIPE,
            FsError::Interrupted => Errno::EINTR,
            FsError::TimedOut => Errno::ETIMEDOUT,
            FsError::Lock => Errno::EIO,
            FsError::IOError => Errno::EIO,
            FsError::UnknownError => Errno::EIO,
        }
    }
}

impl From<NetError> for Errno {
    fn from(err: NetError) -> Self {
        match err {
            NetError::InvalidInput => Errno::EINVAL,
            NetError::AddressInUse => Errno::EADDRINUSE,
            NetError::AddressNotAvailable => Errno::EADDRNOTAVAIL,
            NetError::ConnectionRefused => Errno::ECONNREFUSED,
            NetError::ConnectionReset => Errno::ECONNRESET,
            NetError::ConnectionAborted => Errno::ECONNABORTED,
            NetError::NotConnected => Errno::ENOTCONN,
            NetError::AlreadyConnected => Errno::EISCONN,
            NetError::Already => Errno::EALREADY,
            NetError::InProgress => Errno::EINPROGRESS,
            NetError::DestinationRequired => Errno::EDESTADDRREQ,
            NetError::WouldBlock => Errno::EAGAIN,
            NetError::BrokenPipe => Errno::EPIPE,
            NetError::TimedOut => Errno::ETIMEDOUT,
            NetError::Unsupported => Errno::EOPNOTSUPP,
            NetError::IOError => Errno::EIO,
            NetError::UnknownError => Errno::EIO,
        }
    }
}

impl From<ProcError> for Errno {
    fn from(err: ProcError) -> Self {
        match err {
            ProcError::NoSuchProcess => Errno::ECHILD,
            ProcError::SpawnUnsupported => Errno::EOPNOTSUPP,
            ProcError::SpawnFailed(_) => Errno::EIO,
            ProcError::TimedOut => Errno::ETIMEDOUT,
            ProcError::IOError => Errno::EIO,
        }
    }
}
