use thiserror::Error;

pub type Result<T, E = NetError> = std::result::Result<T, E>;

/// Error type for the socket layer. Transport failures are translated into
/// this taxonomy at the transport boundary.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum NetError {
    #[error("invalid input")]
    InvalidInput,
    #[error("address is in use")]
    AddressInUse,
    #[error("address could not be found")]
    AddressNotAvailable,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset")]
    ConnectionReset,
    #[error("connection aborted")]
    ConnectionAborted,
    /// The socket has no established peer
    #[error("connection is not open")]
    NotConnected,
    /// A stream socket is already connected
    #[error("already connected")]
    AlreadyConnected,
    /// A previous connect on this socket is still being established
    #[error("connect already in progress")]
    Already,
    /// Transport establishment is asynchronous; poll to observe completion
    #[error("connect in progress")]
    InProgress,
    /// A datagram send needs an explicit or default destination
    #[error("destination address required")]
    DestinationRequired,
    #[error("blocking operation. try again")]
    WouldBlock,
    #[error("broken pipe (was closed)")]
    BrokenPipe,
    #[error("time out")]
    TimedOut,
    #[error("not supported")]
    Unsupported,
    #[error("io error")]
    IOError,
    #[error("unknown error found")]
    UnknownError,
}

impl From<NetError> for sandos_vfs::FsError {
    fn from(err: NetError) -> Self {
        use sandos_vfs::FsError;
        match err {
            NetError::InvalidInput => FsError::InvalidInput,
            NetError::AddressInUse => FsError::AddressInUse,
            NetError::AddressNotAvailable => FsError::AddressNotAvailable,
            NetError::ConnectionRefused => FsError::ConnectionRefused,
            NetError::ConnectionReset => FsError::ConnectionReset,
            NetError::ConnectionAborted => FsError::ConnectionAborted,
            NetError::NotConnected => FsError::NotConnected,
            NetError::AlreadyConnected => FsError::AlreadyExists,
            NetError::Already | NetError::InProgress | NetError::WouldBlock => FsError::WouldBlock,
            NetError::DestinationRequired => FsError::InvalidInput,
            NetError::BrokenPipe => FsError::BrokenPipe,
            NetError::TimedOut => FsError::TimedOut,
            NetError::Unsupported => FsError::NotSupported,
            NetError::IOError => FsError::IOError,
            NetError::UnknownError => FsError::UnknownError,
        }
    }
}
