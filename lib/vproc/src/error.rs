use thiserror::Error;

pub type Result<T, E = ProcError> = std::result::Result<T, E>;

/// Error type for the process bridge.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ProcError {
    /// The pid is not (or no longer) in the process table
    #[error("no such process")]
    NoSuchProcess,
    /// The host environment provides no spawn handler
    #[error("process spawning is not supported in this environment")]
    SpawnUnsupported,
    /// The spawn handler failed to produce a process
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    /// A bounded wait ran out of retries
    #[error("time out")]
    TimedOut,
    #[error("io error")]
    IOError,
}

impl From<std::io::Error> for ProcError {
    fn from(err: std::io::Error) -> Self {
        ProcError::SpawnFailed(err.to_string())
    }
}
