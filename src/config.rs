use std::time::Duration;

use sandos_vfs::VfsConfig;
use sandos_vproc::{BUCKET_BUFFER_SIZE, WAIT_MAX_RETRIES, WAIT_RETRY_INTERVAL};

/// Tunables for one virtual OS instance.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub vfs: VfsConfig,
    /// Bucket payload size for pipes created by `pipe(2)` and spawn wiring.
    pub pipe_bucket_size: usize,
    /// Interval between retries while waiting on external state (child
    /// process pipes, exit flags).
    pub wait_retry_interval: Duration,
    /// Retry bound for descriptor reads bridged to a live child process.
    pub wait_max_retries: u32,
    /// Retry bound for `waitpid`; a process outliving this fails the wait
    /// with a timeout instead of hanging the caller forever.
    pub waitpid_max_retries: u32,
    /// How long a blocking `accept`/`recv` waits before timing out.
    pub socket_timeout: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            vfs: VfsConfig::default(),
            pipe_bucket_size: BUCKET_BUFFER_SIZE,
            wait_retry_interval: WAIT_RETRY_INTERVAL,
            wait_max_retries: WAIT_MAX_RETRIES,
            waitpid_max_retries: 1200,
            socket_timeout: Duration::from_secs(30),
        }
    }
}
