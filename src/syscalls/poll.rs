//! Readiness syscalls and the explicit sleep.

use std::time::Duration;

use sandos_vfs::{Fd, FsError, PollFlags};
use sandos_vio::InterestType;
use tracing::trace;

use super::SysResult;
use crate::{abi, GuestMemory, Kernel};

/// Non-blocking scan over a `pollfd` array: each descriptor's current
/// readiness mask is computed and written back; the return value counts the
/// descriptors with any bits set.
pub(crate) fn sys_poll(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fds_ptr: u64,
    nfds: u32,
) -> SysResult {
    let mut nonzero = 0;
    for i in 0..nfds {
        let ptr = fds_ptr + (i as u64) * abi::POLLFD_SIZE;
        let (fd, events) = abi::read_pollfd(mem, ptr)?;
        let mask = match kernel.vfs().poll_fd(fd) {
            Ok(mask) => mask.bits() & (events | PollFlags::POLLERR.bits() | PollFlags::POLLHUP.bits()),
            Err(FsError::InvalidFd) => PollFlags::POLLNVAL.bits(),
            Err(_) => PollFlags::POLLERR.bits(),
        };
        if mask != 0 {
            nonzero += 1;
        }
        abi::write_pollfd_revents(mem, ptr, mask)?;
    }
    Ok(nonzero)
}

/// Wait for readiness on a single descriptor, suspending the caller.
///
/// Process-bridged descriptors wait on the child's stdout event (an exited
/// child is immediately "ready" with nothing to report); sockets wait on
/// their transports; anything else just waits out the timeout and reports
/// ready, since plain files always are.
pub(crate) fn sys_poll_one(kernel: &Kernel, fd: Fd, events: u16, timeout_ms: i64) -> SysResult {
    let timeout = if timeout_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms as u64))
    };

    if let Some(record) = kernel.processes().by_fd(fd) {
        if record.exited() {
            return Ok(0);
        }
        let ready = kernel.bridge().block_on(async {
            let wait = record.stdout_events.wait_any(&[InterestType::Readable]);
            match timeout {
                Some(t) => tokio::time::timeout(t, wait).await.is_ok(),
                None => {
                    wait.await;
                    true
                }
            }
        });
        trace!(fd, ready, "child process poll");
        return Ok(ready as i32);
    }

    if let Ok(socket) = kernel.socket_for_fd(fd) {
        let events = PollFlags::from_bits_truncate(events);
        let mask = kernel
            .bridge()
            .block_on(socket.wait_readiness(events, timeout));
        return Ok((!mask.is_empty()) as i32);
    }

    kernel.vfs().stream(fd)?;
    if let Some(t) = timeout {
        kernel.bridge().sleep(t);
    }
    Ok(1)
}

pub(crate) fn sys_nanosleep(kernel: &Kernel, millis: u64) -> SysResult {
    kernel.bridge().sleep(Duration::from_millis(millis));
    Ok(0)
}
