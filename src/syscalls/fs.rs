//! Filesystem syscalls.

use std::sync::Arc;

use sandos_vfs::{
    Fd, FileType, FsError, LookupOptions, OpenFlags, OpenStream, Payload, Whence, S_IFIFO,
};
use sandos_vproc::PipeStreamOps;
use tracing::trace;

use super::{path_arg, SysResult};
use crate::{abi, Errno, GuestMemory, Kernel};

pub(crate) fn sys_open(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    path_ptr: u64,
    flags: u32,
    mode: u32,
) -> SysResult {
    let path = path_arg(kernel, mem, path_ptr)?;
    let flags = OpenFlags::from_bits_truncate(flags);
    let fd = kernel.vfs().open_path(&path, flags, mode)?;
    trace!(%path, fd, "opened");
    Ok(fd as i32)
}

pub(crate) fn sys_close(kernel: &Kernel, fd: Fd) -> SysResult {
    kernel.vfs().close_fd(fd)?;
    Ok(0)
}

pub(crate) fn sys_read(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    buf_ptr: u64,
    len: u64,
) -> SysResult {
    let mut buf = vec![0u8; len as usize];
    match kernel.vfs().read_fd(fd, &mut buf) {
        Ok(n) => {
            mem.write(buf_ptr, &buf[..n])?;
            Ok(n as i32)
        }
        Err(FsError::WouldBlock) if kernel.processes().by_fd(fd).is_some() => {
            let n = retry_read_child(kernel, fd, &mut buf)?;
            mem.write(buf_ptr, &buf[..n])?;
            Ok(n as i32)
        }
        Err(err) => Err(err.into()),
    }
}

/// A read that would block on a descriptor bridged to a live child process
/// retries on a timer, bounded in count and total wait, then reports
/// end-of-file rather than hanging the caller.
fn retry_read_child(kernel: &Kernel, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno> {
    let interval = kernel.config().wait_retry_interval;
    let retries = kernel.config().wait_max_retries;
    kernel.bridge().block_on(async {
        for _ in 0..retries {
            tokio::time::sleep(interval).await;
            match kernel.vfs().read_fd(fd, buf) {
                Ok(n) => return Ok(n),
                Err(FsError::WouldBlock) => {
                    let gone = match kernel.processes().by_fd(fd) {
                        None => true,
                        Some(record) => record.exited(),
                    };
                    if gone {
                        return Ok(0);
                    }
                }
                Err(FsError::InvalidFd) => return Ok(0),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(0)
    })
}

pub(crate) fn sys_write(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    buf_ptr: u64,
    len: u64,
) -> SysResult {
    let data = mem.read_vec(buf_ptr, len as usize)?;
    let written = kernel.vfs().write_fd(fd, &data)?;
    Ok(written as i32)
}

pub(crate) fn sys_lseek(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    offset: i64,
    whence: u32,
    result_ptr: u64,
) -> SysResult {
    let whence = Whence::from_raw(whence)?;
    let position = kernel.vfs().seek_fd(fd, offset, whence)?;
    mem.write_u64(result_ptr, position)?;
    Ok(0)
}

pub(crate) fn sys_stat(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    path_ptr: u64,
    stat_ptr: u64,
    follow: bool,
) -> SysResult {
    let path = path_arg(kernel, mem, path_ptr)?;
    let opts = if follow {
        LookupOptions::default()
    } else {
        LookupOptions::no_follow()
    };
    let node = kernel.vfs().resolve(&path, opts)?;
    let meta = if follow {
        kernel.vfs().stat(&path)?
    } else {
        kernel.vfs().lstat(&path)?
    };
    abi::write_stat(mem, stat_ptr, node as u64, &meta)?;
    Ok(0)
}

pub(crate) fn sys_fstat(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    stat_ptr: u64,
) -> SysResult {
    let stream = kernel.vfs().stream(fd)?;
    let meta = kernel.vfs().fstat(fd)?;
    abi::write_stat(mem, stat_ptr, stream.node as u64, &meta)?;
    Ok(0)
}

pub(crate) fn sys_mkdir(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    path_ptr: u64,
    mode: u32,
) -> SysResult {
    let path = path_arg(kernel, mem, path_ptr)?;
    kernel.vfs().mkdir(&path, mode)?;
    Ok(0)
}

pub(crate) fn sys_rmdir(kernel: &Kernel, mem: &dyn GuestMemory, path_ptr: u64) -> SysResult {
    let path = path_arg(kernel, mem, path_ptr)?;
    kernel.vfs().rmdir(&path)?;
    Ok(0)
}

pub(crate) fn sys_unlink(kernel: &Kernel, mem: &dyn GuestMemory, path_ptr: u64) -> SysResult {
    let path = path_arg(kernel, mem, path_ptr)?;
    kernel.vfs().unlink(&path)?;
    Ok(0)
}

pub(crate) fn sys_rename(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    from_ptr: u64,
    to_ptr: u64,
) -> SysResult {
    let from = path_arg(kernel, mem, from_ptr)?;
    let to = path_arg(kernel, mem, to_ptr)?;
    kernel.vfs().rename(&from, &to)?;
    Ok(0)
}

pub(crate) fn sys_symlink(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    target_ptr: u64,
    link_ptr: u64,
) -> SysResult {
    let target = mem.read_cstr(target_ptr)?;
    let linkpath = path_arg(kernel, mem, link_ptr)?;
    kernel.vfs().symlink(&target, &linkpath)?;
    Ok(0)
}

pub(crate) fn sys_readlink(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    path_ptr: u64,
    buf_ptr: u64,
    len: u64,
) -> SysResult {
    if len == 0 {
        return Err(Errno::EINVAL);
    }
    let path = path_arg(kernel, mem, path_ptr)?;
    let target = kernel.vfs().readlink(&path)?;
    let take = target.len().min(len as usize);
    mem.write(buf_ptr, &target.as_bytes()[..take])?;
    Ok(take as i32)
}

pub(crate) fn sys_getdents(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    buf_ptr: u64,
    len: u64,
) -> SysResult {
    let stream = kernel.vfs().stream(fd)?;
    let entries = kernel.vfs().readdir_fd(fd)?;
    // The stream position is the enumeration cursor.
    let start = (stream.position() as usize).min(entries.len());
    let (written, consumed) = abi::write_dirents(mem, buf_ptr, len as usize, &entries[start..])?;
    stream.set_position((start + consumed) as u64);
    Ok(written as i32)
}

pub(crate) fn sys_dup(kernel: &Kernel, fd: Fd) -> SysResult {
    Ok(kernel.vfs().dup_fd(fd)? as i32)
}

pub(crate) fn sys_dup2(kernel: &Kernel, fd: Fd, new_fd: Fd) -> SysResult {
    Ok(kernel.vfs().dup2_fd(fd, new_fd)? as i32)
}

const F_DUPFD: u32 = 0;
const F_GETFD: u32 = 1;
const F_SETFD: u32 = 2;
const F_GETFL: u32 = 3;
const F_SETFL: u32 = 4;

pub(crate) fn sys_fcntl(kernel: &Kernel, fd: Fd, cmd: u32, _arg: u64) -> SysResult {
    match cmd {
        F_DUPFD => Ok(kernel.vfs().dup_fd(fd)? as i32),
        F_GETFD | F_SETFD | F_SETFL => {
            kernel.vfs().stream(fd)?;
            Ok(0)
        }
        F_GETFL => Ok(kernel.vfs().stream(fd)?.flags.bits() as i32),
        _ => Err(Errno::EINVAL),
    }
}

pub(crate) fn sys_ioctl(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    request: u32,
    arg_ptr: u64,
) -> SysResult {
    let mut arg = [0u8; 8];
    if arg_ptr != 0 {
        mem.read(arg_ptr, &mut arg)?;
    }
    let ret = kernel.vfs().ioctl_fd(fd, request, &mut arg)?;
    if arg_ptr != 0 {
        mem.write(arg_ptr, &arg)?;
    }
    Ok(ret)
}

pub(crate) fn sys_ftruncate(kernel: &Kernel, fd: Fd, len: u64) -> SysResult {
    kernel.vfs().truncate_fd(fd, len)?;
    Ok(0)
}

pub(crate) fn sys_fsync(kernel: &Kernel, fd: Fd) -> SysResult {
    kernel.vfs().fsync_fd(fd)?;
    Ok(0)
}

pub(crate) fn sys_pipe(kernel: &Kernel, mem: &dyn GuestMemory, fds_ptr: u64) -> SysResult {
    if fds_ptr == 0 {
        return Err(Errno::EFAULT);
    }
    let (read_ops, write_ops) = PipeStreamOps::pair(kernel.config().pipe_bucket_size);

    let install = |ops: PipeStreamOps, flags: OpenFlags| -> Result<Fd, Errno> {
        let name = format!("pipe[{}]", kernel.next_pipe_name());
        let node = kernel.vfs().insert_anonymous(
            &name,
            FileType {
                fifo: true,
                ..Default::default()
            },
            S_IFIFO | 0o600,
            Payload::Device(0),
        );
        let stream = OpenStream::new(node, flags, false, Arc::new(ops));
        kernel.vfs().insert_stream(stream).map_err(Into::into)
    };

    let read_fd = install(read_ops, OpenFlags::empty())?;
    let write_fd = install(write_ops, OpenFlags::WRITE_ONLY)?;
    mem.write_u32(fds_ptr, read_fd)?;
    mem.write_u32(fds_ptr + 4, write_fd)?;
    trace!(read_fd, write_fd, "pipe created");
    Ok(0)
}
