//! Process syscalls: spawn, wait, status, cleanup, and the spawn-and-collect
//! shorthand behind `popen`.

use bytes::Bytes;
use sandos_vfs::{Fd, OpenFlags, OpenStream};
use sandos_vproc::{ProcStatus, SpawnOptions, StdioMap};
use tracing::trace;

use super::SysResult;
use crate::{Errno, GuestMemory, Kernel};

fn nonzero_fd(fd: u32) -> Option<Fd> {
    (fd != 0).then_some(fd)
}

/// Capture the full current contents of `fd` so it can be fed to a child's
/// stdin once at startup.
fn capture_fd(kernel: &Kernel, fd: Fd) -> Option<Bytes> {
    const CHUNK: usize = 1024;
    let stream = kernel.vfs().stream(fd).ok()?;
    let reader = OpenStream::new(stream.node, stream.flags, stream.seekable, stream.ops.clone());
    let mut collected = Vec::new();
    let mut buf = [0u8; CHUNK];
    loop {
        match reader.ops.read(kernel.vfs(), &reader, &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => collected.extend_from_slice(&buf[..n]),
        }
    }
    (!collected.is_empty()).then(|| Bytes::from(collected))
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn sys_spawn(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    cmd_ptr: u64,
    argv_ptr: u64,
    argc: u32,
    stdio_ptr: u64,
    cwd_ptr: u64,
    env_ptr: u64,
) -> SysResult {
    let command = mem.read_cstr(cmd_ptr)?;
    if command.is_empty() {
        return Err(Errno::EINVAL);
    }

    let mut args = Vec::with_capacity(argc as usize);
    for i in 0..argc {
        let ptr = mem.read_u32(argv_ptr + (i as u64) * 4)? as u64;
        args.push(mem.read_cstr(ptr)?);
    }

    let mut stdio = StdioMap::default();
    if stdio_ptr != 0 {
        let count = mem.read_u32(stdio_ptr)?;
        for i in 0..count {
            let base = stdio_ptr + 4 + (i as u64) * 12;
            let stream_no = mem.read_u32(base)?;
            let child = mem.read_u32(base + 4)?;
            let parent = mem.read_u32(base + 8)?;
            match stream_no {
                0 => stdio.stdin = nonzero_fd(child),
                1 => {
                    stdio.stdout_child = nonzero_fd(child);
                    stdio.stdout_parent = nonzero_fd(parent);
                }
                2 => {
                    stdio.stderr_child = nonzero_fd(child);
                    stdio.stderr_parent = nonzero_fd(parent);
                }
                _ => (),
            }
        }
    }

    let cwd = if cwd_ptr != 0 {
        Some(mem.read_cstr(cwd_ptr)?)
    } else {
        None
    };

    let env = if env_ptr != 0 {
        let count = mem.read_u32(env_ptr)?;
        let mut pairs = Vec::with_capacity(count as usize);
        for i in 0..count {
            let ptr = mem.read_u32(env_ptr + 4 + (i as u64) * 4)? as u64;
            let entry = mem.read_cstr(ptr)?;
            // Entries without a separator are silently skipped.
            if let Some((key, value)) = entry.split_once('=') {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
        Some(pairs)
    } else {
        None
    };

    let options = SpawnOptions { cwd, env };
    let stdin_data = stdio.stdin.and_then(|fd| capture_fd(kernel, fd));

    let pid = kernel.bridge().block_on(kernel.processes().spawn(
        kernel.vfs(),
        kernel.bridge().handle(),
        &**kernel.spawner(),
        &command,
        &args,
        &options,
        stdio,
        stdin_data,
    ))?;
    trace!(pid, %command, "spawned");
    Ok(pid as i32)
}

pub(crate) fn sys_waitpid(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    pid: u32,
    code_ptr: u64,
) -> SysResult {
    let code = kernel.bridge().block_on(kernel.processes().wait(
        pid,
        kernel.config().wait_retry_interval,
        kernel.config().waitpid_max_retries,
    ))?;
    mem.write_u32(code_ptr, code as u32)?;
    Ok(pid as i32)
}

pub(crate) fn sys_proc_status(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    pid: u32,
    code_ptr: u64,
) -> SysResult {
    match kernel.processes().status(pid) {
        ProcStatus::NoSuchProcess => Err(Errno::ECHILD),
        ProcStatus::Running => Ok(0),
        ProcStatus::Exited(code) => {
            mem.write_u32(code_ptr, code as u32)?;
            Ok(1)
        }
    }
}

pub(crate) fn sys_proc_cleanup(kernel: &Kernel, pid: u32) -> SysResult {
    kernel.processes().cleanup(pid)?;
    Ok(0)
}

/// Where `popen` output collects in the virtual tree.
pub(crate) const POPEN_OUTPUT_PATH: &str = "/tmp/popen_output";

/// Spawn a command, collect its stdout into a virtual file, report the exit
/// code, and hand the caller the file's path.
pub(crate) fn sys_popen(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    cmd_ptr: u64,
    mode_ptr: u64,
    code_ptr: u64,
    path_ptr: u64,
    path_len: u64,
) -> SysResult {
    let command = mem.read_cstr(cmd_ptr)?;
    if command.is_empty() {
        return Err(Errno::EINVAL);
    }
    let mode = mem.read_cstr(mode_ptr)?;
    if mode != "r" {
        return Err(Errno::EINVAL);
    }

    let fd = kernel.vfs().open_path(
        POPEN_OUTPUT_PATH,
        OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
        0o600,
    )?;
    let stdio = StdioMap {
        stdout_child: Some(fd),
        ..Default::default()
    };

    let pid = kernel.bridge().block_on(kernel.processes().spawn(
        kernel.vfs(),
        kernel.bridge().handle(),
        &**kernel.spawner(),
        &command,
        &[],
        &SpawnOptions::default(),
        stdio,
        None,
    ))?;
    let code = kernel.bridge().block_on(kernel.processes().wait(
        pid,
        kernel.config().wait_retry_interval,
        kernel.config().waitpid_max_retries,
    ))?;
    kernel.processes().cleanup(pid).ok();
    kernel.vfs().close_fd(fd).ok();

    mem.write_u32(code_ptr, code as u32)?;
    let path = POPEN_OUTPUT_PATH.as_bytes();
    if (path.len() as u64) + 1 > path_len {
        return Err(Errno::ENAMETOOLONG);
    }
    mem.write(path_ptr, path)?;
    mem.write(path_ptr + path.len() as u64, &[0])?;
    trace!(pid, code, "popen completed");
    Ok(path.len() as i32)
}
