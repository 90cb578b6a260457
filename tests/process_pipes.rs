//! Process-bridge and pipe scenarios through the raw syscall ABI.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{build_kernel, runtime, sys};
use pretty_assertions::assert_eq;
use sandos::vproc::{ProcessEvent, ScriptedSpawner};
use sandos::{Errno, GuestMemory, Sysno, VecMemory};

const O_RDWR: u64 = 0o2;
const O_CREAT: u64 = 0o100;

fn spawn_args(mem: &VecMemory, command: &str, stdout_fd: u32) -> [u64; 6] {
    mem.store_cstr(0, command);
    // stdio table: one record wiring stream 1 (stdout) to `stdout_fd`.
    mem.write_u32(512, 1).unwrap();
    mem.write_u32(516, 1).unwrap();
    mem.write_u32(520, stdout_fd).unwrap();
    mem.write_u32(524, 0).unwrap();
    [0, 0, 0, 512, 0, 0]
}

#[test]
fn spawn_wait_status_cleanup_lifecycle() {
    let rt = runtime();
    let spawner = Arc::new(ScriptedSpawner::new());
    spawner.push_script(vec![
        ProcessEvent::Stdout(Bytes::from_static(b"child says hi")),
        ProcessEvent::Exit(5),
    ]);
    let kernel = build_kernel(&rt, |b| b.spawner(spawner));
    let mem = VecMemory::new(64 * 1024);

    mem.store_cstr(256, "/tmp/child-out");
    let out_fd = sys(&kernel, &mem, Sysno::Open, &[256, O_RDWR | O_CREAT, 0o600]);
    assert!(out_fd >= 0);

    let args = spawn_args(&mem, "child-cmd", out_fd as u32);
    let pid = sys(&kernel, &mem, Sysno::Spawn, &args);
    assert!(pid > 0, "spawn failed: {pid}");
    let pid = pid as u64;

    assert_eq!(sys(&kernel, &mem, Sysno::Waitpid, &[pid, 2048]), pid as i32);
    assert_eq!(mem.read_u32(2048).unwrap(), 5, "exit code is reported");

    // The status stays queryable until explicit cleanup.
    assert_eq!(sys(&kernel, &mem, Sysno::ProcStatus, &[pid, 2052]), 1);
    assert_eq!(mem.read_u32(2052).unwrap(), 5);
    assert_eq!(sys(&kernel, &mem, Sysno::ProcCleanup, &[pid]), 0);
    assert_eq!(
        sys(&kernel, &mem, Sysno::ProcStatus, &[pid, 2052]),
        Errno::ECHILD.as_neg(),
    );

    // The child's stdout landed in the virtual file.
    let n = sys(&kernel, &mem, Sysno::Read, &[out_fd as u64, 4096, 64]);
    assert_eq!(n, 13);
    assert_eq!(mem.read_vec(4096, 13).unwrap(), b"child says hi");
}

#[test]
fn spawn_without_a_handler_is_refused() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(64 * 1024);

    mem.store_cstr(256, "/tmp/never");
    let out_fd = sys(&kernel, &mem, Sysno::Open, &[256, O_RDWR | O_CREAT, 0o600]);
    let args = spawn_args(&mem, "anything", out_fd as u32);
    assert_eq!(
        sys(&kernel, &mem, Sysno::Spawn, &args),
        Errno::EOPNOTSUPP.as_neg(),
    );
}

#[test]
fn waitpid_on_an_unknown_pid_fails() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(1024);
    assert_eq!(
        sys(&kernel, &mem, Sysno::Waitpid, &[4242, 64]),
        Errno::ECHILD.as_neg(),
    );
}

#[test]
fn pipe_reads_drain_buffered_bytes_then_eof() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(64 * 1024);

    assert_eq!(sys(&kernel, &mem, Sysno::Pipe, &[128]), 0);
    let read_fd = mem.read_u32(128).unwrap() as u64;
    let write_fd = mem.read_u32(132).unwrap() as u64;

    // Transient emptiness while both ends are open.
    assert_eq!(
        sys(&kernel, &mem, Sysno::Read, &[read_fd, 4096, 16]),
        Errno::EAGAIN.as_neg(),
    );

    mem.write(1024, b"piped").unwrap();
    assert_eq!(sys(&kernel, &mem, Sysno::Write, &[write_fd, 1024, 5]), 5);

    // poll(2) over both ends: the read end is readable, the write end
    // writable.
    mem.write_u32(192, read_fd as u32).unwrap();
    mem.write(196, &1u16.to_le_bytes()).unwrap(); // POLLIN
    mem.write_u32(200, write_fd as u32).unwrap();
    mem.write(204, &4u16.to_le_bytes()).unwrap(); // POLLOUT
    assert_eq!(sys(&kernel, &mem, Sysno::Poll, &[192, 2, 0]), 2);
    assert_eq!(mem.read_vec(198, 2).unwrap(), 1u16.to_le_bytes());
    assert_eq!(mem.read_vec(206, 2).unwrap(), 4u16.to_le_bytes());

    assert_eq!(sys(&kernel, &mem, Sysno::Close, &[write_fd]), 0);

    // Buffered bytes first, then end-of-file.
    assert_eq!(sys(&kernel, &mem, Sysno::Read, &[read_fd, 4096, 16]), 5);
    assert_eq!(mem.read_vec(4096, 5).unwrap(), b"piped");
    assert_eq!(sys(&kernel, &mem, Sysno::Read, &[read_fd, 4096, 16]), 0);

    assert_eq!(sys(&kernel, &mem, Sysno::Close, &[read_fd]), 0);
}

#[test]
fn writing_to_a_readerless_pipe_breaks() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(64 * 1024);

    sys(&kernel, &mem, Sysno::Pipe, &[128]);
    let read_fd = mem.read_u32(128).unwrap() as u64;
    let write_fd = mem.read_u32(132).unwrap() as u64;

    sys(&kernel, &mem, Sysno::Close, &[read_fd]);
    mem.write(1024, b"x").unwrap();
    assert_eq!(
        sys(&kernel, &mem, Sysno::Write, &[write_fd, 1024, 1]),
        Errno::EPIPE.as_neg(),
    );
}

#[test]
fn poll_fd_wakes_on_child_output() {
    let rt = runtime();
    let spawner = Arc::new(ScriptedSpawner::new());
    spawner.push_script(vec![ProcessEvent::Stdout(Bytes::from_static(b"data"))]);
    let kernel = build_kernel(&rt, |b| b.spawner(spawner));
    let mem = VecMemory::new(64 * 1024);

    mem.store_cstr(256, "/tmp/poll-out");
    let out_fd = sys(&kernel, &mem, Sysno::Open, &[256, O_RDWR | O_CREAT, 0o600]);
    let args = spawn_args(&mem, "chatty", out_fd as u32);
    let pid = sys(&kernel, &mem, Sysno::Spawn, &args);
    assert!(pid > 0);

    const POLLIN: u64 = 1;
    assert_eq!(
        sys(&kernel, &mem, Sysno::PollFd, &[out_fd as u64, POLLIN, 5_000]),
        1,
        "the stdout data event wakes the poller",
    );
}

#[test]
fn popen_collects_stdout_into_a_file() {
    let rt = runtime();
    let spawner = Arc::new(ScriptedSpawner::new());
    spawner.push_script(vec![
        ProcessEvent::Stdout(Bytes::from_static(b"captured output")),
        ProcessEvent::Exit(0),
    ]);
    let kernel = build_kernel(&rt, |b| b.spawner(spawner));
    let mem = VecMemory::new(64 * 1024);

    mem.store_cstr(0, "ls -l");
    mem.store_cstr(64, "r");
    let len = sys(&kernel, &mem, Sysno::Popen, &[0, 64, 128, 256, 64]);
    assert!(len > 0, "popen failed: {len}");
    assert_eq!(mem.read_u32(128).unwrap(), 0, "exit code");
    assert_eq!(mem.read_cstr(256).unwrap(), "/tmp/popen_output");

    mem.store_cstr(512, "/tmp/popen_output");
    let fd = sys(&kernel, &mem, Sysno::Open, &[512, 0, 0]);
    let n = sys(&kernel, &mem, Sysno::Read, &[fd as u64, 4096, 64]);
    assert_eq!(n, 15);
    assert_eq!(mem.read_vec(4096, 15).unwrap(), b"captured output");
}
