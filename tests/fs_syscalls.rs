//! Filesystem scenarios driven through the raw syscall ABI.

mod common;

use common::{build_kernel, runtime, sys};
use pretty_assertions::assert_eq;
use sandos::{Errno, GuestMemory, Sysno, VecMemory};

const O_RDWR: u64 = 0o2;
const O_CREAT: u64 = 0o100;
const SEEK_SET: u64 = 0;

#[test_log::test]
fn seek_and_write_extend_then_read_back() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(64 * 1024);

    // create /tmp/a with "hello"; seek to 5; write " world"; read it all.
    mem.store_cstr(0, "/tmp/a");
    let fd = sys(&kernel, &mem, Sysno::Open, &[0, O_RDWR | O_CREAT, 0o644]);
    assert!(fd >= 0, "open failed: {fd}");
    let fd = fd as u64;

    mem.write(1024, b"hello").unwrap();
    assert_eq!(sys(&kernel, &mem, Sysno::Write, &[fd, 1024, 5]), 5);

    assert_eq!(sys(&kernel, &mem, Sysno::Lseek, &[fd, 5, SEEK_SET, 2048]), 0);
    assert_eq!(mem.read_u64(2048).unwrap(), 5);

    mem.write(1100, b" world").unwrap();
    assert_eq!(sys(&kernel, &mem, Sysno::Write, &[fd, 1100, 6]), 6);

    assert_eq!(sys(&kernel, &mem, Sysno::Lseek, &[fd, 0, SEEK_SET, 2048]), 0);
    let n = sys(&kernel, &mem, Sysno::Read, &[fd, 4096, 64]);
    assert_eq!(n, 11);
    assert_eq!(mem.read_vec(4096, 11).unwrap(), b"hello world");

    assert_eq!(sys(&kernel, &mem, Sysno::Close, &[fd]), 0);
    assert_eq!(
        sys(&kernel, &mem, Sysno::Close, &[fd]),
        Errno::EBADF.as_neg(),
        "closing a closed descriptor is the caller's error",
    );
}

#[test]
fn stat_reports_size_and_unknown_paths_fail() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(64 * 1024);

    mem.store_cstr(0, "/tmp/stat-me");
    let fd = sys(&kernel, &mem, Sysno::Open, &[0, O_RDWR | O_CREAT, 0o644]);
    mem.write(1024, b"123456").unwrap();
    sys(&kernel, &mem, Sysno::Write, &[fd as u64, 1024, 6]);
    sys(&kernel, &mem, Sysno::Close, &[fd as u64]);

    assert_eq!(sys(&kernel, &mem, Sysno::Stat, &[0, 2048]), 0);
    // stat layout: size lives at offset 16.
    assert_eq!(mem.read_u64(2048 + 16).unwrap(), 6);

    mem.store_cstr(256, "/tmp/absent");
    assert_eq!(
        sys(&kernel, &mem, Sysno::Stat, &[256, 2048]),
        Errno::ENOENT.as_neg(),
    );
}

#[test]
fn directories_create_list_and_remove() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(64 * 1024);

    mem.store_cstr(0, "/work");
    assert_eq!(sys(&kernel, &mem, Sysno::Mkdir, &[0, 0o755]), 0);
    mem.store_cstr(32, "/work/a.txt");
    let fd = sys(&kernel, &mem, Sysno::Open, &[32, O_RDWR | O_CREAT, 0o644]);
    sys(&kernel, &mem, Sysno::Close, &[fd as u64]);
    mem.store_cstr(64, "/work/sub");
    assert_eq!(sys(&kernel, &mem, Sysno::Mkdir, &[64, 0o755]), 0);

    // Enumerate via getdents on a directory descriptor.
    let dir_fd = sys(&kernel, &mem, Sysno::Open, &[0, 0o200000 /* O_DIRECTORY */, 0]);
    assert!(dir_fd >= 0);
    let written = sys(&kernel, &mem, Sysno::Getdents, &[dir_fd as u64, 8192, 512]);
    assert!(written > 0);
    let bytes = mem.read_vec(8192, written as usize).unwrap();
    let listing = String::from_utf8_lossy(&bytes).into_owned();
    assert!(listing.contains("a.txt"), "directory listing: {listing:?}");
    assert!(listing.contains("sub"));
    // The cursor advanced past every entry.
    assert_eq!(sys(&kernel, &mem, Sysno::Getdents, &[dir_fd as u64, 8192, 512]), 0);
    sys(&kernel, &mem, Sysno::Close, &[dir_fd as u64]);

    assert_eq!(
        sys(&kernel, &mem, Sysno::Rmdir, &[0]),
        Errno::ENOTEMPTY.as_neg(),
        "the directory still has entries",
    );
    assert_eq!(sys(&kernel, &mem, Sysno::Unlink, &[32]), 0);
    assert_eq!(sys(&kernel, &mem, Sysno::Rmdir, &[64]), 0);
    assert_eq!(sys(&kernel, &mem, Sysno::Rmdir, &[0]), 0);
}

#[test]
fn symlinks_resolve_through_the_abi() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(64 * 1024);

    mem.store_cstr(0, "/tmp/real");
    let fd = sys(&kernel, &mem, Sysno::Open, &[0, O_RDWR | O_CREAT, 0o644]);
    mem.write(1024, b"content").unwrap();
    sys(&kernel, &mem, Sysno::Write, &[fd as u64, 1024, 7]);
    sys(&kernel, &mem, Sysno::Close, &[fd as u64]);

    mem.store_cstr(64, "/tmp/link");
    assert_eq!(sys(&kernel, &mem, Sysno::Symlink, &[0, 64]), 0);

    let len = sys(&kernel, &mem, Sysno::Readlink, &[64, 2048, 128]);
    assert_eq!(len, 9);
    assert_eq!(mem.read_vec(2048, 9).unwrap(), b"/tmp/real");

    let fd = sys(&kernel, &mem, Sysno::Open, &[64, 0, 0]);
    assert!(fd >= 0, "open through the link");
    assert_eq!(sys(&kernel, &mem, Sysno::Read, &[fd as u64, 4096, 16]), 7);
    assert_eq!(mem.read_vec(4096, 7).unwrap(), b"content");
    sys(&kernel, &mem, Sysno::Close, &[fd as u64]);
}

#[test]
fn dup_shares_position_and_fcntl_reports_flags() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(64 * 1024);

    mem.store_cstr(0, "/tmp/dup");
    let fd = sys(&kernel, &mem, Sysno::Open, &[0, O_RDWR | O_CREAT, 0o644]) as u64;
    mem.write(1024, b"abcdef").unwrap();
    sys(&kernel, &mem, Sysno::Write, &[fd, 1024, 6]);

    let dup = sys(&kernel, &mem, Sysno::Dup, &[fd]);
    assert!(dup >= 0);
    // Both descriptors see one byte position.
    assert_eq!(sys(&kernel, &mem, Sysno::Read, &[dup as u64, 4096, 16]), 0);
    sys(&kernel, &mem, Sysno::Lseek, &[fd, 0, SEEK_SET, 2048]);
    assert_eq!(sys(&kernel, &mem, Sysno::Read, &[dup as u64, 4096, 3]), 3);
    assert_eq!(sys(&kernel, &mem, Sysno::Read, &[fd, 4096, 3]), 3);

    // F_GETFL returns the open flags.
    assert_eq!(
        sys(&kernel, &mem, Sysno::Fcntl, &[fd, 3, 0]),
        (O_RDWR | O_CREAT) as i32,
    );

    assert_eq!(sys(&kernel, &mem, Sysno::Close, &[fd]), 0);
    assert_eq!(sys(&kernel, &mem, Sysno::Close, &[dup as u64]), 0);
}

#[test]
fn nanosleep_suspends_and_resumes() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(1024);

    let started = std::time::Instant::now();
    assert_eq!(sys(&kernel, &mem, Sysno::Nanosleep, &[25]), 0);
    assert!(started.elapsed() >= std::time::Duration::from_millis(20));
}

#[test]
fn host_mounts_pass_through_the_abi() {
    use std::sync::Arc;

    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(64 * 1024);

    let dir = tempfile::tempdir().unwrap();
    kernel.vfs().mkdir("/host", 0o755).unwrap();
    kernel
        .vfs()
        .mount(
            "/host",
            Arc::new(sandos::vfs::HostBackend::new(dir.path())),
            &dir.path().display().to_string(),
        )
        .unwrap();

    mem.store_cstr(0, "/host/f.txt");
    let fd = sys(&kernel, &mem, Sysno::Open, &[0, O_RDWR | O_CREAT, 0o644]);
    assert!(fd >= 0);
    mem.write(1024, b"through the host").unwrap();
    assert_eq!(sys(&kernel, &mem, Sysno::Write, &[fd as u64, 1024, 16]), 16);
    assert_eq!(sys(&kernel, &mem, Sysno::Close, &[fd as u64]), 0);

    assert_eq!(
        std::fs::read(dir.path().join("f.txt")).unwrap(),
        b"through the host",
    );

    // Renaming across the mount boundary is a cross-device error.
    mem.store_cstr(64, "/tmp/dest");
    assert_eq!(
        sys(&kernel, &mem, Sysno::Rename, &[0, 64]),
        Errno::EXDEV.as_neg(),
    );
}

#[test]
fn unknown_syscalls_are_rejected() {
    let rt = runtime();
    let kernel = build_kernel(&rt, |b| b);
    let mem = VecMemory::new(1024);
    assert_eq!(kernel.syscall(&mem, 9999, [0; 6]), Errno::ENOSYS.as_neg());
}
