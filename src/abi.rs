//! The syscall ABI: the dense private numbering the hosted runtime is
//! compiled against, and the raw little-endian record layouts read from and
//! written to guest memory.
//!
//! Argument conventions (all pointers are 32-bit guest offsets):
//!
//! | syscall      | args                                               |
//! |--------------|----------------------------------------------------|
//! | `Open`       | path, flags, mode                                  |
//! | `Close`      | fd                                                 |
//! | `Read`       | fd, buf, len                                       |
//! | `Write`      | fd, buf, len                                       |
//! | `Lseek`      | fd, offset (i64), whence, result ptr (u64)         |
//! | `Stat`/`Lstat`| path, stat ptr                                    |
//! | `Fstat`      | fd, stat ptr                                       |
//! | `Mkdir`      | path, mode                                         |
//! | `Rmdir`/`Unlink`| path                                            |
//! | `Rename`     | from, to                                           |
//! | `Symlink`    | target, linkpath                                   |
//! | `Readlink`   | path, buf, len                                     |
//! | `Getdents`   | fd, buf, len                                       |
//! | `Dup`        | fd                                                 |
//! | `Dup2`       | fd, newfd                                          |
//! | `Fcntl`      | fd, cmd, arg                                       |
//! | `Ioctl`      | fd, request, arg ptr                               |
//! | `Ftruncate`  | fd, len                                            |
//! | `Fsync`      | fd                                                 |
//! | `Pipe`       | fds ptr (2 × u32)                                  |
//! | `Poll`       | pollfd array ptr, nfds, timeout ms                 |
//! | `PollFd`     | fd, events, timeout ms (-1 = infinite)             |
//! | `Nanosleep`  | millis                                             |
//! | `Socket`     | family, type, protocol                             |
//! | `Bind`/`Connect`| fd, sockaddr ptr, len                           |
//! | `Listen`     | fd, backlog                                        |
//! | `Accept`     | fd, sockaddr out ptr (0 = none), len ptr           |
//! | `Sendto`     | fd, buf, len, flags, sockaddr ptr (0 = none), len  |
//! | `Recvfrom`   | fd, buf, len, flags, sockaddr out ptr, len ptr     |
//! | `Shutdown`   | fd, how                                            |
//! | `Getsockname`/`Getpeername`| fd, sockaddr out ptr, len ptr        |
//! | `Spawn`      | cmd, argv ptr, argc, stdio ptr, cwd (0 = none), env (0 = none) |
//! | `Waitpid`    | pid, exit code out ptr                             |
//! | `ProcStatus` | pid, exit code out ptr                             |
//! | `ProcCleanup`| pid                                                |
//! | `Popen`      | cmd, mode, exit code out ptr, path buf, path len   |
//!
//! `Spawn`'s stdio table is `count: u32` followed by `count` records of
//! `(stream no: u32, child fd: u32, parent fd: u32)`; `argv` is `argc` u32
//! string pointers; `env` is `count: u32` followed by u32 pointers to
//! `KEY=VALUE` strings.

use crate::{Errno, GuestMemory};
use sandos_vfs::{DirEntry, FileType, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Sysno {
    Read = 1,
    Write = 2,
    Open = 3,
    Close = 4,
    Lseek = 5,
    Stat = 6,
    Fstat = 7,
    Lstat = 8,
    Mkdir = 9,
    Rmdir = 10,
    Unlink = 11,
    Rename = 12,
    Symlink = 13,
    Readlink = 14,
    Getdents = 15,
    Dup = 16,
    Dup2 = 17,
    Fcntl = 18,
    Ioctl = 19,
    Ftruncate = 20,
    Fsync = 21,
    Pipe = 22,
    Poll = 23,
    PollFd = 24,
    Nanosleep = 25,
    Socket = 30,
    Bind = 31,
    Listen = 32,
    Accept = 33,
    Connect = 34,
    Sendto = 35,
    Recvfrom = 36,
    Shutdown = 37,
    Getsockname = 38,
    Getpeername = 39,
    Spawn = 50,
    Waitpid = 51,
    ProcStatus = 52,
    ProcCleanup = 53,
    Popen = 54,
}

impl TryFrom<u32> for Sysno {
    type Error = ();

    fn try_from(raw: u32) -> Result<Self, ()> {
        use Sysno::*;
        Ok(match raw {
            1 => Read,
            2 => Write,
            3 => Open,
            4 => Close,
            5 => Lseek,
            6 => Stat,
            7 => Fstat,
            8 => Lstat,
            9 => Mkdir,
            10 => Rmdir,
            11 => Unlink,
            12 => Rename,
            13 => Symlink,
            14 => Readlink,
            15 => Getdents,
            16 => Dup,
            17 => Dup2,
            18 => Fcntl,
            19 => Ioctl,
            20 => Ftruncate,
            21 => Fsync,
            22 => Pipe,
            23 => Poll,
            24 => PollFd,
            25 => Nanosleep,
            30 => Socket,
            31 => Bind,
            32 => Listen,
            33 => Accept,
            34 => Connect,
            35 => Sendto,
            36 => Recvfrom,
            37 => Shutdown,
            38 => Getsockname,
            39 => Getpeername,
            50 => Spawn,
            51 => Waitpid,
            52 => ProcStatus,
            53 => ProcCleanup,
            54 => Popen,
            _ => return Err(()),
        })
    }
}

pub const AF_INET: u16 = 2;
pub const SOCK_STREAM: u32 = 1;
pub const SOCK_DGRAM: u32 = 2;

/// `stat` record: ino u64, mode u32, nlink u32, size u64, atim u64,
/// mtim u64, ctim u64. 48 bytes.
pub const STAT_SIZE: u64 = 48;

pub fn write_stat(
    mem: &dyn GuestMemory,
    ptr: u64,
    ino: u64,
    meta: &Metadata,
) -> Result<(), Errno> {
    mem.write_u64(ptr, ino)?;
    mem.write_u32(ptr + 8, meta.ft.as_mode_bits() | (meta.mode & 0o7777))?;
    mem.write_u32(ptr + 12, 1)?;
    mem.write_u64(ptr + 16, meta.len)?;
    mem.write_u64(ptr + 24, meta.accessed)?;
    mem.write_u64(ptr + 32, meta.modified)?;
    mem.write_u64(ptr + 40, meta.created)?;
    Ok(())
}

/// `sockaddr` record: family u16, port u16 big-endian, IPv4 address as four
/// octets. 8 bytes.
pub const SOCKADDR_SIZE: u64 = 8;

pub fn read_sockaddr(mem: &dyn GuestMemory, ptr: u64) -> Result<(String, u16), Errno> {
    let mut buf = [0u8; SOCKADDR_SIZE as usize];
    mem.read(ptr, &mut buf)?;
    let family = u16::from_le_bytes([buf[0], buf[1]]);
    if family != AF_INET {
        return Err(Errno::EINVAL);
    }
    let port = u16::from_be_bytes([buf[2], buf[3]]);
    let host = format!("{}.{}.{}.{}", buf[4], buf[5], buf[6], buf[7]);
    Ok((host, port))
}

pub fn write_sockaddr(
    mem: &dyn GuestMemory,
    ptr: u64,
    host: &str,
    port: u16,
) -> Result<(), Errno> {
    let mut octets = [0u8; 4];
    let mut parts = host.split('.');
    for slot in octets.iter_mut() {
        *slot = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .unwrap_or(0);
    }
    let mut buf = [0u8; SOCKADDR_SIZE as usize];
    buf[0..2].copy_from_slice(&AF_INET.to_le_bytes());
    buf[2..4].copy_from_slice(&port.to_be_bytes());
    buf[4..8].copy_from_slice(&octets);
    mem.write(ptr, &buf)
}

/// `pollfd` record: fd i32, events u16, revents u16. 8 bytes.
pub const POLLFD_SIZE: u64 = 8;

pub fn read_pollfd(mem: &dyn GuestMemory, ptr: u64) -> Result<(u32, u16), Errno> {
    let fd = mem.read_u32(ptr)?;
    let mut buf = [0u8; 2];
    mem.read(ptr + 4, &mut buf)?;
    Ok((fd, u16::from_le_bytes(buf)))
}

pub fn write_pollfd_revents(mem: &dyn GuestMemory, ptr: u64, revents: u16) -> Result<(), Errno> {
    mem.write(ptr + 6, &revents.to_le_bytes())
}

fn dirent_type(ft: &FileType) -> u8 {
    if ft.dir {
        4 // DT_DIR
    } else if ft.symlink {
        10 // DT_LNK
    } else if ft.char_device {
        2 // DT_CHR
    } else if ft.socket {
        12 // DT_SOCK
    } else if ft.fifo {
        1 // DT_FIFO
    } else {
        8 // DT_REG
    }
}

/// Directory records are packed as ino u64, type u8, name length u16, then
/// the name bytes (no terminator). Returns `(bytes written, entries
/// consumed)`; an entry that does not fit ends the batch.
pub fn write_dirents(
    mem: &dyn GuestMemory,
    ptr: u64,
    len: usize,
    entries: &[DirEntry],
) -> Result<(usize, usize), Errno> {
    const HEADER: usize = 11;
    let mut written = 0usize;
    let mut consumed = 0usize;
    for entry in entries {
        let record = HEADER + entry.name.len();
        if written + record > len {
            break;
        }
        let base = ptr + written as u64;
        mem.write_u64(base, entry.ino)?;
        mem.write(base + 8, &[dirent_type(&entry.ft)])?;
        mem.write(base + 9, &(entry.name.len() as u16).to_le_bytes())?;
        mem.write(base + 11, entry.name.as_bytes())?;
        written += record;
        consumed += 1;
    }
    Ok((written, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VecMemory;

    #[test]
    fn sockaddr_round_trips() {
        let mem = VecMemory::new(64);
        write_sockaddr(&mem, 8, "192.168.7.1", 5000).unwrap();
        assert_eq!(
            read_sockaddr(&mem, 8).unwrap(),
            ("192.168.7.1".to_string(), 5000),
        );
    }

    #[test]
    fn dirents_pack_until_full() {
        let mem = VecMemory::new(64);
        let entries = vec![
            DirEntry {
                name: "alpha".to_string(),
                ino: 3,
                ft: FileType::file(),
            },
            DirEntry {
                name: "beta".to_string(),
                ino: 4,
                ft: FileType::dir(),
            },
            DirEntry {
                name: "a-name-that-will-not-fit-in-the-rest".to_string(),
                ino: 5,
                ft: FileType::file(),
            },
        ];
        let (written, consumed) = write_dirents(&mem, 0, 40, &entries).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(written, 11 + 5 + 11 + 4);
        assert_eq!(mem.read_u64(0).unwrap(), 3);
    }
}
