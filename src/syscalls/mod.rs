//! Syscall implementations, one module per area. Every function decodes raw
//! arguments from guest memory, performs the operation, and yields either a
//! non-negative result or an [`Errno`](crate::Errno).

pub(crate) mod fs;
pub(crate) mod poll;
pub(crate) mod proc;
pub(crate) mod sock;

use crate::{Errno, GuestMemory, Kernel};

pub(crate) type SysResult = Result<i32, Errno>;

/// Read a path argument and root it at `/`.
pub(crate) fn path_arg(
    _kernel: &Kernel,
    mem: &dyn GuestMemory,
    ptr: u64,
) -> Result<String, Errno> {
    let raw = mem.read_cstr(ptr)?;
    sandos_vfs::path::absolute("/", &raw).map_err(Errno::from)
}
