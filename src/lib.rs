//! A POSIX-like operating system surface for sandboxed guest runtimes.
//!
//! The guest issues numbered syscalls with raw argument buffers against a
//! [`Kernel`]; the host environment performs the real work asynchronously
//! (virtual filesystem backends, duplex transports, spawned processes) and
//! the suspend/resume bridge makes the results look synchronous to the
//! guest's single logical thread.

pub mod abi;
mod bridge;
mod config;
mod errno;
mod kernel;
mod memory;
mod syscalls;

pub use abi::Sysno;
pub use bridge::Bridge;
pub use config::KernelConfig;
pub use errno::Errno;
pub use kernel::{Kernel, KernelBuilder};
pub use memory::{GuestMemory, VecMemory};

pub use sandos_vfs as vfs;
pub use sandos_vio as vio;
pub use sandos_vnet as vnet;
pub use sandos_vproc as vproc;
