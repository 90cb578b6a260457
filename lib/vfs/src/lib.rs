//! Virtual filesystem for sandboxed guests: a node identity graph with
//! pluggable mount backends, a descriptor table, and pure path algebra.
//!
//! One [`Vfs`] value is one independent sandbox instance. All state is owned
//! by it; there are no process-wide registries.

mod backend;
mod chardev;
mod error;
mod filesystem;
pub mod host;
pub mod mem;
mod node;
pub mod path;
pub mod proxy;
mod streams;

pub use backend::{
    AccessMode, Backend, OpenFlags, PollFlags, StreamOps, Upcastable, Whence,
};
pub use chardev::FnDevice;
pub use error::{FsError, Result};
pub use filesystem::{
    LookupOptions, Mount, Vfs, VfsConfig, MAX_OPEN_FDS_DEFAULT, ROOT_NODE, SYMLINK_DEPTH_DEFAULT,
};
pub use host::HostBackend;
pub use mem::MemBackend;
pub use node::{
    DeviceId, DirEntry, FileType, Metadata, MountId, Node, NodeId, Payload, SetAttr, S_IFCHR,
    S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK,
};
pub use proxy::ProxyBackend;
pub use streams::{Fd, OpenStream, Streams};
