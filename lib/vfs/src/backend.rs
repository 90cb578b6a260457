use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::{DirEntry, FsError, Metadata, NodeId, OpenStream, Result, SetAttr, Vfs};

bitflags! {
    /// Open flags, Linux octal layout.
    pub struct OpenFlags: u32 {
        const WRITE_ONLY = 0o1;
        const READ_WRITE = 0o2;
        const CREATE     = 0o100;
        const EXCLUSIVE  = 0o200;
        const TRUNCATE   = 0o1000;
        const APPEND     = 0o2000;
        const NONBLOCK   = 0o4000;
        const DIRECTORY  = 0o200000;
        const NOFOLLOW   = 0o400000;
    }
}

impl OpenFlags {
    pub fn readable(&self) -> bool {
        !self.contains(OpenFlags::WRITE_ONLY)
    }

    pub fn writable(&self) -> bool {
        self.intersects(OpenFlags::WRITE_ONLY | OpenFlags::READ_WRITE)
    }
}

bitflags! {
    /// Readiness mask reported by `poll`, `poll(2)` bit layout.
    pub struct PollFlags: u16 {
        const POLLIN   = 0x001;
        const POLLPRI  = 0x002;
        const POLLOUT  = 0x004;
        const POLLERR  = 0x008;
        const POLLHUP  = 0x010;
        const POLLNVAL = 0x020;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

impl Whence {
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            _ => Err(FsError::InvalidInput),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

/// Trait needed to get downcasting from `StreamOps` to work.
pub trait Upcastable {
    fn upcast_any_ref(&'_ self) -> &'_ dyn Any;
}

impl<T: Any + 'static> Upcastable for T {
    #[inline]
    fn upcast_any_ref(&'_ self) -> &'_ dyn Any {
        self
    }
}

/// Node-level operations every mount backend implements.
///
/// Backends are interchangeable at this level: callers above never
/// special-case backend identity. Operations a backend cannot express return
/// [`FsError::NotSupported`].
pub trait Backend: fmt::Debug + Send + Sync {
    /// Payload given to the root node when this backend is mounted.
    /// In-tree backends start with an empty directory; backends with
    /// out-of-tree storage start with a shadow node.
    fn root_payload(&self) -> crate::Payload {
        crate::Payload::empty_dir()
    }

    fn getattr(&self, fs: &Vfs, node: NodeId) -> Result<Metadata>;

    fn setattr(&self, fs: &Vfs, node: NodeId, set: &SetAttr) -> Result<()>;

    /// Resolve `name` inside `parent`. Backends with out-of-tree storage
    /// materialize the child node here; the resolver consults the name index
    /// first, so this is only called on an index miss.
    fn lookup(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<NodeId>;

    fn mknod(&self, fs: &Vfs, parent: NodeId, name: &str, mode: u32) -> Result<NodeId>;

    fn rename(&self, fs: &Vfs, node: NodeId, new_parent: NodeId, new_name: &str) -> Result<()>;

    fn unlink(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<()>;

    fn rmdir(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<()>;

    fn readdir(&self, fs: &Vfs, node: NodeId) -> Result<Vec<DirEntry>>;

    fn symlink(&self, fs: &Vfs, parent: NodeId, name: &str, target: &str) -> Result<NodeId> {
        let _ = (fs, parent, name, target);
        Err(FsError::NotSupported)
    }

    fn readlink(&self, fs: &Vfs, node: NodeId) -> Result<String> {
        let _ = (fs, node);
        Err(FsError::NotSupported)
    }

    /// Open a stream session on `node`, returning the per-stream operations
    /// that will serve it until close.
    fn open(&self, fs: &Vfs, node: NodeId, flags: OpenFlags) -> Result<Arc<dyn StreamOps>>;
}

/// Stream-level operations bound to one open descriptor.
///
/// Implementations advance `stream.offset` themselves where a position makes
/// sense; non-seekable streams ignore it.
pub trait StreamOps: fmt::Debug + Send + Sync + Upcastable {
    fn read(&self, fs: &Vfs, stream: &OpenStream, buf: &mut [u8]) -> Result<usize>;

    fn write(&self, fs: &Vfs, stream: &OpenStream, buf: &[u8]) -> Result<usize>;

    fn llseek(&self, fs: &Vfs, stream: &OpenStream, offset: i64, whence: Whence) -> Result<u64> {
        let _ = (fs, stream, offset, whence);
        Err(FsError::NotSeekable)
    }

    fn allocate(&self, fs: &Vfs, stream: &OpenStream, len: u64) -> Result<()> {
        let _ = (fs, stream, len);
        Err(FsError::NotSupported)
    }

    /// Copy-out mapping of `[offset, offset + len)`.
    fn mmap(&self, fs: &Vfs, stream: &OpenStream, offset: u64, len: usize) -> Result<Vec<u8>> {
        let _ = (fs, stream, offset, len);
        Err(FsError::NotSupported)
    }

    /// Write back a region previously obtained with `mmap`.
    fn msync(&self, fs: &Vfs, stream: &OpenStream, offset: u64, data: &[u8]) -> Result<()> {
        let _ = (fs, stream, offset, data);
        Err(FsError::NotSupported)
    }

    fn ioctl(&self, fs: &Vfs, stream: &OpenStream, request: u32, arg: &mut [u8]) -> Result<i32> {
        let _ = (fs, stream, request, arg);
        Err(FsError::NotSupported)
    }

    /// Non-blocking readiness mask. The default claims a stream that is
    /// always ready, which is correct for plain files.
    fn poll(&self, fs: &Vfs, stream: &OpenStream) -> Result<PollFlags> {
        let _ = (fs, stream);
        Ok(PollFlags::POLLIN | PollFlags::POLLOUT)
    }

    fn fsync(&self, fs: &Vfs, stream: &OpenStream) -> Result<()> {
        let _ = (fs, stream);
        Ok(())
    }

    /// Release the backend resources of this descriptor. Called exactly once
    /// per descriptor-table entry.
    fn close(&self, fs: &Vfs, stream: &OpenStream) -> Result<()> {
        let _ = (fs, stream);
        Ok(())
    }
}

impl dyn StreamOps + 'static {
    #[inline]
    pub fn downcast_ref<T: 'static>(&'_ self) -> Option<&'_ T> {
        self.upcast_any_ref().downcast_ref::<T>()
    }
}
