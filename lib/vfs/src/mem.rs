//! The in-memory mount backend. File payloads are growable byte buffers;
//! directories are pure name maps living in the node graph itself.

use std::sync::Arc;

use crate::{
    Backend, DirEntry, FileType, FsError, Metadata, NodeId, OpenFlags, OpenStream, Payload,
    PollFlags, Result, SetAttr, StreamOps, Vfs, Whence,
};

/// Buffers double while below this capacity, then grow by 12.5% increments.
const CAPACITY_DOUBLING_MAX: usize = 1024 * 1024;

/// A growable byte buffer with amortized reallocation.
///
/// Capacity (the allocation) and length (the file size) are tracked
/// separately; the gap is kept zeroed so sparse writes read back as zeros.
#[derive(Debug, Default)]
pub struct FileBuffer {
    bytes: Vec<u8>,
    len: usize,
}

impl FileBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            bytes: data.to_vec(),
            len: data.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Grow the allocation to hold at least `new_capacity` bytes.
    fn expand_storage(&mut self, new_capacity: usize) {
        let prev_capacity = self.bytes.len();
        if prev_capacity >= new_capacity {
            return;
        }
        let geometric = if prev_capacity < CAPACITY_DOUBLING_MAX {
            prev_capacity * 2
        } else {
            prev_capacity + (prev_capacity >> 3)
        };
        let new_capacity = new_capacity.max(geometric);
        self.bytes.resize(new_capacity, 0);
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let offset = offset as usize;
        if offset >= self.len {
            return 0;
        }
        let n = buf.len().min(self.len - offset);
        buf[..n].copy_from_slice(&self.bytes[offset..offset + n]);
        n
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> usize {
        let offset = offset as usize;
        let end = offset + data.len();
        self.expand_storage(end);
        self.bytes[offset..end].copy_from_slice(data);
        self.len = self.len.max(end);
        data.len()
    }

    /// Set the file length; growth zero-fills, shrinking keeps the
    /// allocation.
    pub fn set_len(&mut self, len: u64) {
        let len = len as usize;
        if len > self.bytes.len() {
            self.expand_storage(len);
        }
        if len < self.len {
            // Keep the tail zeroed so a later grow reads back zeros.
            self.bytes[len..self.len].fill(0);
        }
        self.len = len;
    }
}

/// The in-memory backend.
#[derive(Debug, Default)]
pub struct MemBackend {
    _priv: (),
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream_ops() -> Arc<dyn StreamOps> {
        Arc::new(MemStreamOps)
    }
}

impl Backend for MemBackend {
    fn getattr(&self, fs: &Vfs, node: NodeId) -> Result<Metadata> {
        fs.node_metadata(node)
    }

    fn setattr(&self, fs: &Vfs, node: NodeId, set: &SetAttr) -> Result<()> {
        if let Some(len) = set.len {
            fs.with_file(node, |buffer| {
                buffer.set_len(len);
                Ok(())
            })?;
        }
        fs.with_node_mut(node, |n| {
            if let Some(mode) = set.mode {
                n.mode = (n.mode & crate::node::S_IFMT) | (mode & 0o7777);
            }
            if let Some(accessed) = set.accessed {
                n.accessed = accessed;
            }
            if let Some(modified) = set.modified {
                n.modified = modified;
            }
        })
    }

    fn lookup(&self, _fs: &Vfs, _parent: NodeId, _name: &str) -> Result<NodeId> {
        // Everything this backend knows is already in the name index.
        Err(FsError::EntryNotFound)
    }

    fn mknod(&self, fs: &Vfs, parent: NodeId, name: &str, mode: u32) -> Result<NodeId> {
        let ft = FileType::from_mode_bits(mode);
        let payload = if ft.is_dir() {
            Payload::empty_dir()
        } else if ft.is_file() {
            Payload::File(FileBuffer::new())
        } else {
            Payload::Device(0)
        };
        fs.insert_node(parent, name, ft, mode, payload)
    }

    fn rename(&self, fs: &Vfs, node: NodeId, new_parent: NodeId, new_name: &str) -> Result<()> {
        fs.relink_node(node, new_parent, new_name)
    }

    fn unlink(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<()> {
        fs.remove_node(parent, name).map(|_| ())
    }

    fn rmdir(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<()> {
        let node = fs.child_of(parent, name).ok_or(FsError::EntryNotFound)?;
        let child_count = fs.with_node(node, |n| match &n.payload {
            Payload::Dir(children) => children.len(),
            _ => 0,
        })?;
        if child_count > 0 {
            return Err(FsError::DirectoryNotEmpty);
        }
        fs.remove_node(parent, name).map(|_| ())
    }

    fn readdir(&self, fs: &Vfs, node: NodeId) -> Result<Vec<DirEntry>> {
        let children: Vec<(String, NodeId)> = fs.with_node(node, |n| match &n.payload {
            Payload::Dir(children) => Ok(children
                .iter()
                .map(|(name, id)| (name.clone(), *id))
                .collect()),
            _ => Err(FsError::NotADirectory),
        })??;

        let mut entries = Vec::with_capacity(children.len());
        for (name, id) in children {
            let ft = fs.with_node(id, |n| n.ft)?;
            entries.push(DirEntry {
                name,
                ino: id as u64,
                ft,
            });
        }
        Ok(entries)
    }

    fn symlink(&self, fs: &Vfs, parent: NodeId, name: &str, target: &str) -> Result<NodeId> {
        fs.insert_node(
            parent,
            name,
            FileType::symlink(),
            crate::node::S_IFLNK | 0o777,
            Payload::Symlink(target.to_string()),
        )
    }

    fn readlink(&self, fs: &Vfs, node: NodeId) -> Result<String> {
        fs.with_node(node, |n| match &n.payload {
            Payload::Symlink(target) => Ok(target.clone()),
            _ => Err(FsError::InvalidInput),
        })?
    }

    fn open(&self, fs: &Vfs, node: NodeId, _flags: OpenFlags) -> Result<Arc<dyn StreamOps>> {
        // Char devices registered in the in-memory tree get their own ops.
        if let Some(ops) = fs.chardev_ops(node) {
            return Ok(ops);
        }
        Ok(Self::stream_ops())
    }
}

/// Stream operations over in-memory file payloads.
#[derive(Debug)]
pub struct MemStreamOps;

impl StreamOps for MemStreamOps {
    fn read(&self, fs: &Vfs, stream: &OpenStream, buf: &mut [u8]) -> Result<usize> {
        let position = stream.position();
        let read = fs.with_file(stream.node, |buffer| Ok(buffer.read_at(position, buf)))?;
        stream.advance(read as u64);
        Ok(read)
    }

    fn write(&self, fs: &Vfs, stream: &OpenStream, buf: &[u8]) -> Result<usize> {
        let position = if stream.flags.contains(OpenFlags::APPEND) {
            let len = fs.with_file(stream.node, |buffer| Ok(buffer.len() as u64))?;
            stream.set_position(len);
            len
        } else {
            stream.position()
        };
        let written = fs.with_file(stream.node, |buffer| Ok(buffer.write_at(position, buf)))?;
        stream.advance(written as u64);
        fs.with_node_mut(stream.node, |n| n.touch_modified())?;
        Ok(written)
    }

    fn llseek(&self, fs: &Vfs, stream: &OpenStream, offset: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => stream.position() as i64,
            Whence::End => fs.with_file(stream.node, |buffer| Ok(buffer.len() as i64))?,
        };
        let target = base.checked_add(offset).ok_or(FsError::InvalidInput)?;
        if target < 0 {
            return Err(FsError::InvalidInput);
        }
        stream.set_position(target as u64);
        Ok(target as u64)
    }

    fn allocate(&self, fs: &Vfs, stream: &OpenStream, len: u64) -> Result<()> {
        fs.with_file(stream.node, |buffer| {
            if (buffer.len() as u64) < len {
                buffer.set_len(len);
            }
            Ok(())
        })
    }

    fn mmap(&self, fs: &Vfs, stream: &OpenStream, offset: u64, len: usize) -> Result<Vec<u8>> {
        fs.with_file(stream.node, |buffer| {
            let mut out = vec![0u8; len];
            buffer.read_at(offset, &mut out);
            Ok(out)
        })
    }

    fn msync(&self, fs: &Vfs, stream: &OpenStream, offset: u64, data: &[u8]) -> Result<()> {
        fs.with_file(stream.node, |buffer| {
            buffer.write_at(offset, data);
            Ok(())
        })
    }

    fn poll(&self, fs: &Vfs, stream: &OpenStream) -> Result<PollFlags> {
        let _ = (fs, stream);
        Ok(PollFlags::POLLIN | PollFlags::POLLOUT)
    }
}
