use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{FsError, NodeId, OpenFlags, Result, StreamOps};

/// A file descriptor as seen by the sandboxed caller.
pub type Fd = u32;

/// Session state of one open descriptor.
///
/// Cloning shares the byte position (`dup` semantics); the descriptor table
/// entry is the unit of ownership and its removal is what triggers
/// [`StreamOps::close`].
#[derive(Debug, Clone)]
pub struct OpenStream {
    pub node: NodeId,
    pub flags: OpenFlags,
    /// Current byte position. Undefined for non-seekable streams.
    pub offset: Arc<AtomicU64>,
    pub seekable: bool,
    pub ops: Arc<dyn StreamOps>,
}

impl OpenStream {
    pub fn new(node: NodeId, flags: OpenFlags, seekable: bool, ops: Arc<dyn StreamOps>) -> Self {
        Self {
            node,
            flags,
            offset: Arc::new(AtomicU64::new(0)),
            seekable,
            ops,
        }
    }

    pub fn position(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn set_position(&self, position: u64) {
        self.offset.store(position, Ordering::Release)
    }

    /// Advance the position by `n` and return the pre-advance position.
    pub fn advance(&self, n: u64) -> u64 {
        self.offset.fetch_add(n, Ordering::AcqRel)
    }
}

/// The descriptor table. Descriptors are allocated lowest-free-first and the
/// table is capped; exhausting it fails with `TooManyOpenFiles`.
#[derive(Debug)]
pub struct Streams {
    entries: Vec<Option<OpenStream>>,
    max_open: usize,
}

impl Streams {
    pub fn new(max_open: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_open,
        }
    }

    fn next_fd(&self) -> Result<Fd> {
        for (fd, entry) in self.entries.iter().enumerate() {
            if entry.is_none() {
                return Ok(fd as Fd);
            }
        }
        if self.entries.len() >= self.max_open {
            return Err(FsError::TooManyOpenFiles);
        }
        Ok(self.entries.len() as Fd)
    }

    pub fn insert(&mut self, stream: OpenStream) -> Result<Fd> {
        let fd = self.next_fd()?;
        if fd as usize == self.entries.len() {
            self.entries.push(Some(stream));
        } else {
            self.entries[fd as usize] = Some(stream);
        }
        Ok(fd)
    }

    /// Place `stream` at a specific descriptor (`dup2`). Any previous entry
    /// is returned so the caller can release it.
    pub fn insert_at(&mut self, fd: Fd, stream: OpenStream) -> Result<Option<OpenStream>> {
        let fd = fd as usize;
        if fd >= self.max_open {
            return Err(FsError::TooManyOpenFiles);
        }
        if fd >= self.entries.len() {
            self.entries.resize_with(fd + 1, || None);
        }
        Ok(self.entries[fd].replace(stream))
    }

    pub fn get(&self, fd: Fd) -> Result<&OpenStream> {
        self.entries
            .get(fd as usize)
            .and_then(|e| e.as_ref())
            .ok_or(FsError::InvalidFd)
    }

    /// Remove the entry. The caller must invoke `ops.close` on the returned
    /// stream exactly once; a missing entry is the caller's error (`EBADF`),
    /// not an invariant violation.
    pub fn remove(&mut self, fd: Fd) -> Result<OpenStream> {
        self.entries
            .get_mut(fd as usize)
            .and_then(|e| e.take())
            .ok_or(FsError::InvalidFd)
    }

    pub fn contains(&self, fd: Fd) -> bool {
        self.get(fd).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StreamOps;

    #[derive(Debug)]
    struct NullOps;

    impl StreamOps for NullOps {
        fn read(&self, _: &crate::Vfs, _: &OpenStream, _: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
        fn write(&self, _: &crate::Vfs, _: &OpenStream, buf: &[u8]) -> Result<usize> {
            Ok(buf.len())
        }
    }

    fn stream() -> OpenStream {
        OpenStream::new(0, OpenFlags::READ_WRITE, true, Arc::new(NullOps))
    }

    #[test]
    fn lowest_free_fd_is_reused() {
        let mut streams = Streams::new(16);
        let a = streams.insert(stream()).unwrap();
        let b = streams.insert(stream()).unwrap();
        let c = streams.insert(stream()).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        streams.remove(b).unwrap();
        assert_eq!(streams.insert(stream()).unwrap(), b, "freed fd is reused");
    }

    #[test]
    fn table_is_capped() {
        let mut streams = Streams::new(2);
        streams.insert(stream()).unwrap();
        streams.insert(stream()).unwrap();
        assert_eq!(streams.insert(stream()), Err(FsError::TooManyOpenFiles));
    }

    #[test]
    fn dup_shares_the_offset() {
        let mut streams = Streams::new(4);
        let fd = streams.insert(stream()).unwrap();
        let dup = streams.get(fd).unwrap().clone();
        let dup_fd = streams.insert(dup).unwrap();

        streams.get(fd).unwrap().set_position(7);
        assert_eq!(streams.get(dup_fd).unwrap().position(), 7);
    }

    #[test]
    fn bad_fd_is_an_error() {
        let mut streams = Streams::new(4);
        assert_eq!(streams.remove(3).unwrap_err(), FsError::InvalidFd);
        assert!(streams.get(0).is_err());
    }
}
