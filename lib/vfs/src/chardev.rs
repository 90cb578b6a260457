//! Callback-backed character devices.

use std::sync::Mutex;

use crate::{FsError, OpenStream, Result, StreamOps, Vfs};

type ReadFn = dyn FnMut(&mut [u8]) -> Result<usize> + Send;
type WriteFn = dyn FnMut(&[u8]) -> Result<usize> + Send;

/// A char device driven by a pair of closures, one per direction. Either
/// side may be absent, in which case that direction fails with
/// `NotSupported`.
pub struct FnDevice {
    read: Option<Mutex<Box<ReadFn>>>,
    write: Option<Mutex<Box<WriteFn>>>,
}

impl FnDevice {
    pub fn new(
        read: Option<Box<ReadFn>>,
        write: Option<Box<WriteFn>>,
    ) -> Self {
        Self {
            read: read.map(Mutex::new),
            write: write.map(Mutex::new),
        }
    }

    /// A device that swallows writes and reads nothing, `/dev/null` style.
    pub fn null() -> Self {
        Self::new(
            Some(Box::new(|_buf| Ok(0))),
            Some(Box::new(|buf| Ok(buf.len()))),
        )
    }

    /// A write-only device feeding bytes into `sink`.
    pub fn sink(mut sink: impl FnMut(&[u8]) + Send + 'static) -> Self {
        Self::new(
            None,
            Some(Box::new(move |buf| {
                sink(buf);
                Ok(buf.len())
            })),
        )
    }
}

impl std::fmt::Debug for FnDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnDevice")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .finish()
    }
}

impl StreamOps for FnDevice {
    fn read(&self, _fs: &Vfs, _stream: &OpenStream, buf: &mut [u8]) -> Result<usize> {
        match &self.read {
            Some(read) => {
                let mut f = read.lock().map_err(|_| FsError::Lock)?;
                (*f)(buf)
            }
            None => Err(FsError::NotSupported),
        }
    }

    fn write(&self, _fs: &Vfs, _stream: &OpenStream, buf: &[u8]) -> Result<usize> {
        match &self.write {
            Some(write) => {
                let mut f = write.lock().map_err(|_| FsError::Lock)?;
                (*f)(buf)
            }
            None => Err(FsError::NotSupported),
        }
    }
}
