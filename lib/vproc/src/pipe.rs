//! Bucket pipes. A pipe is an ordered run of fixed-size buckets shared by a
//! read end and a write end; writers append at the back, readers drain from
//! the front, and fully-drained buckets are recycled. The readable byte
//! count is always the sum of unread bytes across buckets.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use sandos_vfs::{FsError, OpenStream, PollFlags, StreamOps, Vfs};
use sandos_vio::{InterestSet, InterestType};

/// Default bucket payload size.
pub const BUCKET_BUFFER_SIZE: usize = 8192;

#[derive(Debug)]
struct Bucket {
    buffer: Vec<u8>,
    /// Write offset: bytes filled so far.
    offset: usize,
    /// Read offset: bytes already consumed.
    roffset: usize,
}

impl Bucket {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0; size],
            offset: 0,
            roffset: 0,
        }
    }

    fn unread(&self) -> usize {
        self.offset - self.roffset
    }
}

#[derive(Debug)]
struct PipeInner {
    buckets: VecDeque<Bucket>,
    readers: usize,
    writers: usize,
}

#[derive(Debug)]
pub struct Pipe {
    inner: Mutex<PipeInner>,
    interests: InterestSet,
    bucket_size: usize,
}

impl Pipe {
    pub fn new(bucket_size: usize) -> Arc<Self> {
        let mut buckets = VecDeque::new();
        buckets.push_back(Bucket::new(bucket_size));
        Arc::new(Self {
            inner: Mutex::new(PipeInner {
                buckets,
                readers: 1,
                writers: 1,
            }),
            interests: InterestSet::new(),
            bucket_size,
        })
    }

    pub fn interests(&self) -> InterestSet {
        self.interests.clone()
    }

    /// Unread bytes across all buckets.
    pub fn available(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.buckets.iter().map(Bucket::unread).sum()
    }

    /// Append to the last bucket, allocating new fixed-size buckets for the
    /// overflow.
    pub fn write(&self, data: &[u8]) -> Result<usize, FsError> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.readers == 0 {
            return Err(FsError::BrokenPipe);
        }

        let mut data = data;
        if inner.buckets.is_empty() {
            inner.buckets.push_back(Bucket::new(self.bucket_size));
        }
        let written = data.len();

        let tail = inner.buckets.back_mut().expect("at least one bucket");
        assert!(tail.offset <= self.bucket_size, "bucket overfilled");
        let free = self.bucket_size - tail.offset;
        let take = free.min(data.len());
        tail.buffer[tail.offset..tail.offset + take].copy_from_slice(&data[..take]);
        tail.offset += take;
        data = &data[take..];

        while !data.is_empty() {
            let take = self.bucket_size.min(data.len());
            let mut bucket = Bucket::new(self.bucket_size);
            bucket.buffer[..take].copy_from_slice(&data[..take]);
            bucket.offset = take;
            inner.buckets.push_back(bucket);
            data = &data[take..];
        }

        self.interests.push(InterestType::Readable);
        Ok(written)
    }

    /// Drain from the front buckets. With no data buffered this is EOF once
    /// no write end remains, and `WouldBlock` while one does; telling those
    /// apart is what makes shell-style piping work.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, FsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock().unwrap();
        let available: usize = inner.buckets.iter().map(Bucket::unread).sum();
        if available == 0 {
            if inner.writers == 0 {
                return Ok(0);
            }
            return Err(FsError::WouldBlock);
        }

        let mut to_read = available.min(buf.len());
        let total = to_read;
        let mut out = 0;
        let mut drained = 0;

        for bucket in inner.buckets.iter_mut() {
            if to_read == 0 {
                break;
            }
            let take = bucket.unread().min(to_read);
            buf[out..out + take].copy_from_slice(&bucket.buffer[bucket.roffset..bucket.roffset + take]);
            bucket.roffset += take;
            out += take;
            to_read -= take;
            if bucket.unread() == 0 {
                drained += 1;
            }
        }

        // Recycle drained buckets, but keep (and reset) the last one so the
        // pipe always has a tail to append to.
        if drained > 0 && drained == inner.buckets.len() {
            drained -= 1;
            let last = inner.buckets.back_mut().expect("bucket exists");
            last.offset = 0;
            last.roffset = 0;
        }
        inner.buckets.drain(..drained);

        self.interests.push(InterestType::Writable);
        Ok(total)
    }

    pub fn poll_read_end(&self) -> PollFlags {
        if self.available() > 0 {
            PollFlags::POLLIN
        } else if self.inner.lock().unwrap().writers == 0 {
            PollFlags::POLLHUP
        } else {
            PollFlags::empty()
        }
    }

    pub fn poll_write_end(&self) -> PollFlags {
        if self.inner.lock().unwrap().readers == 0 {
            PollFlags::POLLERR
        } else {
            PollFlags::POLLOUT
        }
    }

    fn close_end(&self, end: PipeEnd) {
        let mut inner = self.inner.lock().unwrap();
        match end {
            PipeEnd::Read => inner.readers = inner.readers.saturating_sub(1),
            PipeEnd::Write => inner.writers = inner.writers.saturating_sub(1),
        }
        if inner.readers == 0 && inner.writers == 0 {
            inner.buckets.clear();
        }
        // Wake a reader blocked on an emptied, writer-less pipe.
        self.interests.push(InterestType::Closed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

/// Stream operations for one end of a pipe.
#[derive(Debug)]
pub struct PipeStreamOps {
    pipe: Arc<Pipe>,
    end: PipeEnd,
}

impl PipeStreamOps {
    pub fn pair(bucket_size: usize) -> (PipeStreamOps, PipeStreamOps) {
        let pipe = Pipe::new(bucket_size);
        (
            PipeStreamOps {
                pipe: pipe.clone(),
                end: PipeEnd::Read,
            },
            PipeStreamOps {
                pipe,
                end: PipeEnd::Write,
            },
        )
    }

    pub fn pipe(&self) -> &Arc<Pipe> {
        &self.pipe
    }

    pub fn end(&self) -> PipeEnd {
        self.end
    }
}

impl StreamOps for PipeStreamOps {
    fn read(&self, _fs: &Vfs, _stream: &OpenStream, buf: &mut [u8]) -> Result<usize, FsError> {
        if self.end != PipeEnd::Read {
            return Err(FsError::InvalidFd);
        }
        self.pipe.read(buf)
    }

    fn write(&self, _fs: &Vfs, _stream: &OpenStream, buf: &[u8]) -> Result<usize, FsError> {
        if self.end != PipeEnd::Write {
            return Err(FsError::InvalidFd);
        }
        self.pipe.write(buf)
    }

    fn poll(&self, _fs: &Vfs, _stream: &OpenStream) -> Result<PollFlags, FsError> {
        Ok(match self.end {
            PipeEnd::Read => self.pipe.poll_read_end(),
            PipeEnd::Write => self.pipe.poll_write_end(),
        })
    }

    fn close(&self, _fs: &Vfs, _stream: &OpenStream) -> Result<(), FsError> {
        self.pipe.close_end(self.end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_write_then_read_round_trips() {
        let pipe = Pipe::new(BUCKET_BUFFER_SIZE);
        assert_eq!(pipe.write(b"hello").unwrap(), 5);
        assert_eq!(pipe.available(), 5);

        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(pipe.available(), 0);
    }

    #[test]
    fn writes_spill_across_buckets() {
        let pipe = Pipe::new(4);
        assert_eq!(pipe.write(b"0123456789").unwrap(), 10);
        assert_eq!(pipe.available(), 10);

        let mut buf = [0u8; 3];
        assert_eq!(pipe.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"012");

        let mut rest = [0u8; 16];
        assert_eq!(pipe.read(&mut rest).unwrap(), 7);
        assert_eq!(&rest[..7], b"3456789");
    }

    #[test]
    fn interleaved_reads_and_writes_preserve_order() {
        let pipe = Pipe::new(4);
        pipe.write(b"abc").unwrap();
        let mut buf = [0u8; 2];
        pipe.read(&mut buf).unwrap();
        pipe.write(b"defgh").unwrap();

        let mut rest = [0u8; 16];
        let n = pipe.read(&mut rest).unwrap();
        assert_eq!(&rest[..n], b"cdefgh");
    }

    #[test]
    fn empty_pipe_blocks_until_the_writer_closes() {
        let pipe = Pipe::new(BUCKET_BUFFER_SIZE);
        let mut buf = [0u8; 4];
        assert_eq!(
            pipe.read(&mut buf),
            Err(FsError::WouldBlock),
            "both ends open and no data is a transient condition",
        );

        pipe.write(b"tail").unwrap();
        pipe.close_end(PipeEnd::Write);

        assert_eq!(pipe.read(&mut buf).unwrap(), 4, "buffered bytes drain first");
        assert_eq!(&buf, b"tail");
        assert_eq!(pipe.read(&mut buf).unwrap(), 0, "then end-of-file");
    }

    #[test]
    fn write_with_no_reader_breaks_the_pipe() {
        let pipe = Pipe::new(BUCKET_BUFFER_SIZE);
        pipe.close_end(PipeEnd::Read);
        assert_eq!(pipe.write(b"x"), Err(FsError::BrokenPipe));
    }

    #[test]
    fn poll_masks_track_both_ends() {
        let pipe = Pipe::new(BUCKET_BUFFER_SIZE);
        assert_eq!(pipe.poll_read_end(), PollFlags::empty());
        assert_eq!(pipe.poll_write_end(), PollFlags::POLLOUT);

        pipe.write(b"x").unwrap();
        assert_eq!(pipe.poll_read_end(), PollFlags::POLLIN);

        let mut buf = [0u8; 1];
        pipe.read(&mut buf).unwrap();
        pipe.close_end(PipeEnd::Write);
        assert_eq!(pipe.poll_read_end(), PollFlags::POLLHUP);
    }

    #[test]
    fn bucket_recycling_keeps_a_tail() {
        let pipe = Pipe::new(4);
        pipe.write(b"01234567").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf).unwrap(), 8);

        // Fully drained: one reset bucket remains for the next write.
        assert_eq!(pipe.inner.lock().unwrap().buckets.len(), 1);
        pipe.write(b"ab").unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(pipe.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ab");
    }
}
