//! Bridges sockets into the virtual filesystem's stream layer so a socket
//! descriptor behaves like any other: `read` receives, `write` sends on the
//! connected peer, `poll` reports the readiness mask, `close` releases the
//! peers deterministically.

use std::sync::Arc;

use sandos_vfs::{FsError, OpenStream, PollFlags, StreamOps, Vfs};

use crate::{Socket, TransportFactory};

/// `ioctl` request reporting the byte count of the next queued message.
pub const FIONREAD: u32 = 0x541B;

#[derive(Debug)]
pub struct SocketStreamOps {
    socket: Arc<Socket>,
    factory: Arc<dyn TransportFactory>,
}

impl SocketStreamOps {
    pub fn new(socket: Arc<Socket>, factory: Arc<dyn TransportFactory>) -> Self {
        Self { socket, factory }
    }

    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    pub fn factory(&self) -> &Arc<dyn TransportFactory> {
        &self.factory
    }
}

impl StreamOps for SocketStreamOps {
    fn read(&self, _fs: &Vfs, _stream: &OpenStream, buf: &mut [u8]) -> Result<usize, FsError> {
        match self.socket.recv_msg(buf.len()) {
            Ok(Some(datagram)) => {
                buf[..datagram.data.len()].copy_from_slice(&datagram.data);
                Ok(datagram.data.len())
            }
            Ok(None) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, _fs: &Vfs, _stream: &OpenStream, buf: &[u8]) -> Result<usize, FsError> {
        self.socket
            .send_msg(&*self.factory, buf, None)
            .map_err(Into::into)
    }

    fn poll(&self, _fs: &Vfs, _stream: &OpenStream) -> Result<PollFlags, FsError> {
        Ok(self.socket.poll_mask())
    }

    fn ioctl(
        &self,
        _fs: &Vfs,
        _stream: &OpenStream,
        request: u32,
        arg: &mut [u8],
    ) -> Result<i32, FsError> {
        match request {
            FIONREAD => {
                let queued = self.socket.bytes_queued() as u32;
                if arg.len() < 4 {
                    return Err(FsError::InvalidInput);
                }
                arg[..4].copy_from_slice(&queued.to_le_bytes());
                Ok(0)
            }
            _ => Err(FsError::NotSupported),
        }
    }

    fn close(&self, _fs: &Vfs, _stream: &OpenStream) -> Result<(), FsError> {
        self.socket.close();
        Ok(())
    }
}
