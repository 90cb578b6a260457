//! Socket syscalls. Everything here operates on the socket behind the
//! descriptor; `ENOTSOCK` is the answer for anything else.

use sandos_vfs::{Fd, OpenFlags, PollFlags};
use sandos_vnet::{NetError, Socket, SocketKind};
use tracing::trace;

use super::SysResult;
use crate::{abi, Errno, GuestMemory, Kernel};

pub(crate) fn sys_socket(kernel: &Kernel, family: u16, ty: u32, protocol: u32) -> SysResult {
    if family != abi::AF_INET {
        return Err(Errno::EINVAL);
    }
    // High bits carry open-flag modifiers; the low bits are the type.
    let kind = match ty & 0xff {
        abi::SOCK_STREAM => SocketKind::Stream,
        abi::SOCK_DGRAM => SocketKind::Dgram,
        _ => return Err(Errno::EPROTONOSUPPORT),
    };
    if kind == SocketKind::Stream && protocol != 0 && protocol != 6 {
        return Err(Errno::EPROTONOSUPPORT);
    }
    let socket = Socket::new(kind, family, protocol);
    let fd = kernel.install_socket(socket, OpenFlags::READ_WRITE)?;
    trace!(fd, ?kind, "socket created");
    Ok(fd as i32)
}

pub(crate) fn sys_bind(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    addr_ptr: u64,
) -> SysResult {
    let (host, port) = abi::read_sockaddr(mem, addr_ptr)?;
    let socket = kernel.socket_for_fd(fd)?;
    socket.bind(&**kernel.transports(), &host, port)?;
    Ok(0)
}

pub(crate) fn sys_listen(kernel: &Kernel, fd: Fd) -> SysResult {
    let socket = kernel.socket_for_fd(fd)?;
    socket.listen(&**kernel.transports())?;
    Ok(0)
}

pub(crate) fn sys_connect(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    addr_ptr: u64,
) -> SysResult {
    let (host, port) = abi::read_sockaddr(mem, addr_ptr)?;
    let socket = kernel.socket_for_fd(fd)?;
    match socket.connect(&**kernel.transports(), &host, port) {
        Ok(()) => Ok(0),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn sys_accept(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    addr_ptr: u64,
    addrlen_ptr: u64,
) -> SysResult {
    let listener_flags = kernel.vfs().stream(fd)?.flags;
    let socket = kernel.socket_for_fd(fd)?;

    let child = match socket.accept() {
        Ok(child) => child,
        Err(NetError::WouldBlock) if !listener_flags.contains(OpenFlags::NONBLOCK) => {
            kernel.bridge().block_on(
                socket.wait_readiness(PollFlags::POLLIN, Some(kernel.config().socket_timeout)),
            );
            socket.accept().map_err(Errno::from)?
        }
        Err(err) => return Err(err.into()),
    };

    // The accepted socket inherits the listener's descriptor flags.
    let child_fd = kernel.install_socket(child.clone(), listener_flags)?;
    if addr_ptr != 0 {
        if let Some((host, port)) = child.remote_addr() {
            abi::write_sockaddr(mem, addr_ptr, &host, port)?;
            mem.write_u32(addrlen_ptr, abi::SOCKADDR_SIZE as u32)?;
        }
    }
    trace!(fd, child_fd, "connection accepted");
    Ok(child_fd as i32)
}

pub(crate) fn sys_sendto(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    buf_ptr: u64,
    len: u64,
    addr_ptr: u64,
) -> SysResult {
    let data = mem.read_vec(buf_ptr, len as usize)?;
    let to = if addr_ptr != 0 {
        Some(abi::read_sockaddr(mem, addr_ptr)?)
    } else {
        None
    };
    let flags = kernel.vfs().stream(fd)?.flags;
    let socket = kernel.socket_for_fd(fd)?;

    match socket.send_msg(&**kernel.transports(), &data, to.clone()) {
        Ok(n) => Ok(n as i32),
        Err(NetError::WouldBlock) if !flags.contains(OpenFlags::NONBLOCK) => {
            kernel.bridge().block_on(
                socket.wait_readiness(PollFlags::POLLOUT, Some(kernel.config().socket_timeout)),
            );
            socket
                .send_msg(&**kernel.transports(), &data, to)
                .map(|n| n as i32)
                .map_err(Errno::from)
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn sys_recvfrom(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    buf_ptr: u64,
    len: u64,
    addr_ptr: u64,
    addrlen_ptr: u64,
) -> SysResult {
    let flags = kernel.vfs().stream(fd)?.flags;
    let socket = kernel.socket_for_fd(fd)?;

    let received = match socket.recv_msg(len as usize) {
        Ok(datagram) => datagram,
        Err(NetError::WouldBlock) if !flags.contains(OpenFlags::NONBLOCK) => {
            kernel.bridge().block_on(
                socket.wait_readiness(PollFlags::POLLIN, Some(kernel.config().socket_timeout)),
            );
            socket.recv_msg(len as usize).map_err(Errno::from)?
        }
        Err(err) => return Err(err.into()),
    };

    match received {
        None => Ok(0),
        Some(datagram) => {
            mem.write(buf_ptr, &datagram.data)?;
            if addr_ptr != 0 {
                abi::write_sockaddr(mem, addr_ptr, &datagram.addr, datagram.port)?;
                mem.write_u32(addrlen_ptr, abi::SOCKADDR_SIZE as u32)?;
            }
            Ok(datagram.data.len() as i32)
        }
    }
}

pub(crate) fn sys_shutdown(kernel: &Kernel, fd: Fd) -> SysResult {
    let socket = kernel.socket_for_fd(fd)?;
    socket.shutdown()?;
    Ok(0)
}

pub(crate) fn sys_getsockname(
    kernel: &Kernel,
    mem: &dyn GuestMemory,
    fd: Fd,
    addr_ptr: u64,
    addrlen_ptr: u64,
    peer: bool,
) -> SysResult {
    let socket = kernel.socket_for_fd(fd)?;
    let addr = if peer {
        socket.remote_addr().ok_or(Errno::ENOTCONN)?
    } else {
        socket
            .local_addr()
            .unwrap_or_else(|| ("0.0.0.0".to_string(), 0))
    };
    abi::write_sockaddr(mem, addr_ptr, &addr.0, addr.1)?;
    mem.write_u32(addrlen_ptr, abi::SOCKADDR_SIZE as u32)?;
    Ok(0)
}
