//! BSD-socket semantics over message-oriented duplex transports.
//!
//! A socket owns a map of peers keyed by remote `(address, port)`; each peer
//! is one live transport plus the datagrams queued before it opened.
//! Host-side transport callbacks only raise interests; all socket state is
//! mutated here, on the caller's turn.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use sandos_vfs::PollFlags;
use sandos_vio::{InterestSet, InterestType, WaitAny};
use tracing::trace;

use crate::{Acceptor, NetError, Result, Transport, TransportFactory, TransportState};

/// The 10-byte control frame a bound datagram socket sends first on every
/// new transport: four `0xFF` bytes, the ASCII tag `port`, then the logical
/// source port big-endian. Connection-oriented carriers have no other way to
/// convey the datagram source port.
pub const PORT_CONTROL_LEN: usize = 10;
const PORT_CONTROL_TAG: [u8; 8] = [0xff, 0xff, 0xff, 0xff, b'p', b'o', b'r', b't'];

pub fn port_control_frame(port: u16) -> Bytes {
    let mut frame = Vec::with_capacity(PORT_CONTROL_LEN);
    frame.extend_from_slice(&PORT_CONTROL_TAG);
    frame.push((port >> 8) as u8);
    frame.push(port as u8);
    Bytes::from(frame)
}

pub fn parse_port_control(frame: &[u8]) -> Option<u16> {
    if frame.len() != PORT_CONTROL_LEN || frame[..8] != PORT_CONTROL_TAG {
        return None;
    }
    Some(((frame[8] as u16) << 8) | frame[9] as u16)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SocketKind {
    Stream,
    Dgram,
}

/// One received message with its source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub addr: String,
    pub port: u16,
    pub data: Bytes,
}

struct Peer {
    addr: String,
    port: u16,
    transport: Arc<dyn Transport>,
    /// Outbound datagrams queued until the transport reaches `Open`.
    dgram_send_queue: VecDeque<Bytes>,
    /// The first inbound frame may be a port renegotiation and is then
    /// consumed rather than delivered.
    saw_first_frame: bool,
}

struct SocketInner {
    local: Option<(String, u16)>,
    remote: Option<(String, u16)>,
    peers: HashMap<(String, u16), Peer>,
    pending: VecDeque<Arc<Socket>>,
    recv_queue: VecDeque<Datagram>,
    acceptor: Option<Arc<dyn Acceptor>>,
    error: Option<NetError>,
    closed: bool,
}

/// An emulated socket. State machine:
/// `Unbound -> Bound -> {Listening | Connecting -> Connected} -> Closed`.
pub struct Socket {
    kind: SocketKind,
    family: u16,
    protocol: u32,
    inner: Mutex<SocketInner>,
    /// Socket-level events (pending connection, queued message).
    interests: InterestSet,
}

impl Socket {
    pub fn new(kind: SocketKind, family: u16, protocol: u32) -> Arc<Self> {
        Arc::new(Self {
            kind,
            family,
            protocol,
            inner: Mutex::new(SocketInner {
                local: None,
                remote: None,
                peers: HashMap::new(),
                pending: VecDeque::new(),
                recv_queue: VecDeque::new(),
                acceptor: None,
                error: None,
                closed: false,
            }),
            interests: InterestSet::new(),
        })
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn family(&self) -> u16 {
        self.family
    }

    pub fn protocol(&self) -> u32 {
        self.protocol
    }

    pub fn local_addr(&self) -> Option<(String, u16)> {
        self.inner.lock().unwrap().local.clone()
    }

    pub fn remote_addr(&self) -> Option<(String, u16)> {
        self.inner.lock().unwrap().remote.clone()
    }

    pub fn interests(&self) -> InterestSet {
        self.interests.clone()
    }

    /// Assign the local address. For datagram sockets this idempotently
    /// starts the inbound listener; carriers that cannot listen are
    /// tolerated.
    pub fn bind(&self, factory: &dyn TransportFactory, addr: &str, port: u16) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.local.is_some() {
                return Err(NetError::InvalidInput);
            }
            inner.local = Some((addr.to_string(), port));
        }
        if self.kind == SocketKind::Dgram {
            match self.listen(factory) {
                Ok(()) | Err(NetError::Unsupported) => (),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Open the server-side acceptor for this socket's local address.
    pub fn listen(&self, factory: &dyn TransportFactory) -> Result<()> {
        let local = {
            let inner = self.inner.lock().unwrap();
            if inner.acceptor.is_some() {
                return Err(NetError::InvalidInput);
            }
            inner.local.clone().ok_or(NetError::AddressNotAvailable)?
        };
        let acceptor = factory.listen(&local.0, local.1)?;
        self.inner.lock().unwrap().acceptor = Some(acceptor);
        trace!(addr = %local.0, port = local.1, "socket listening");
        Ok(())
    }

    /// Create a peer towards `addr:port`. Transport establishment is
    /// asynchronous, so this surfaces `InProgress` instead of blocking; the
    /// caller polls to observe completion.
    pub fn connect(&self, factory: &dyn TransportFactory, addr: &str, port: u16) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.acceptor.is_some() && self.kind == SocketKind::Stream {
                return Err(NetError::Unsupported);
            }
            if let Some(remote) = &inner.remote {
                if let Some(peer) = inner.peers.get(remote) {
                    return match peer.transport.state() {
                        TransportState::Connecting => Err(NetError::Already),
                        _ => Err(NetError::AlreadyConnected),
                    };
                }
            }
        }

        let peer = self.create_peer(factory, addr, port)?;
        let mut inner = self.inner.lock().unwrap();
        inner.remote = Some(peer.clone());
        drop(inner);
        Err(NetError::InProgress)
    }

    /// Build a peer over a fresh transport and register it. Returns the peer
    /// key. A bound datagram socket front-queues its port renegotiation
    /// frame so it is the first thing on the wire.
    fn create_peer(
        &self,
        factory: &dyn TransportFactory,
        addr: &str,
        port: u16,
    ) -> Result<(String, u16)> {
        let transport = factory.connect(addr, port)?;
        self.adopt_transport(transport, Some((addr.to_string(), port)))
    }

    /// Register an existing transport (outbound or inbound) as a peer.
    fn adopt_transport(
        &self,
        transport: Arc<dyn Transport>,
        addr: Option<(String, u16)>,
    ) -> Result<(String, u16)> {
        let (addr, port) = addr.unwrap_or_else(|| transport.remote_addr());
        let mut inner = self.inner.lock().unwrap();
        let mut queue = VecDeque::new();
        if self.kind == SocketKind::Dgram {
            if let Some((_, sport)) = &inner.local {
                queue.push_back(port_control_frame(*sport));
            }
        }
        inner.peers.insert(
            (addr.clone(), port),
            Peer {
                addr: addr.clone(),
                port,
                transport,
                dgram_send_queue: queue,
                saw_first_frame: false,
            },
        );
        trace!(addr = %addr, port, "peer created");
        Ok((addr, port))
    }

    /// Pop one pending connection, or fail with `WouldBlock` when none is
    /// available yet.
    pub fn accept(&self) -> Result<Arc<Socket>> {
        self.pump();
        let mut inner = self.inner.lock().unwrap();
        if inner.acceptor.is_none() {
            return Err(NetError::InvalidInput);
        }
        inner.pending.pop_front().ok_or(NetError::WouldBlock)
    }

    pub fn send_msg(
        &self,
        factory: &dyn TransportFactory,
        data: &[u8],
        to: Option<(String, u16)>,
    ) -> Result<usize> {
        self.pump();
        let dest = match self.kind {
            SocketKind::Dgram => to
                .or_else(|| self.remote_addr())
                .ok_or(NetError::DestinationRequired)?,
            SocketKind::Stream => self.remote_addr().ok_or(NetError::NotConnected)?,
        };

        if self.kind == SocketKind::Stream {
            let inner = self.inner.lock().unwrap();
            let peer = inner.peers.get(&dest);
            match peer.map(|p| p.transport.state()) {
                None | Some(TransportState::Closing) | Some(TransportState::Closed) => {
                    return Err(NetError::NotConnected);
                }
                Some(TransportState::Connecting) => return Err(NetError::WouldBlock),
                Some(TransportState::Open) => (),
            }
            let peer = peer.expect("checked above");
            peer.transport.send(Bytes::copy_from_slice(data))?;
            return Ok(data.len());
        }

        // Datagram path: queue on a not-yet-open peer, re-create a dead one.
        let state = {
            let inner = self.inner.lock().unwrap();
            inner.peers.get(&dest).map(|p| p.transport.state())
        };
        let dest = match state {
            None | Some(TransportState::Closing) | Some(TransportState::Closed) => {
                self.create_peer(factory, &dest.0, dest.1)?
            }
            _ => dest,
        };

        let mut inner = self.inner.lock().unwrap();
        let peer = inner.peers.get_mut(&dest).ok_or(NetError::UnknownError)?;
        if peer.transport.state() != TransportState::Open {
            peer.dgram_send_queue.push_back(Bytes::copy_from_slice(data));
            return Ok(data.len());
        }
        // Anything queued before the transport opened goes first, the port
        // renegotiation frame in particular.
        while let Some(frame) = peer.dgram_send_queue.pop_front() {
            peer.transport.send(frame)?;
        }
        peer.transport.send(Bytes::copy_from_slice(data))?;
        Ok(data.len())
    }

    /// Pop the next inbound message. `Ok(None)` is end-of-stream; an empty
    /// queue on a live connection is `WouldBlock`.
    pub fn recv_msg(&self, max_len: usize) -> Result<Option<Datagram>> {
        self.pump();
        let mut inner = self.inner.lock().unwrap();
        if self.kind == SocketKind::Stream && inner.acceptor.is_some() {
            return Err(NetError::NotConnected);
        }

        let mut queued = match inner.recv_queue.pop_front() {
            Some(queued) => queued,
            None => {
                if self.kind == SocketKind::Stream {
                    let remote = inner.remote.clone().ok_or(NetError::NotConnected)?;
                    return match inner.peers.get(&remote).map(|p| p.transport.state()) {
                        None => Err(NetError::NotConnected),
                        Some(TransportState::Closing) | Some(TransportState::Closed) => Ok(None),
                        _ => Err(NetError::WouldBlock),
                    };
                }
                return Err(NetError::WouldBlock);
            }
        };

        if queued.data.len() > max_len {
            let rest = queued.data.split_off(max_len);
            // Stream sockets keep the unread tail for the next read;
            // datagram reads truncate.
            if self.kind == SocketKind::Stream {
                inner.recv_queue.push_front(Datagram {
                    addr: queued.addr.clone(),
                    port: queued.port,
                    data: rest,
                });
            }
        }
        Ok(Some(queued))
    }

    /// Shut down the active peer connection.
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let remote = inner.remote.clone().ok_or(NetError::NotConnected)?;
        let peer = inner.peers.remove(&remote).ok_or(NetError::NotConnected)?;
        peer.transport.close();
        Ok(())
    }

    /// Release every resource: the acceptor, all peer transports, queued
    /// data. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.closed = true;
        if let Some(acceptor) = inner.acceptor.take() {
            acceptor.close();
        }
        for (_, peer) in inner.peers.drain() {
            peer.transport.close();
        }
        inner.recv_queue.clear();
        inner.pending.clear();
    }

    /// Byte length of the frontmost queued message (`FIONREAD`).
    pub fn bytes_queued(&self) -> usize {
        self.pump();
        let inner = self.inner.lock().unwrap();
        inner.recv_queue.front().map(|d| d.data.len()).unwrap_or(0)
    }

    /// Drain host-side transport events into socket state: flush datagram
    /// queues on newly opened transports, intercept port renegotiations,
    /// queue inbound payloads, fold inbound connections into the pending
    /// queue. Runs on the caller's turn only.
    pub fn pump(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if inner.closed {
            return;
        }

        // Inbound connections.
        if let Some(acceptor) = inner.acceptor.clone() {
            while let Some(transport) = acceptor.try_accept() {
                match self.kind {
                    SocketKind::Stream => {
                        let child = Socket::new(self.kind, self.family, self.protocol);
                        let key = child
                            .adopt_transport(transport, None)
                            .expect("adopting an accepted transport cannot fail");
                        child.inner.lock().unwrap().remote = Some(key);
                        inner.pending.push_back(child);
                        self.interests.push(InterestType::Readable);
                    }
                    SocketKind::Dgram => {
                        let (addr, port) = transport.remote_addr();
                        let mut queue = VecDeque::new();
                        if let Some((_, sport)) = &inner.local {
                            queue.push_back(port_control_frame(*sport));
                        }
                        inner.peers.insert(
                            (addr.clone(), port),
                            Peer {
                                addr,
                                port,
                                transport,
                                dgram_send_queue: queue,
                                saw_first_frame: false,
                            },
                        );
                    }
                }
            }
        }

        // Peer transports.
        let keys: Vec<(String, u16)> = inner.peers.keys().cloned().collect();
        for mut key in keys {
            loop {
                let mut saw_error = false;
                let step = {
                    let peer = match inner.peers.get_mut(&key) {
                        Some(peer) => peer,
                        None => break,
                    };

                    if peer.transport.interests().pop(InterestType::Error) {
                        saw_error = true;
                        None
                    } else {
                        if peer.transport.state() == TransportState::Open
                            && !peer.dgram_send_queue.is_empty()
                        {
                            while let Some(frame) = peer.dgram_send_queue.pop_front() {
                                if peer.transport.send(frame).is_err() {
                                    peer.transport.close();
                                    break;
                                }
                            }
                        }

                        match peer.transport.try_recv() {
                            Some(frame) => {
                                let first = !peer.saw_first_frame;
                                // Empty frames are dropped without spending
                                // the first-frame slot.
                                if !frame.is_empty() {
                                    peer.saw_first_frame = true;
                                }
                                Some((frame, first, peer.addr.clone(), peer.port))
                            }
                            None => None,
                        }
                    }
                };

                if saw_error {
                    inner.error = Some(NetError::ConnectionRefused);
                    break;
                }
                let (frame, first, addr, port) = match step {
                    Some(step) => step,
                    None => break,
                };
                if frame.is_empty() {
                    continue;
                }

                if first {
                    if let Some(new_port) = parse_port_control(&frame) {
                        // Re-key the peer under its renegotiated source
                        // port; the frame itself is never delivered.
                        let mut peer = inner.peers.remove(&key).expect("peer exists");
                        trace!(addr = %peer.addr, old = peer.port, new = new_port, "peer port renegotiated");
                        peer.port = new_port;
                        key = (peer.addr.clone(), new_port);
                        inner.peers.insert(key.clone(), peer);
                        continue;
                    }
                }

                inner.recv_queue.push_back(Datagram {
                    addr,
                    port,
                    data: frame,
                });
                self.interests.push(InterestType::Readable);
            }
        }
    }

    /// Non-blocking readiness mask.
    pub fn poll_mask(&self) -> PollFlags {
        self.pump();
        let inner = self.inner.lock().unwrap();

        if self.kind == SocketKind::Stream && inner.acceptor.is_some() {
            return if inner.pending.is_empty() {
                PollFlags::empty()
            } else {
                PollFlags::POLLIN
            };
        }

        let mut mask = PollFlags::empty();
        let dest_state = inner
            .remote
            .as_ref()
            .and_then(|remote| inner.peers.get(remote))
            .map(|peer| peer.transport.state());

        if !inner.recv_queue.is_empty() {
            mask |= PollFlags::POLLIN;
        }
        if self.kind == SocketKind::Stream && inner.remote.is_some() {
            match dest_state {
                None | Some(TransportState::Closing) | Some(TransportState::Closed) => {
                    // EOF is readable.
                    mask |= PollFlags::POLLIN;
                }
                _ => (),
            }
        }
        match dest_state {
            None | Some(TransportState::Open) => mask |= PollFlags::POLLOUT,
            Some(TransportState::Closing) | Some(TransportState::Closed) => {
                mask |= PollFlags::POLLHUP;
            }
            Some(TransportState::Connecting) => (),
        }
        if inner.error.is_some() {
            mask |= PollFlags::POLLERR;
        }
        mask
    }

    fn has_waitable_sources(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.acceptor.is_some() || !inner.peers.is_empty()
    }

    fn collect_waits(&self) -> Vec<WaitAny> {
        let mut waits = Vec::new();
        waits.push(self.interests.wait_any(&InterestType::ALL));
        let inner = self.inner.lock().unwrap();
        if let Some(acceptor) = &inner.acceptor {
            waits.push(acceptor.interests().wait_any(&[InterestType::Readable]));
        }
        for peer in inner.peers.values() {
            waits.push(peer.transport.interests().wait_any(&InterestType::ALL));
        }
        waits
    }

    /// Wait until any of `events` is ready, or until `timeout`.
    ///
    /// Returns immediately when data is already queued. On timeout the mask
    /// is empty, except for a socket with no transport at all, which
    /// defaults to "ready" once the timeout expires.
    pub async fn wait_readiness(
        &self,
        events: PollFlags,
        timeout: Option<Duration>,
    ) -> PollFlags {
        let interesting = events | PollFlags::POLLERR | PollFlags::POLLHUP;

        let immediate = self.poll_mask() & interesting;
        if !immediate.is_empty() {
            return immediate;
        }

        if !self.has_waitable_sources() {
            if let Some(t) = timeout {
                tokio::time::sleep(t).await;
            }
            return events;
        }

        let wait_loop = async {
            loop {
                let mask = self.poll_mask() & interesting;
                if !mask.is_empty() {
                    return mask;
                }
                let waits = self.collect_waits();
                let (fired, _, _) = futures::future::select_all(waits).await;
                if fired == InterestType::Error {
                    self.inner.lock().unwrap().error = Some(NetError::ConnectionRefused);
                }
            }
        };

        match timeout {
            Some(t) => tokio::time::timeout(t, wait_loop)
                .await
                .unwrap_or(PollFlags::empty()),
            None => wait_loop.await,
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Socket")
            .field("kind", &self.kind)
            .field("local", &inner.local)
            .field("remote", &inner.remote)
            .field("peers", &inner.peers.len())
            .field("pending", &inner.pending.len())
            .field("queued", &inner.recv_queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelNetwork, ChannelTransport};

    const AF_INET: u16 = 2;

    #[test]
    fn port_control_frame_layout_is_wire_compatible() {
        let frame = port_control_frame(0x1234);
        assert_eq!(
            frame.as_ref(),
            &[0xff, 0xff, 0xff, 0xff, b'p', b'o', b'r', b't', 0x12, 0x34],
        );
        assert_eq!(parse_port_control(&frame), Some(0x1234));
        assert_eq!(parse_port_control(b"0123456789"), None);
        assert_eq!(parse_port_control(&frame[..9]), None);
    }

    fn stream_socket() -> Arc<Socket> {
        Socket::new(SocketKind::Stream, AF_INET, 0)
    }

    fn dgram_socket() -> Arc<Socket> {
        Socket::new(SocketKind::Dgram, AF_INET, 0)
    }

    #[test]
    fn listen_accept_reports_the_initiating_address() {
        let net = ChannelNetwork::new();
        let server = stream_socket();
        server.bind(&*net, "10.0.0.1", 8080).unwrap();
        server.listen(&*net).unwrap();

        let client = stream_socket();
        assert_eq!(
            client.connect(&*net, "10.0.0.1", 8080).unwrap_err(),
            NetError::InProgress,
        );

        let accepted = server.accept().unwrap();
        let (addr, port) = accepted.remote_addr().unwrap();
        assert_eq!(addr, "127.0.0.1");
        assert!(port >= 49152, "the transport-level source port is ephemeral");

        assert_eq!(
            server.accept().unwrap_err(),
            NetError::WouldBlock,
            "no second connection is available",
        );
    }

    #[test]
    fn stream_data_flows_and_partial_reads_requeue() {
        let net = ChannelNetwork::new();
        let server = stream_socket();
        server.bind(&*net, "srv", 1).unwrap();
        server.listen(&*net).unwrap();

        let client = stream_socket();
        let _ = client.connect(&*net, "srv", 1);
        let accepted = server.accept().unwrap();

        assert_eq!(client.send_msg(&*net, b"hello world", None).unwrap(), 11);

        let first = accepted.recv_msg(5).unwrap().unwrap();
        assert_eq!(first.data.as_ref(), b"hello");
        let rest = accepted.recv_msg(64).unwrap().unwrap();
        assert_eq!(rest.data.as_ref(), b" world");

        assert_eq!(accepted.recv_msg(64).unwrap_err(), NetError::WouldBlock);
    }

    #[test]
    fn eof_after_peer_close() {
        let net = ChannelNetwork::new();
        let server = stream_socket();
        server.bind(&*net, "srv", 2).unwrap();
        server.listen(&*net).unwrap();

        let client = stream_socket();
        let _ = client.connect(&*net, "srv", 2);
        let accepted = server.accept().unwrap();

        client.send_msg(&*net, b"bye", None).unwrap();
        client.shutdown().unwrap();

        // Buffered bytes drain first, then end-of-stream.
        assert_eq!(accepted.recv_msg(16).unwrap().unwrap().data.as_ref(), b"bye");
        assert_eq!(accepted.recv_msg(16).unwrap(), None);
    }

    #[test]
    fn dgram_port_renegotiation_rewrites_the_source_port() {
        let net = ChannelNetwork::new();
        let server = dgram_socket();
        server.bind(&*net, "udp-srv", 5000).unwrap();

        let client = dgram_socket();
        client.bind(&*net, "client-host", 6000).unwrap_or(());
        client
            .send_msg(&*net, b"datagram", Some(("udp-srv".to_string(), 5000)))
            .unwrap();

        let received = server.recv_msg(64).unwrap().unwrap();
        assert_eq!(received.data.as_ref(), b"datagram");
        assert_eq!(
            received.port, 6000,
            "recvmsg reports the renegotiated source port, not the transport port",
        );
    }

    #[test]
    fn dgram_sends_queue_until_the_transport_opens() {
        let sock = dgram_socket();
        let (local_end, remote_end) = ChannelTransport::pair_pending(
            ("far".to_string(), 9000),
            ("near".to_string(), 1234),
        );
        let key = sock
            .adopt_transport(local_end.clone(), Some(("far".to_string(), 9000)))
            .unwrap();
        sock.inner.lock().unwrap().remote = Some(key);

        let net = ChannelNetwork::new();
        assert_eq!(sock.send_msg(&*net, b"early", None).unwrap(), 5);
        assert!(remote_end.try_recv().is_none(), "nothing crossed before open");

        local_end.open();
        sock.pump();
        assert_eq!(remote_end.try_recv().unwrap().as_ref(), b"early");
    }

    #[tokio::test]
    async fn poll_returns_immediately_with_queued_data() {
        let net = ChannelNetwork::new();
        let server = stream_socket();
        server.bind(&*net, "srv", 3).unwrap();
        server.listen(&*net).unwrap();
        let client = stream_socket();
        let _ = client.connect(&*net, "srv", 3);
        let accepted = server.accept().unwrap();
        client.send_msg(&*net, b"x", None).unwrap();

        let started = std::time::Instant::now();
        let mask = accepted
            .wait_readiness(PollFlags::POLLIN, Some(Duration::from_secs(5)))
            .await;
        assert!(mask.contains(PollFlags::POLLIN));
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "queued data must not wait for the timeout",
        );
    }

    #[tokio::test]
    async fn poll_times_out_to_the_empty_mask_on_an_idle_connection() {
        let net = ChannelNetwork::new();
        let server = stream_socket();
        server.bind(&*net, "srv", 4).unwrap();
        server.listen(&*net).unwrap();
        let client = stream_socket();
        let _ = client.connect(&*net, "srv", 4);

        let mask = client
            .wait_readiness(PollFlags::POLLIN, Some(Duration::from_millis(20)))
            .await;
        assert_eq!(mask, PollFlags::empty());
    }

    #[tokio::test]
    async fn poll_with_no_transport_defaults_to_ready_after_timeout() {
        let sock = stream_socket();
        let mask = sock
            .wait_readiness(PollFlags::POLLIN, Some(Duration::from_millis(10)))
            .await;
        assert_eq!(mask, PollFlags::POLLIN);
    }

    #[test]
    fn connect_twice_reports_the_connection_state() {
        let net = ChannelNetwork::new();
        let server = stream_socket();
        server.bind(&*net, "srv", 5).unwrap();
        server.listen(&*net).unwrap();

        let client = stream_socket();
        assert_eq!(client.connect(&*net, "srv", 5).unwrap_err(), NetError::InProgress);
        assert_eq!(
            client.connect(&*net, "srv", 5).unwrap_err(),
            NetError::AlreadyConnected,
        );
    }

    #[test]
    fn fionread_reports_the_front_message() {
        let net = ChannelNetwork::new();
        let server = stream_socket();
        server.bind(&*net, "srv", 6).unwrap();
        server.listen(&*net).unwrap();
        let client = stream_socket();
        let _ = client.connect(&*net, "srv", 6);
        let accepted = server.accept().unwrap();

        assert_eq!(accepted.bytes_queued(), 0);
        client.send_msg(&*net, b"abcde", None).unwrap();
        assert_eq!(accepted.bytes_queued(), 5);
    }
}
