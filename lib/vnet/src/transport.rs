//! The transport plugin seam. The socket layer is transport-agnostic: a
//! factory hands out duplex message channels keyed by host/port, and the
//! host environment decides what actually carries the frames (websockets,
//! an in-process loopback, nothing at all).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use sandos_vio::{InterestSet, InterestType};

use crate::{NetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One duplex message channel. Frames are delivered whole; readiness is
/// signalled through the transport's [`InterestSet`] (`Readable` on an
/// inbound frame, `Writable` on open, `Closed`/`Error` on teardown) and
/// drained on the caller's turn via [`Transport::try_recv`].
pub trait Transport: fmt::Debug + Send + Sync {
    fn state(&self) -> TransportState;

    /// The remote address as known at the transport level. For inbound
    /// connections this carries the ephemeral source port until the peer
    /// renegotiates it.
    fn remote_addr(&self) -> (String, u16);

    fn send(&self, data: Bytes) -> Result<()>;

    /// Pop one queued inbound frame, if any. Never blocks.
    fn try_recv(&self) -> Option<Bytes>;

    fn close(&self);

    fn interests(&self) -> InterestSet;
}

/// Server side of a listening transport: yields inbound connections.
pub trait Acceptor: fmt::Debug + Send + Sync {
    /// Pop one pending inbound transport, if any. Never blocks.
    fn try_accept(&self) -> Option<Arc<dyn Transport>>;

    fn interests(&self) -> InterestSet;

    fn close(&self);
}

/// Creates transports on demand. Injectable so the host decides how (and
/// whether) the sandbox reaches a network.
pub trait TransportFactory: fmt::Debug + Send + Sync {
    fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn Transport>>;

    fn listen(&self, host: &str, port: u16) -> Result<Arc<dyn Acceptor>>;
}

/// Factory for sandboxes with no network access: every operation is refused.
#[derive(Debug, Default)]
pub struct NoNetwork;

impl TransportFactory for NoNetwork {
    fn connect(&self, _host: &str, _port: u16) -> Result<Arc<dyn Transport>> {
        Err(NetError::Unsupported)
    }

    fn listen(&self, _host: &str, _port: u16) -> Result<Arc<dyn Acceptor>> {
        Err(NetError::Unsupported)
    }
}

struct ChannelSide {
    state: Mutex<TransportState>,
    queue: Mutex<VecDeque<Bytes>>,
    interests: InterestSet,
}

impl ChannelSide {
    fn new(state: TransportState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            queue: Mutex::new(VecDeque::new()),
            interests: InterestSet::new(),
        })
    }
}

/// In-process duplex transport: two crossed frame queues. This is both the
/// reference implementation of the [`Transport`] contract and the loopback
/// carrier used by the tests.
pub struct ChannelTransport {
    local: Arc<ChannelSide>,
    remote: Arc<ChannelSide>,
    remote_addr: Mutex<(String, u16)>,
}

impl ChannelTransport {
    /// A connected pair, both ends already open. `a_addr`/`b_addr` are the
    /// addresses each end reports for its remote.
    pub fn pair(
        a_remote: (String, u16),
        b_remote: (String, u16),
    ) -> (Arc<ChannelTransport>, Arc<ChannelTransport>) {
        Self::pair_with_state(a_remote, b_remote, TransportState::Open)
    }

    /// A pair that starts in the `Connecting` state; call [`Self::open`] on
    /// either end to bring both up.
    pub fn pair_pending(
        a_remote: (String, u16),
        b_remote: (String, u16),
    ) -> (Arc<ChannelTransport>, Arc<ChannelTransport>) {
        Self::pair_with_state(a_remote, b_remote, TransportState::Connecting)
    }

    fn pair_with_state(
        a_remote: (String, u16),
        b_remote: (String, u16),
        state: TransportState,
    ) -> (Arc<ChannelTransport>, Arc<ChannelTransport>) {
        let side_a = ChannelSide::new(state);
        let side_b = ChannelSide::new(state);
        let a = Arc::new(ChannelTransport {
            local: side_a.clone(),
            remote: side_b.clone(),
            remote_addr: Mutex::new(a_remote),
        });
        let b = Arc::new(ChannelTransport {
            local: side_b,
            remote: side_a,
            remote_addr: Mutex::new(b_remote),
        });
        (a, b)
    }

    /// Transition both ends to `Open` and fire their `Writable` interests,
    /// the way a websocket `open` event would.
    pub fn open(&self) {
        for side in [&self.local, &self.remote] {
            let mut state = side.state.lock().unwrap();
            if *state == TransportState::Connecting {
                *state = TransportState::Open;
                side.interests.push(InterestType::Writable);
            }
        }
    }

    /// Inject a transport-level failure visible on the local end.
    pub fn fail(&self) {
        *self.local.state.lock().unwrap() = TransportState::Closed;
        self.local.interests.push(InterestType::Error);
    }
}

impl fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("state", &self.state())
            .field("remote", &*self.remote_addr.lock().unwrap())
            .finish()
    }
}

impl Transport for ChannelTransport {
    fn state(&self) -> TransportState {
        *self.local.state.lock().unwrap()
    }

    fn remote_addr(&self) -> (String, u16) {
        self.remote_addr.lock().unwrap().clone()
    }

    fn send(&self, data: Bytes) -> Result<()> {
        match self.state() {
            TransportState::Open => (),
            TransportState::Connecting => return Err(NetError::WouldBlock),
            _ => return Err(NetError::BrokenPipe),
        }
        if *self.remote.state.lock().unwrap() != TransportState::Open {
            return Err(NetError::BrokenPipe);
        }
        self.remote.queue.lock().unwrap().push_back(data);
        self.remote.interests.push(InterestType::Readable);
        Ok(())
    }

    fn try_recv(&self) -> Option<Bytes> {
        self.local.queue.lock().unwrap().pop_front()
    }

    fn close(&self) {
        for side in [&self.local, &self.remote] {
            let mut state = side.state.lock().unwrap();
            if *state != TransportState::Closed {
                *state = TransportState::Closed;
                side.interests.push(InterestType::Closed);
            }
        }
    }

    fn interests(&self) -> InterestSet {
        self.local.interests.clone()
    }
}

/// Queue of inbound transports for one listening address.
#[derive(Default)]
pub struct ChannelAcceptor {
    queue: Mutex<VecDeque<Arc<dyn Transport>>>,
    interests: InterestSet,
}

impl ChannelAcceptor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver an inbound connection, waking any accept poller.
    pub fn inject(&self, transport: Arc<dyn Transport>) {
        self.queue.lock().unwrap().push_back(transport);
        self.interests.push(InterestType::Readable);
    }
}

impl fmt::Debug for ChannelAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAcceptor")
            .field("pending", &self.queue.lock().unwrap().len())
            .finish()
    }
}

impl Acceptor for ChannelAcceptor {
    fn try_accept(&self) -> Option<Arc<dyn Transport>> {
        self.queue.lock().unwrap().pop_front()
    }

    fn interests(&self) -> InterestSet {
        self.interests.clone()
    }

    fn close(&self) {
        self.queue.lock().unwrap().clear();
    }
}

/// An in-process loopback network: listeners are registered by address and
/// `connect` wires a fresh channel pair straight into the matching acceptor.
pub struct ChannelNetwork {
    listeners: Mutex<HashMap<(String, u16), Arc<ChannelAcceptor>>>,
    next_ephemeral: AtomicU16,
}

impl ChannelNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            next_ephemeral: AtomicU16::new(49152),
        })
    }

    fn ephemeral_port(&self) -> u16 {
        self.next_ephemeral.fetch_add(1, Ordering::Relaxed)
    }
}

impl fmt::Debug for ChannelNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelNetwork")
            .field("listeners", &self.listeners.lock().unwrap().len())
            .finish()
    }
}

impl TransportFactory for ChannelNetwork {
    fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn Transport>> {
        let acceptor = self
            .listeners
            .lock()
            .unwrap()
            .get(&(host.to_string(), port))
            .cloned()
            .ok_or(NetError::ConnectionRefused)?;

        let source_port = self.ephemeral_port();
        let (client, server) = ChannelTransport::pair(
            (host.to_string(), port),
            ("127.0.0.1".to_string(), source_port),
        );
        acceptor.inject(server);
        Ok(client)
    }

    fn listen(&self, host: &str, port: u16) -> Result<Arc<dyn Acceptor>> {
        let mut listeners = self.listeners.lock().unwrap();
        let key = (host.to_string(), port);
        if listeners.contains_key(&key) {
            return Err(NetError::AddressInUse);
        }
        let acceptor = ChannelAcceptor::new();
        listeners.insert(key, acceptor.clone());
        Ok(acceptor)
    }
}
