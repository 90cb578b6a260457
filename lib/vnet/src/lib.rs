//! Socket emulation over message-oriented duplex transports.
//!
//! BSD-socket semantics (bind/listen/accept/connect/send/recv/poll) are
//! mapped onto peer objects backed by whatever duplex message channel the
//! host injects through [`TransportFactory`]. Datagram sockets carry a
//! source-port renegotiation handshake because connection-oriented carriers
//! have no datagram source address of their own.

mod error;
mod sockfs;
mod socket;
mod transport;

pub use error::{NetError, Result};
pub use sockfs::{SocketStreamOps, FIONREAD};
pub use socket::{
    parse_port_control, port_control_frame, Datagram, Socket, SocketKind, PORT_CONTROL_LEN,
};
pub use transport::{
    Acceptor, ChannelAcceptor, ChannelNetwork, ChannelTransport, NoNetwork, Transport,
    TransportFactory, TransportState,
};
