//! Socket scenarios driven through the raw syscall ABI over the in-process
//! loopback network.

mod common;

use common::{build_kernel, runtime, sys};
use pretty_assertions::assert_eq;
use sandos::abi::{read_sockaddr, write_sockaddr, SOCK_DGRAM, SOCK_STREAM};
use sandos::vnet::ChannelNetwork;
use sandos::{Errno, GuestMemory, Sysno, VecMemory};

const AF_INET: u64 = 2;

#[test]
fn stream_sockets_connect_accept_and_exchange_data() {
    let rt = runtime();
    let net = ChannelNetwork::new();
    let kernel = build_kernel(&rt, |b| b.transport_factory(net));
    let mem = VecMemory::new(64 * 1024);

    let server = sys(&kernel, &mem, Sysno::Socket, &[AF_INET, SOCK_STREAM as u64, 0]);
    assert!(server >= 0);
    let server = server as u64;

    write_sockaddr(&mem, 64, "10.0.0.1", 8080).unwrap();
    assert_eq!(sys(&kernel, &mem, Sysno::Bind, &[server, 64, 8]), 0);
    assert_eq!(sys(&kernel, &mem, Sysno::Listen, &[server, 16]), 0);

    let client = sys(&kernel, &mem, Sysno::Socket, &[AF_INET, SOCK_STREAM as u64, 0]) as u64;
    assert_eq!(
        sys(&kernel, &mem, Sysno::Connect, &[client, 64, 8]),
        Errno::EINPROGRESS.as_neg(),
        "connect surfaces the in-progress condition",
    );

    let accepted = sys(&kernel, &mem, Sysno::Accept, &[server, 128, 136]);
    assert!(accepted >= 0, "accept failed: {accepted}");
    let accepted = accepted as u64;
    let (peer_host, peer_port) = read_sockaddr(&mem, 128).unwrap();
    assert_eq!(peer_host, "127.0.0.1");
    assert!(peer_port >= 49152, "the peer address is the initiating transport's");

    mem.write(1024, b"ping").unwrap();
    assert_eq!(sys(&kernel, &mem, Sysno::Sendto, &[client, 1024, 4, 0, 0, 0]), 4);

    // FIONREAD reports the size of the queued message.
    const FIONREAD: u64 = 0x541B;
    assert_eq!(sys(&kernel, &mem, Sysno::Ioctl, &[accepted, FIONREAD, 200]), 0);
    assert_eq!(mem.read_u32(200).unwrap(), 4);

    let n = sys(&kernel, &mem, Sysno::Recvfrom, &[accepted, 4096, 64, 0, 0, 0]);
    assert_eq!(n, 4);
    assert_eq!(mem.read_vec(4096, 4).unwrap(), b"ping");

    // Reply in the other direction.
    mem.write(1024, b"pong").unwrap();
    assert_eq!(sys(&kernel, &mem, Sysno::Sendto, &[accepted, 1024, 4, 0, 0, 0]), 4);
    assert_eq!(sys(&kernel, &mem, Sysno::Recvfrom, &[client, 4096, 64, 0, 0, 0]), 4);
    assert_eq!(mem.read_vec(4096, 4).unwrap(), b"pong");

    assert_eq!(sys(&kernel, &mem, Sysno::Shutdown, &[client, 2]), 0);
    // Buffered nothing: the accepted side now reads end-of-stream.
    assert_eq!(sys(&kernel, &mem, Sysno::Recvfrom, &[accepted, 4096, 64, 0, 0, 0]), 0);

    sys(&kernel, &mem, Sysno::Close, &[client]);
    sys(&kernel, &mem, Sysno::Close, &[accepted]);
    sys(&kernel, &mem, Sysno::Close, &[server]);
}

#[test]
fn datagram_recv_reports_the_renegotiated_port() {
    let rt = runtime();
    let net = ChannelNetwork::new();
    let kernel = build_kernel(&rt, |b| b.transport_factory(net));
    let mem = VecMemory::new(64 * 1024);

    // Receiver bound to port 5000.
    let receiver = sys(&kernel, &mem, Sysno::Socket, &[AF_INET, SOCK_DGRAM as u64, 0]) as u64;
    write_sockaddr(&mem, 64, "10.0.0.2", 5000).unwrap();
    assert_eq!(sys(&kernel, &mem, Sysno::Bind, &[receiver, 64, 8]), 0);

    // Sender bound to its own logical port 6000.
    let sender = sys(&kernel, &mem, Sysno::Socket, &[AF_INET, SOCK_DGRAM as u64, 0]) as u64;
    write_sockaddr(&mem, 96, "10.0.0.3", 6000).unwrap();
    assert_eq!(sys(&kernel, &mem, Sysno::Bind, &[sender, 96, 8]), 0);

    mem.write(1024, b"udp payload").unwrap();
    assert_eq!(
        sys(&kernel, &mem, Sysno::Sendto, &[sender, 1024, 11, 0, 64, 8]),
        11,
    );

    let n = sys(&kernel, &mem, Sysno::Recvfrom, &[receiver, 4096, 64, 0, 128, 136]);
    assert_eq!(n, 11);
    assert_eq!(mem.read_vec(4096, 11).unwrap(), b"udp payload");
    let (_, from_port) = read_sockaddr(&mem, 128).unwrap();
    assert_eq!(
        from_port, 6000,
        "the source port is the renegotiated logical port, not the transport's",
    );
}

#[test]
fn poll_fd_is_immediate_with_queued_data_and_times_out_idle() {
    let rt = runtime();
    let net = ChannelNetwork::new();
    let kernel = build_kernel(&rt, |b| b.transport_factory(net));
    let mem = VecMemory::new(64 * 1024);

    let server = sys(&kernel, &mem, Sysno::Socket, &[AF_INET, SOCK_STREAM as u64, 0]) as u64;
    write_sockaddr(&mem, 64, "10.0.0.4", 9000).unwrap();
    sys(&kernel, &mem, Sysno::Bind, &[server, 64, 8]);
    sys(&kernel, &mem, Sysno::Listen, &[server, 1]);
    let client = sys(&kernel, &mem, Sysno::Socket, &[AF_INET, SOCK_STREAM as u64, 0]) as u64;
    sys(&kernel, &mem, Sysno::Connect, &[client, 64, 8]);
    let accepted = sys(&kernel, &mem, Sysno::Accept, &[server, 0, 0]) as u64;

    const POLLIN: u64 = 1;
    // Idle connection: the timeout elapses and nothing is ready.
    let started = std::time::Instant::now();
    assert_eq!(sys(&kernel, &mem, Sysno::PollFd, &[accepted, POLLIN, 30]), 0);
    assert!(started.elapsed() >= std::time::Duration::from_millis(25));

    // Queued data: ready without waiting.
    mem.write(1024, b"!").unwrap();
    sys(&kernel, &mem, Sysno::Sendto, &[client, 1024, 1, 0, 0, 0]);
    let started = std::time::Instant::now();
    assert_eq!(
        sys(&kernel, &mem, Sysno::PollFd, &[accepted, POLLIN, 5_000]),
        1,
    );
    assert!(started.elapsed() < std::time::Duration::from_millis(500));
}

#[test]
fn connecting_nowhere_is_refused_and_non_sockets_are_rejected() {
    let rt = runtime();
    let net = ChannelNetwork::new();
    let kernel = build_kernel(&rt, |b| b.transport_factory(net));
    let mem = VecMemory::new(64 * 1024);

    let fd = sys(&kernel, &mem, Sysno::Socket, &[AF_INET, SOCK_STREAM as u64, 0]) as u64;
    write_sockaddr(&mem, 64, "10.9.9.9", 1).unwrap();
    assert_eq!(
        sys(&kernel, &mem, Sysno::Connect, &[fd, 64, 8]),
        Errno::ECONNREFUSED.as_neg(),
    );

    mem.store_cstr(0, "/tmp/file");
    let file_fd = sys(&kernel, &mem, Sysno::Open, &[0, 0o102, 0o644]) as u64;
    assert_eq!(
        sys(&kernel, &mem, Sysno::Bind, &[file_fd, 64, 8]),
        Errno::ENOTSOCK.as_neg(),
    );

    let names = sys(&kernel, &mem, Sysno::Getsockname, &[fd, 128, 136]);
    assert_eq!(names, 0);
    let (host, port) = read_sockaddr(&mem, 128).unwrap();
    assert_eq!((host.as_str(), port), ("0.0.0.0", 0), "unbound local address");
}
