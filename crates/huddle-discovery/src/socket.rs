//! UDP socket setup for discovery.
//!
//! Both the scanner and the transponder bind the discovery address to
//! receive and dial it to send. Multicast groups are joined on the
//! receiving socket; reuse options let several nodes on one host share
//! the group. TTL 1 — discovery stays on the local link.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Read buffer for discovery datagrams; oversized packets are dropped.
pub const MAX_DATAGRAM: usize = 8 << 10;

/// Bind `addr` for receiving, joining the multicast group when `addr` is
/// a multicast address.
pub fn bind(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    match addr.ip() {
        IpAddr::V4(group) if group.is_multicast() => {
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        }
        IpAddr::V6(group) if group.is_multicast() => {
            socket.join_multicast_v6(&group, 0)?;
        }
        _ => {}
    }

    UdpSocket::from_std(socket.into())
}

/// Dial `addr` for sending. Loopback delivery stays on so nodes sharing a
/// host can discover each other.
pub fn dial(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;

    match addr.ip() {
        IpAddr::V4(group) if group.is_multicast() => {
            socket.set_multicast_loop_v4(true)?;
            socket.set_multicast_ttl_v4(1)?;
        }
        IpAddr::V6(group) if group.is_multicast() => {
            socket.set_multicast_loop_v6(true)?;
            socket.set_multicast_hops_v6(1)?;
        }
        _ => {}
    }

    let unspecified: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    socket.bind(&unspecified.into())?;
    socket.connect(&addr.into())?;

    UdpSocket::from_std(socket.into())
}
