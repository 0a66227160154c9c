//! Async UDP socket abstraction.
//!
//! [`BeaconSocket`] is a thin wrapper around `tokio::net::UdpSocket` set up
//! for fire-and-forget delivery to a broadcast or multicast address.  The
//! send loop only needs [`DatagramSink`], so tests can substitute a fake
//! socket and run against tokio's paused clock.
//!
//! Sockets are created through `socket2` because `SO_REUSEADDR` has to be
//! set before `bind`, which neither std nor tokio expose.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Network-layer failures.  All of them end the current run.
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("failed to create UDP socket: {0}")]
    Create(#[source] io::Error),
    #[error("failed to set {option}: {source}")]
    SetOption {
        option: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to join multicast group {group}: {source}")]
    Join {
        group: Ipv4Addr,
        #[source]
        source: io::Error,
    },
    #[error("failed to send packet {sequence}: {source}")]
    Send {
        sequence: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to receive datagram: {0}")]
    Recv(#[source] io::Error),
}

fn set_option(option: &'static str, result: io::Result<()>) -> Result<(), SocketError> {
    result.map_err(|source| SocketError::SetOption { option, source })
}

/// Create a non-blocking IPv4 UDP socket with `SO_REUSEADDR` set.
///
/// Binding is left to the caller so further options can go on first.
pub(crate) fn reusable_udp_socket() -> Result<Socket, SocketError> {
    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(SocketError::Create)?;
    set_option("SO_REUSEADDR", socket.set_reuse_address(true))?;
    set_option("O_NONBLOCK", socket.set_nonblocking(true))?;
    Ok(socket)
}

/// Bind `socket` to `addr` and hand it to tokio.
pub(crate) fn bind_tokio(socket: Socket, addr: SocketAddrV4) -> Result<UdpSocket, SocketError> {
    let addr = SocketAddr::V4(addr);
    socket
        .bind(&addr.into())
        .map_err(|source| SocketError::Bind { addr, source })?;
    UdpSocket::from_std(socket.into()).map_err(|source| SocketError::Bind { addr, source })
}

// ---------------------------------------------------------------------------
// DatagramSink
// ---------------------------------------------------------------------------

/// The one operation the send loop needs from a socket.
///
/// The socket is released when the sink is dropped.
pub trait DatagramSink {
    fn send_to(
        &mut self,
        buf: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;
}

// ---------------------------------------------------------------------------
// BeaconSocket
// ---------------------------------------------------------------------------

/// An unconnected UDP socket configured for beacon delivery.
#[derive(Debug)]
pub struct BeaconSocket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl BeaconSocket {
    /// Bind to `interface` on an ephemeral port, ready to send to `destination`.
    ///
    /// Multicast destinations get `multicast_ttl` and `interface` as the
    /// outgoing multicast interface; anything else gets `SO_BROADCAST`.
    pub fn open(
        interface: Ipv4Addr,
        destination: SocketAddrV4,
        multicast_ttl: u32,
    ) -> Result<Self, SocketError> {
        let socket = reusable_udp_socket()?;

        if destination.ip().is_multicast() {
            set_option("IP_MULTICAST_TTL", socket.set_multicast_ttl_v4(multicast_ttl))?;
            set_option("IP_MULTICAST_IF", socket.set_multicast_if_v4(&interface))?;
        } else {
            set_option("SO_BROADCAST", socket.set_broadcast(true))?;
        }

        let inner = bind_tokio(socket, SocketAddrV4::new(interface, 0))?;
        let local_addr = inner.local_addr().map_err(|source| SocketError::Bind {
            addr: SocketAddr::V4(SocketAddrV4::new(interface, 0)),
            source,
        })?;
        log::debug!("beacon socket bound to {local_addr}, sending to {destination}");

        Ok(Self { local_addr, inner })
    }
}

impl DatagramSink for BeaconSocket {
    async fn send_to(&mut self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, dest).await
    }
}

impl Drop for BeaconSocket {
    fn drop(&mut self) {
        log::debug!("closing beacon socket {}", self.local_addr);
    }
}
