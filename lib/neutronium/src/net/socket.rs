//! Thin wrappers around OS socket configuration shared by the UDP and TCP transports:
//! non-blocking toggling, buffer sizing, and the fragmentation policy that decides how big a
//! single UDP datagram is allowed to get. `tcp` and `udp` own their accept/connect/send/recv
//! call sites directly (`std::net`/`mio::net` already expose those cleanly); what's worth
//! centralizing is the handful of `setsockopt`-style knobs every socket needs tuned the same
//! way regardless of transport, via `socket2` rather than hand-rolled FFI.

use std::io;
use std::net::{TcpListener, TcpStream, UdpSocket as StdUdpSocket};

use mio::net::UdpSocket as MioUdpSocket;
use socket2::SockRef;

/// Policy for how large a single outgoing UDP datagram is allowed to be before the sender
/// must fragment it itself. UDP datagrams above a path's MTU silently fragment at the IP
/// layer and any lost IP fragment drops the whole datagram, so the messaging core fragments
/// well below typical MTUs rather than trusting the network to do it safely.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FragmentationPolicy {
    pub max_datagram_size: usize,
}

impl FragmentationPolicy {
    /// A conservative default that stays under the Ethernet MTU (1500) after IP/UDP headers
    /// and this protocol's own packet header, leaving headroom for tunnelled paths (e.g. VPN)
    /// that shave a little more off the usable payload.
    pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1200;

    pub fn new(max_datagram_size: usize) -> FragmentationPolicy {
        FragmentationPolicy { max_datagram_size }
    }
}

impl Default for FragmentationPolicy {
    fn default() -> FragmentationPolicy {
        FragmentationPolicy::new(FragmentationPolicy::DEFAULT_MAX_DATAGRAM_SIZE)
    }
}

/// Applies buffer-size tuning and non-blocking mode to a standard library UDP socket before
/// it is handed to `mio` for registration (`mio::net::UdpSocket` doesn't expose buffer-size
/// tuning itself).
pub fn configure_udp_socket(socket: &StdUdpSocket, recv_buffer: usize, send_buffer: usize) -> io::Result<()> {
    socket.set_nonblocking(true)?;

    let sock_ref = SockRef::from(socket);
    sock_ref.set_recv_buffer_size(recv_buffer)?;
    sock_ref.set_send_buffer_size(send_buffer)?;
    Ok(())
}

/// Applies buffer-size tuning to an accepted TCP stream, sharing the same `socket2` path as
/// the UDP configuration above.
pub fn configure_tcp_stream(socket: &TcpStream, recv_buffer: usize, send_buffer: usize) -> io::Result<()> {
    let sock_ref = SockRef::from(socket);
    sock_ref.set_recv_buffer_size(recv_buffer)?;
    sock_ref.set_send_buffer_size(send_buffer)?;
    Ok(())
}

/// Applies buffer-size tuning to a listening socket, so accepted connections inherit sane
/// defaults even before `configure_tcp_stream` runs on them individually.
pub fn configure_tcp_listener(socket: &TcpListener, recv_buffer: usize, send_buffer: usize) -> io::Result<()> {
    let sock_ref = SockRef::from(socket);
    sock_ref.set_recv_buffer_size(recv_buffer)?;
    sock_ref.set_send_buffer_size(send_buffer)?;
    Ok(())
}

/// Applies buffer-size tuning to an already-non-blocking `mio` UDP socket. `mio::net::UdpSocket`
/// is always non-blocking by construction, so unlike [`configure_udp_socket`] this only needs
/// to touch the buffer sizes.
pub fn configure_mio_udp_socket(socket: &MioUdpSocket, recv_buffer: usize, send_buffer: usize) -> io::Result<()> {
    let sock_ref = SockRef::from(socket);
    sock_ref.set_recv_buffer_size(recv_buffer)?;
    sock_ref.set_send_buffer_size(send_buffer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fragmentation_policy_stays_under_ethernet_mtu() {
        let policy = FragmentationPolicy::default();
        assert!(policy.max_datagram_size < 1500);
    }

    #[test]
    fn test_configure_udp_socket_sets_nonblocking() {
        let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        configure_udp_socket(&socket, 65536, 65536).unwrap();

        // A non-blocking socket with nothing to read returns WouldBlock immediately rather
        // than hanging the test.
        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
