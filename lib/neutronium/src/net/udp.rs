//! Reliable-enough, fragmenting UDP transport. A single service thread owns the socket and
//! multiplexes it against a wake-up socket with `mio::Poll`, the same pattern the TCP
//! `TcpServer` listener uses for its accept/read polling, generalized to one socket
//! carrying many peers. Sending bypasses the service thread entirely — `mio::net::UdpSocket`
//! is non-blocking and safe to call `send_to` on from any thread, so `Connection::send` just
//! takes a brief lock and writes straight to the wire.
//!
//! Fragments are not retransmitted: a fragment that never arrives simply means the message
//! that used it never gets delivered. `DataAcknowledge` exists purely for stats, not repair.
//!
//! Peers are never addressed on the wire by a connection id — the base packet header carries
//! only a type and a reserved checksum field. Connections are looked up by `SocketAddr`, the
//! same way the pending/active connection maps work; the 32-bit id handed out to the
//! application is a process-local handle, never serialized.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flux::logging::{self, Logger};
use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};

use crate::net::connection::{Connection, InboundQueue};
use crate::net::error::NetError;
use crate::net::socket;
use crate::net::stats::{ConnectionStats, StatsHandle};

/// Default OS socket buffer size for the endpoint's single shared socket. Generous relative
/// to one connection's needs since every peer multiplexes through it.
const SOCKET_BUFFER_SIZE: usize = 1 << 20;

/// `type: 8 bits, checksum: 24 bits`. The checksum is a reserved validity field — any value
/// must be accepted on read, so it is written as zero and never inspected.
const PACKET_HEADER_SIZE: usize = 4;
/// `(id: u32, sequence: u16, fragment_index: u16, data_size: u16, _pad: u16, total_size: u32)`.
const DATA_HEADER_SIZE: usize = 16;
/// `(sequence: u16, fragment_index: u16)`.
const DATA_ACK_HEADER_SIZE: usize = 4;

const SOCKET_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
enum PacketType {
    Connect = 1,
    Disconnect = 2,
    Acknowledge = 3,
    Data = 4,
    DataAcknowledge = 5,
    TimeoutProbe = 6,
}

impl PacketType {
    fn from_u8(value: u8) -> Option<PacketType> {
        Some(match value {
            1 => PacketType::Connect,
            2 => PacketType::Disconnect,
            3 => PacketType::Acknowledge,
            4 => PacketType::Data,
            5 => PacketType::DataAcknowledge,
            6 => PacketType::TimeoutProbe,
            _ => return None,
        })
    }
}

fn write_packet_header(buf: &mut Vec<u8>, packet_type: PacketType) {
    buf.push(packet_type as u8);
    buf.extend_from_slice(&[0u8; PACKET_HEADER_SIZE - 1]);
}

fn read_packet_type(data: &[u8]) -> Option<PacketType> {
    if data.len() < PACKET_HEADER_SIZE {
        return None;
    }
    PacketType::from_u8(data[0])
}

/// Sub-header carried by every `Data` packet. `id` is the outgoing message id, shared by
/// every fragment of that message; `sequence` is the same value truncated to 16 bits, carried
/// only so it can be echoed back verbatim in a `DataAcknowledge`.
struct DataHeader {
    id: u32,
    sequence: u16,
    fragment_index: u16,
    data_size: u16,
    total_size: u32,
}

fn write_data_header(buf: &mut Vec<u8>, header: &DataHeader) {
    buf.write_u32::<BigEndian>(header.id).unwrap();
    buf.write_u16::<BigEndian>(header.sequence).unwrap();
    buf.write_u16::<BigEndian>(header.fragment_index).unwrap();
    buf.write_u16::<BigEndian>(header.data_size).unwrap();
    buf.write_u16::<BigEndian>(0).unwrap();
    buf.write_u32::<BigEndian>(header.total_size).unwrap();
}

fn read_data_header(mut buf: &[u8]) -> Option<DataHeader> {
    if buf.len() < DATA_HEADER_SIZE {
        return None;
    }
    let id = buf.read_u32::<BigEndian>().ok()?;
    let sequence = buf.read_u16::<BigEndian>().ok()?;
    let fragment_index = buf.read_u16::<BigEndian>().ok()?;
    let data_size = buf.read_u16::<BigEndian>().ok()?;
    let _pad = buf.read_u16::<BigEndian>().ok()?;
    let total_size = buf.read_u32::<BigEndian>().ok()?;
    Some(DataHeader {
        id,
        sequence,
        fragment_index,
        data_size,
        total_size,
    })
}

struct DataAckHeader {
    sequence: u16,
    fragment_index: u16,
}

fn write_data_ack_header(buf: &mut Vec<u8>, header: &DataAckHeader) {
    buf.write_u16::<BigEndian>(header.sequence).unwrap();
    buf.write_u16::<BigEndian>(header.fragment_index).unwrap();
}

fn read_data_ack_header(mut buf: &[u8]) -> Option<DataAckHeader> {
    if buf.len() < DATA_ACK_HEADER_SIZE {
        return None;
    }
    let sequence = buf.read_u16::<BigEndian>().ok()?;
    let fragment_index = buf.read_u16::<BigEndian>().ok()?;
    Some(DataAckHeader { sequence, fragment_index })
}

/// A bare control packet: base header, no sub-header, no payload. Covers `Connect`,
/// `Acknowledge`, `Disconnect` and `TimeoutProbe`.
fn build_control_packet(packet_type: PacketType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE);
    write_packet_header(&mut buf, packet_type);
    buf
}

/// Accumulates fragments for a single in-flight message until `total_size` bytes have been
/// received, then hands over the assembled bytes in `fragment_index` order. Fragments belong
/// to a message keyed by `id`, not by their wire-truncated `sequence`, so id wraparound can't
/// collide two in-flight messages in the table.
struct FragmentSet {
    total_size: u32,
    received_bytes: u32,
    fragments: BTreeMap<u16, Vec<u8>>,
}

impl FragmentSet {
    fn new(total_size: u32) -> FragmentSet {
        FragmentSet {
            total_size,
            received_bytes: 0,
            fragments: BTreeMap::new(),
        }
    }

    fn insert(&mut self, index: u16, data: &[u8]) {
        if self.fragments.insert(index, data.to_vec()).is_none() {
            self.received_bytes += data.len() as u32;
        }
    }

    fn is_complete(&self) -> bool {
        self.received_bytes >= self.total_size
    }

    fn assemble(self) -> Vec<u8> {
        self.fragments.into_values().flatten().collect()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum PeerState {
    Pending,
    Connected,
    Closed,
}

struct PeerInner {
    id: u32,
    addr: SocketAddr,
    local_addr: SocketAddr,
    socket: Arc<Mutex<MioUdpSocket>>,
    state: Mutex<PeerState>,
    last_ingress: Mutex<Instant>,
    next_message_id: AtomicU32,
    watermark: AtomicU32,
    fragment_sets: Mutex<HashMap<u32, FragmentSet>>,
    inbound: InboundQueue,
    stats: StatsHandle,
}

impl PeerInner {
    fn send_control(&self, packet_type: PacketType) -> io::Result<()> {
        let packet = build_control_packet(packet_type);
        self.socket.lock().expect("udp socket mutex poisoned").send_to(&packet, self.addr)?;
        Ok(())
    }

    fn send_data_fragment(&self, message_id: u32, fragment_index: u16, total_size: u32, chunk: &[u8]) -> io::Result<()> {
        let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE + DATA_HEADER_SIZE + chunk.len());
        write_packet_header(&mut packet, PacketType::Data);
        write_data_header(
            &mut packet,
            &DataHeader {
                id: message_id,
                sequence: message_id as u16,
                fragment_index,
                data_size: chunk.len() as u16,
                total_size,
            },
        );
        packet.extend_from_slice(chunk);
        self.socket.lock().expect("udp socket mutex poisoned").send_to(&packet, self.addr)?;
        Ok(())
    }

    fn send_data_ack(&self, sequence: u16, fragment_index: u16) -> io::Result<()> {
        let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE + DATA_ACK_HEADER_SIZE);
        write_packet_header(&mut packet, PacketType::DataAcknowledge);
        write_data_ack_header(&mut packet, &DataAckHeader { sequence, fragment_index });
        self.socket.lock().expect("udp socket mutex poisoned").send_to(&packet, self.addr)?;
        Ok(())
    }
}

/// Handle to one peer, returned to the application. Implements `Connection`.
pub struct UdpConnection {
    inner: Arc<PeerInner>,
    max_fragment_size: usize,
}

impl Connection for UdpConnection {
    fn id(&self) -> u64 {
        self.inner.id as u64
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    fn remote_addr(&self) -> SocketAddr {
        self.inner.addr
    }

    fn is_connected(&self) -> bool {
        *self.inner.state.lock().expect("peer state mutex poisoned") == PeerState::Connected
    }

    fn stats(&self) -> ConnectionStats {
        self.inner.stats.snapshot()
    }

    fn send(&self, payload: &[u8]) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::UnknownConnection(self.id()));
        }

        let message_id = self.inner.next_message_id.fetch_add(1, Ordering::Relaxed);
        let total_size = payload.len() as u32;
        let chunks: Vec<&[u8]> = payload.chunks(self.max_fragment_size.max(1)).collect();

        if chunks.is_empty() {
            self.inner.send_data_fragment(message_id, 0, 0, &[])?;
        } else {
            for (index, chunk) in chunks.iter().enumerate() {
                self.inner.send_data_fragment(message_id, index as u16, total_size, chunk)?;
                self.inner.stats.record_fragment_sent();
            }
        }

        self.inner.stats.record_send(payload.len());
        Ok(())
    }

    fn pull_next_message(&self) -> Option<Vec<u8>> {
        self.inner.inbound.pop()
    }

    fn close(&self) {
        *self.inner.state.lock().expect("peer state mutex poisoned") = PeerState::Closed;
        let _ = self.inner.send_control(PacketType::Disconnect);
    }
}

static NEXT_PEER_ID: AtomicU32 = AtomicU32::new(1);

/// Tunables an endpoint needs beyond just an address: how large a datagram it is willing to
/// fragment up to, and the two intervals driving its liveness housekeeping.
#[derive(Debug, Clone, Copy)]
pub struct UdpEndpointConfig {
    pub max_fragment_size: usize,
    /// How often an idle connection is pinged with a `TimeoutProbe` to keep it alive.
    pub keepalive_interval: Duration,
    /// How long a connection may go without any inbound packet before it is force-closed.
    pub idle_timeout: Duration,
}

impl Default for UdpEndpointConfig {
    fn default() -> UdpEndpointConfig {
        UdpEndpointConfig {
            max_fragment_size: socket::FragmentationPolicy::DEFAULT_MAX_DATAGRAM_SIZE,
            keepalive_interval: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(15),
        }
    }
}

/// How often the service thread wakes up on its own to run liveness housekeeping, independent
/// of any socket readiness event.
const HOUSEKEEPING_TICK: Duration = Duration::from_millis(250);

/// Owns the UDP socket and the housekeeping service thread. Accepts inbound handshakes as a
/// server, or can be told to actively connect out as a client via [`UdpEndpoint::connect`].
pub struct UdpEndpoint {
    local_addr: SocketAddr,
    socket: Arc<Mutex<MioUdpSocket>>,
    peers: Arc<Mutex<HashMap<SocketAddr, Arc<PeerInner>>>>,
    accepted: std::sync::mpsc::Receiver<Arc<UdpConnection>>,
    closed: std::sync::mpsc::Receiver<u64>,
    shutdown: Arc<AtomicBool>,
    wake_addr: SocketAddr,
    config: UdpEndpointConfig,
}

impl UdpEndpoint {
    pub fn bind(address: &str, config: UdpEndpointConfig, log: Logger) -> io::Result<UdpEndpoint> {
        let socket_addr: SocketAddr = address.parse().map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let mut raw_socket = MioUdpSocket::bind(socket_addr)?;
        socket::configure_mio_udp_socket(&raw_socket, SOCKET_BUFFER_SIZE, SOCKET_BUFFER_SIZE)?;
        let local_addr = raw_socket.local_addr()?;

        let mut wake_socket = MioUdpSocket::bind("127.0.0.1:0".parse().unwrap())?;
        let wake_addr = wake_socket.local_addr()?;

        let mut poll = Poll::new()?;
        poll.registry().register(&mut raw_socket, SOCKET_TOKEN, Interest::READABLE)?;
        poll.registry().register(&mut wake_socket, WAKE_TOKEN, Interest::READABLE)?;

        let socket = Arc::new(Mutex::new(raw_socket));
        let peers: Arc<Mutex<HashMap<SocketAddr, Arc<PeerInner>>>> = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (accepted_tx, accepted_rx) = std::sync::mpsc::channel();
        let (closed_tx, closed_rx) = std::sync::mpsc::channel();

        let service_log = log.new(logging::o!("component" => "udp-endpoint", "addr" => local_addr.to_string()));
        let service_socket = socket.clone();
        let service_peers = peers.clone();
        let service_shutdown = shutdown.clone();

        thread::Builder::new()
            .name("udp-service".to_string())
            .spawn(move || {
                run_service(
                    poll,
                    wake_socket,
                    service_socket,
                    service_peers,
                    accepted_tx,
                    closed_tx,
                    local_addr,
                    service_shutdown,
                    config,
                    service_log,
                )
            })
            .expect("failed spawning udp service thread");

        Ok(UdpEndpoint {
            local_addr,
            socket,
            peers,
            accepted: accepted_rx,
            closed: closed_rx,
            shutdown,
            wake_addr,
            config,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Non-blocking poll for newly completed inbound handshakes.
    pub fn try_accept(&self) -> Option<Arc<UdpConnection>> {
        self.accepted.try_recv().ok()
    }

    /// Non-blocking poll for connection ids the housekeeping pass has just force-closed
    /// (idle timeout) or that the peer explicitly disconnected.
    pub fn try_closed(&self) -> Option<u64> {
        self.closed.try_recv().ok()
    }

    /// Actively initiates a handshake with `remote`, resending the `Connect` packet every
    /// `retry_interval` up to `max_retries` times while waiting for the `Acknowledge` reply.
    /// Mirrors the housekeeping thread's own retransmission cadence rather than trusting a
    /// single packet to make it across.
    pub fn connect(&self, remote: &str, retry_interval: Duration, max_retries: u32) -> Result<Arc<UdpConnection>, NetError> {
        let remote_addr: SocketAddr = remote.parse()?;
        let connect_packet = build_control_packet(PacketType::Connect);

        let poll_interval = Duration::from_millis(5);
        for _ in 0..=max_retries {
            {
                let socket = self.socket.lock().expect("udp socket mutex poisoned");
                socket.send_to(&connect_packet, remote_addr)?;
            }

            let deadline = Instant::now() + retry_interval;
            while Instant::now() < deadline {
                if let Some(conn) = self.try_accept() {
                    if conn.remote_addr() == remote_addr {
                        return Ok(conn);
                    }
                }
                thread::sleep(poll_interval);
            }
        }

        Err(NetError::Timeout)
    }

    /// Shared connection-liveness tunables this endpoint was bound with.
    #[inline]
    pub fn config(&self) -> UdpEndpointConfig {
        self.config
    }

    /// Stops the service thread, waking it out of its blocking poll via the wake socket.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(waker) = std::net::UdpSocket::bind("0.0.0.0:0") {
            let _ = waker.send_to(&[0u8], self.wake_addr);
        }
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_service(
    mut poll: Poll,
    mut wake_socket: MioUdpSocket,
    socket: Arc<Mutex<MioUdpSocket>>,
    peers: Arc<Mutex<HashMap<SocketAddr, Arc<PeerInner>>>>,
    accepted_tx: std::sync::mpsc::Sender<Arc<UdpConnection>>,
    closed_tx: std::sync::mpsc::Sender<u64>,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    config: UdpEndpointConfig,
    log: Logger,
) {
    let mut events = Events::with_capacity(128);
    let mut buf = vec![0u8; 65536];
    let mut wake_buf = [0u8; 16];
    let mut last_housekeeping = Instant::now();

    loop {
        if let Err(e) = poll.poll(&mut events, Some(HOUSEKEEPING_TICK)) {
            logging::warn!(log, "poll error"; "error" => e.to_string());
            continue;
        }

        if shutdown.load(Ordering::Relaxed) {
            logging::info!(log, "udp service thread shutting down");
            return;
        }

        for event in events.iter() {
            match event.token() {
                WAKE_TOKEN => {
                    while wake_socket.recv_from(&mut wake_buf).is_ok() {}
                }
                SOCKET_TOKEN => loop {
                    let (n, from) = {
                        let guard = socket.lock().expect("udp socket mutex poisoned");
                        match guard.recv_from(&mut buf) {
                            Ok(result) => result,
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                            Err(e) => {
                                logging::warn!(log, "udp recv error"; "error" => e.to_string());
                                break;
                            }
                        }
                    };

                    handle_datagram(&buf[..n], from, local_addr, &socket, &peers, &accepted_tx, &closed_tx, config.max_fragment_size, &log);
                },
                _ => unreachable!(),
            }
        }

        if shutdown.load(Ordering::Relaxed) {
            logging::info!(log, "udp service thread shutting down");
            return;
        }

        if last_housekeeping.elapsed() >= HOUSEKEEPING_TICK {
            run_housekeeping(&peers, &closed_tx, config, &log);
            last_housekeeping = Instant::now();
        }
    }
}

/// Pings connections that have gone quiet for `keepalive_interval` and force-closes ones that
/// have exceeded `idle_timeout` without a single inbound packet, reporting the latter on
/// `closed_tx` so the application can react (e.g. drop its own handle, log a disconnect).
fn run_housekeeping(
    peers: &Arc<Mutex<HashMap<SocketAddr, Arc<PeerInner>>>>,
    closed_tx: &std::sync::mpsc::Sender<u64>,
    config: UdpEndpointConfig,
    log: &Logger,
) {
    let mut peers_guard = peers.lock().expect("peers mutex poisoned");
    peers_guard.retain(|_, peer| {
        let state = *peer.state.lock().expect("peer state mutex poisoned");
        if state == PeerState::Closed {
            return false;
        }

        let idle = peer.last_ingress.lock().expect("peer last_ingress mutex poisoned").elapsed();

        if idle >= config.idle_timeout {
            logging::info!(log, "udp peer timed out"; "id" => peer.id, "remote" => peer.addr.to_string());
            *peer.state.lock().expect("peer state mutex poisoned") = PeerState::Closed;
            let _ = closed_tx.send(peer.id as u64);
            return false;
        }

        if state == PeerState::Connected && idle >= config.keepalive_interval {
            let _ = peer.send_control(PacketType::TimeoutProbe);
        }

        true
    });
}

fn handle_datagram(
    data: &[u8],
    from: SocketAddr,
    local_addr: SocketAddr,
    socket: &Arc<Mutex<MioUdpSocket>>,
    peers: &Arc<Mutex<HashMap<SocketAddr, Arc<PeerInner>>>>,
    accepted_tx: &std::sync::mpsc::Sender<Arc<UdpConnection>>,
    closed_tx: &std::sync::mpsc::Sender<u64>,
    max_fragment_size: usize,
    log: &Logger,
) {
    let packet_type = match read_packet_type(data) {
        Some(t) => t,
        None => return,
    };
    let body = &data[PACKET_HEADER_SIZE..];

    match packet_type {
        PacketType::Connect => {
            let mut peers_guard = peers.lock().expect("peers mutex poisoned");
            let peer = peers_guard.entry(from).or_insert_with(|| {
                Arc::new(PeerInner {
                    id: NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed),
                    addr: from,
                    local_addr,
                    socket: socket.clone(),
                    state: Mutex::new(PeerState::Pending),
                    last_ingress: Mutex::new(Instant::now()),
                    next_message_id: AtomicU32::new(0),
                    watermark: AtomicU32::new(0),
                    fragment_sets: Mutex::new(HashMap::new()),
                    inbound: InboundQueue::new(),
                    stats: StatsHandle::new(),
                })
            });

            let was_pending = *peer.state.lock().expect("peer state mutex poisoned") == PeerState::Pending;
            *peer.state.lock().expect("peer state mutex poisoned") = PeerState::Connected;

            let _ = peer.send_control(PacketType::Acknowledge);

            if was_pending {
                logging::info!(log, "udp peer connected"; "id" => peer.id, "remote" => from.to_string());
                let _ = accepted_tx.send(Arc::new(UdpConnection {
                    inner: peer.clone(),
                    max_fragment_size,
                }));
            }
        }
        PacketType::Acknowledge => {
            let mut peers_guard = peers.lock().expect("peers mutex poisoned");
            if let Some(peer) = peers_guard.get_mut(&from) {
                *peer.state.lock().expect("peer state mutex poisoned") = PeerState::Connected;
                *peer.last_ingress.lock().expect("peer last_ingress mutex poisoned") = Instant::now();

                if accepted_tx
                    .send(Arc::new(UdpConnection {
                        inner: peer.clone(),
                        max_fragment_size,
                    }))
                    .is_err()
                {
                    logging::warn!(log, "accepted channel closed");
                }
            }
        }
        PacketType::TimeoutProbe => {
            let peers_guard = peers.lock().expect("peers mutex poisoned");
            if let Some(peer) = peers_guard.get(&from) {
                *peer.last_ingress.lock().expect("peer last_ingress mutex poisoned") = Instant::now();
                let _ = peer.send_control(PacketType::TimeoutProbe);
            }
        }
        PacketType::Disconnect => {
            let mut peers_guard = peers.lock().expect("peers mutex poisoned");
            if let Some(peer) = peers_guard.remove(&from) {
                *peer.state.lock().expect("peer state mutex poisoned") = PeerState::Closed;
                logging::info!(log, "udp peer disconnected"; "id" => peer.id, "remote" => from.to_string());
                let _ = closed_tx.send(peer.id as u64);
            }
        }
        PacketType::Data => {
            let header = match read_data_header(body) {
                Some(h) => h,
                None => return,
            };

            let peers_guard = peers.lock().expect("peers mutex poisoned");
            let peer = match peers_guard.get(&from) {
                Some(peer) => peer.clone(),
                None => return,
            };
            drop(peers_guard);

            *peer.last_ingress.lock().expect("peer last_ingress mutex poisoned") = Instant::now();
            peer.stats.record_fragment_received();

            let payload_start = DATA_HEADER_SIZE;
            let payload_end = payload_start + header.data_size as usize;
            let payload = match body.get(payload_start..payload_end) {
                Some(p) => p,
                None => return,
            };

            if header.id < peer.watermark.load(Ordering::Relaxed) {
                // Stale message, already superseded — drop silently.
                let _ = peer.send_data_ack(header.sequence, header.fragment_index);
                return;
            }

            let mut sets = peer.fragment_sets.lock().expect("fragment sets mutex poisoned");
            let set = sets.entry(header.id).or_insert_with(|| FragmentSet::new(header.total_size));
            set.insert(header.fragment_index, payload);

            if set.is_complete() {
                let set = sets.remove(&header.id).unwrap();
                peer.watermark.store(header.id + 1, Ordering::Relaxed);
                drop(sets);

                let message = set.assemble();
                peer.stats.record_receive(message.len());
                peer.inbound.push(message);
            }

            let _ = peer.send_data_ack(header.sequence, header.fragment_index);
        }
        PacketType::DataAcknowledge => {
            // Stats-only signal; no retransmit logic depends on it.
            let _ = read_data_ack_header(body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn test_logger() -> Logger {
        logging::terminal(sloggers::types::Severity::Critical)
    }

    fn test_config(max_fragment_size: usize) -> UdpEndpointConfig {
        UdpEndpointConfig {
            max_fragment_size,
            ..UdpEndpointConfig::default()
        }
    }

    #[test]
    fn test_handshake_and_single_datagram() {
        let server = UdpEndpoint::bind("127.0.0.1:0", test_config(1200), test_logger()).unwrap();
        let client = UdpEndpoint::bind("127.0.0.1:0", test_config(1200), test_logger()).unwrap();

        let server_addr = server.local_addr().to_string();
        let client_side = client.connect(&server_addr, Duration::from_millis(200), 5).unwrap();

        let server_side = loop {
            if let Some(conn) = server.try_accept() {
                break conn;
            }
            sleep(Duration::from_millis(10));
        };

        client_side.send(b"hello").unwrap();

        let received = loop {
            if let Some(msg) = server_side.pull_next_message() {
                break msg;
            }
            sleep(Duration::from_millis(10));
        };
        assert_eq!(received, b"hello");
    }

    #[test]
    fn test_fragmented_message_reassembles_in_order() {
        let server = UdpEndpoint::bind("127.0.0.1:0", test_config(16), test_logger()).unwrap();
        let client = UdpEndpoint::bind("127.0.0.1:0", test_config(16), test_logger()).unwrap();

        let server_addr = server.local_addr().to_string();
        let client_side = client.connect(&server_addr, Duration::from_millis(200), 5).unwrap();

        let server_side = loop {
            if let Some(conn) = server.try_accept() {
                break conn;
            }
            sleep(Duration::from_millis(10));
        };

        let payload: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
        client_side.send(&payload).unwrap();

        let received = loop {
            if let Some(msg) = server_side.pull_next_message() {
                break msg;
            }
            sleep(Duration::from_millis(10));
        };
        assert_eq!(received, payload);
        assert!(server_side.stats().fragments_received > 1);
    }

    #[test]
    fn test_connect_to_dead_server_times_out() {
        let client = UdpEndpoint::bind("127.0.0.1:0", test_config(1200), test_logger()).unwrap();
        // Nothing is listening on this port.
        let result = client.connect("127.0.0.1:1", Duration::from_millis(50), 3);
        assert!(matches!(result, Err(NetError::Timeout)));
    }

    #[test]
    fn test_idle_connection_is_closed_and_reported() {
        // A bare socket stands in for a peer that handshakes once and then goes silent —
        // unlike a real `UdpEndpoint`, it never answers the server's keepalive probes, so the
        // server's housekeeping pass has nothing keeping the connection alive.
        let config = UdpEndpointConfig {
            max_fragment_size: 1200,
            keepalive_interval: Duration::from_millis(500),
            idle_timeout: Duration::from_millis(100),
        };
        let server = UdpEndpoint::bind("127.0.0.1:0", config, test_logger()).unwrap();
        let server_addr: SocketAddr = server.local_addr();

        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let connect_packet = build_control_packet(PacketType::Connect);
        peer.send_to(&connect_packet, server_addr).unwrap();

        let server_side = loop {
            if let Some(conn) = server.try_accept() {
                break conn;
            }
            sleep(Duration::from_millis(10));
        };
        assert!(server_side.is_connected());

        let closed_id = loop {
            if let Some(id) = server.try_closed() {
                break id;
            }
            sleep(Duration::from_millis(10));
        };
        assert_eq!(closed_id, server_side.id());
        assert!(!server_side.is_connected());
    }

    #[test]
    fn test_packet_header_is_bit_exact() {
        let packet = build_control_packet(PacketType::Connect);
        assert_eq!(packet.len(), PACKET_HEADER_SIZE);
        assert_eq!(packet[0], PacketType::Connect as u8);
    }

    #[test]
    fn test_data_header_round_trips() {
        let mut buf = Vec::new();
        write_packet_header(&mut buf, PacketType::Data);
        write_data_header(
            &mut buf,
            &DataHeader {
                id: 7,
                sequence: 7,
                fragment_index: 1,
                data_size: 3,
                total_size: 10,
            },
        );
        assert_eq!(buf.len(), PACKET_HEADER_SIZE + DATA_HEADER_SIZE);

        let header = read_data_header(&buf[PACKET_HEADER_SIZE..]).unwrap();
        assert_eq!(header.id, 7);
        assert_eq!(header.fragment_index, 1);
        assert_eq!(header.data_size, 3);
        assert_eq!(header.total_size, 10);
    }
}
