//! Framed TCP transport. One blocking accept thread per listener and one blocking reader
//! thread per connection — no event loop, as required for this transport. Each connection's
//! write half is a `TcpStream` clone guarded by a mutex so `send` can be called directly from
//! the application thread without going through the reader.
//!
//! Wire format: an 8-byte header (`magic: u16 = 0xF00D`, `checksum: u16`, `length: u32`
//! including the header itself) followed by the payload the checksum covers.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use flux::logging::{self, Logger};

use crate::net::connection::{Connection, InboundQueue};
use crate::net::error::NetError;
use crate::net::reassembler::{Inspection, Inspector, Reassembler};
use crate::net::socket;
use crate::net::stats::{ConnectionStats, StatsHandle};

const SOCKET_BUFFER_SIZE: usize = 1 << 18;

pub const MAGIC: u16 = 0xF00D;
const HEADER_SIZE: usize = 8;
const READ_CHUNK: usize = 65536;

/// Read timeout on the blocking socket. Bounds how long the reader thread can be stuck in
/// `read()` after `close()` is called, so shutdown is prompt without needing the socket to be
/// woken externally (unlike the UDP endpoint, which shares one thread across many peers).
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// IEEE 802.3 CRC-32 (polynomial 0xEDB88320, reflected), computed bitwise rather than via a
/// lookup table since frames are small and this runs once per message, not once per byte of
/// a bulk transfer.
fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB88320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (POLY & mask);
        }
    }
    !crc
}

/// The transport header only carries the low 16 bits of the CRC-32, so a mismatch among the
/// high bits would go unnoticed — this is the checksum width the wire format budgets for.
fn crc_low16(data: &[u8]) -> u16 {
    (crc32(data) & 0xffff) as u16
}

fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let length = (HEADER_SIZE + payload.len()) as u32;
    let checksum = crc_low16(payload);

    let mut frame = Vec::with_capacity(length as usize);
    frame.extend_from_slice(&MAGIC.to_le_bytes());
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn verify_and_strip(frame: &[u8]) -> Result<Vec<u8>, NetError> {
    let checksum = u16::from_le_bytes([frame[2], frame[3]]);
    let payload = &frame[HEADER_SIZE..];

    if crc_low16(payload) != checksum {
        return Err(NetError::ChecksumMismatch);
    }

    Ok(payload.to_vec())
}

struct FrameInspector {
    max_message_size: usize,
}

impl Inspector for FrameInspector {
    fn header_size(&self) -> usize {
        HEADER_SIZE
    }

    fn inspect(&self, header: &[u8]) -> Inspection {
        let magic = u16::from_le_bytes([header[0], header[1]]);
        if magic != MAGIC {
            return Inspection::Corruption;
        }

        let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if length < HEADER_SIZE || length > self.max_message_size {
            return Inspection::Corruption;
        }

        Inspection::Valid(length)
    }
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// One established TCP connection, read by a dedicated background thread and written to
/// directly from whichever thread calls `send`.
pub struct TcpChannel {
    id: u64,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    writer: Mutex<TcpStream>,
    connected: Arc<AtomicBool>,
    inbound: InboundQueue,
    stats: StatsHandle,
    log: Logger,
}

impl TcpChannel {
    fn spawn(stream: TcpStream, max_message_size: usize, log: Logger) -> io::Result<Arc<TcpChannel>> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        socket::configure_tcp_stream(&stream, SOCKET_BUFFER_SIZE, SOCKET_BUFFER_SIZE)?;

        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        let writer_stream = stream.try_clone()?;

        let channel = Arc::new(TcpChannel {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            local_addr,
            remote_addr,
            writer: Mutex::new(writer_stream),
            connected: Arc::new(AtomicBool::new(true)),
            inbound: InboundQueue::new(),
            stats: StatsHandle::new(),
            log: log.new(logging::o!("remote" => remote_addr.to_string())),
        });

        let reader_channel = channel.clone();
        thread::Builder::new()
            .name(format!("tcp-reader-{}", channel.id))
            .spawn(move || reader_channel.run_reader(stream, max_message_size))
            .expect("failed spawning tcp reader thread");

        Ok(channel)
    }

    fn run_reader(self: Arc<Self>, mut stream: TcpStream, max_message_size: usize) {
        let mut reassembler = Reassembler::new(FrameInspector { max_message_size }, max_message_size);
        let mut buf = vec![0u8; READ_CHUNK];

        logging::info!(self.log, "tcp channel connected"; "id" => self.id);

        'read_loop: while self.connected.load(Ordering::Relaxed) {
            match stream.read(&mut buf) {
                Ok(0) => {
                    logging::info!(self.log, "peer closed connection"; "id" => self.id);
                    break;
                }
                Ok(n) => {
                    if reassembler.feed(&buf[..n]).is_err() {
                        logging::warn!(self.log, "corrupt tcp stream, closing"; "id" => self.id);
                        break;
                    }

                    loop {
                        match reassembler.pop() {
                            Ok(Some(frame)) => match verify_and_strip(&frame) {
                                Ok(payload) => {
                                    self.stats.record_receive(payload.len());
                                    self.inbound.push(payload);
                                }
                                Err(_) => {
                                    logging::warn!(self.log, "checksum mismatch, closing"; "id" => self.id);
                                    break 'read_loop;
                                }
                            },
                            Ok(None) => break,
                            Err(_) => {
                                logging::warn!(self.log, "malformed tcp frame, closing"; "id" => self.id);
                                break 'read_loop;
                            }
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    logging::warn!(self.log, "tcp read error"; "id" => self.id, "error" => e.to_string());
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::Relaxed);
        let _ = stream.shutdown(std::net::Shutdown::Both);
    }
}

impl Connection for TcpChannel {
    fn id(&self) -> u64 {
        self.id
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn stats(&self) -> ConnectionStats {
        self.stats.snapshot()
    }

    fn send(&self, payload: &[u8]) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::UnknownConnection(self.id));
        }

        let frame = encode_frame(payload);
        let mut writer = self.writer.lock().expect("tcp writer mutex poisoned");
        writer.write_all(&frame)?;
        self.stats.record_send(payload.len());
        Ok(())
    }

    fn pull_next_message(&self) -> Option<Vec<u8>> {
        self.inbound.pop()
    }

    fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        if let Ok(writer) = self.writer.lock() {
            let _ = writer.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// Listens for incoming connections on a background accept thread and hands each accepted
/// `TcpChannel` out over an mpsc channel.
pub struct TcpServer {
    local_addr: SocketAddr,
    incoming: Receiver<Arc<TcpChannel>>,
}

impl TcpServer {
    pub fn bind(address: &str, max_message_size: usize, log: Logger) -> io::Result<TcpServer> {
        let listener = TcpListener::bind(address)?;
        socket::configure_tcp_listener(&listener, SOCKET_BUFFER_SIZE, SOCKET_BUFFER_SIZE)?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel();

        let accept_log = log.new(logging::o!("component" => "tcp-server", "addr" => local_addr.to_string()));
        thread::Builder::new()
            .name("tcp-accept".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    match stream {
                        Ok(stream) => match TcpChannel::spawn(stream, max_message_size, accept_log.clone()) {
                            Ok(channel) => {
                                if tx.send(channel).is_err() {
                                    break;
                                }
                            }
                            Err(e) => logging::warn!(accept_log, "failed accepting connection"; "error" => e.to_string()),
                        },
                        Err(e) => logging::warn!(accept_log, "accept error"; "error" => e.to_string()),
                    }
                }
            })
            .expect("failed spawning tcp accept thread");

        Ok(TcpServer { local_addr, incoming: rx })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Non-blocking poll for newly accepted connections.
    pub fn try_accept(&self) -> Option<Arc<TcpChannel>> {
        self.incoming.try_recv().ok()
    }
}

/// Connects out to a listening `TcpServer`, blocking until the handshake completes.
pub struct TcpClient;

impl TcpClient {
    pub fn connect(address: &str, max_message_size: usize, log: Logger) -> io::Result<Arc<TcpChannel>> {
        let stream = TcpStream::connect(address)?;
        TcpChannel::spawn(stream, max_message_size, log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn test_logger() -> Logger {
        logging::terminal(sloggers::types::Severity::Critical)
    }

    #[test]
    fn test_crc32_matches_known_vector() {
        // "123456789" is the standard CRC-32/IEEE check string; 0xCBF43926 is its checksum.
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn test_frame_header_is_little_endian() {
        let frame = encode_frame(b"hi");
        assert_eq!(u16::from_le_bytes([frame[0], frame[1]]), MAGIC);
        assert_eq!(u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]), frame.len() as u32);
    }

    #[test]
    fn test_checksum_roundtrip() {
        let frame = encode_frame(b"hello world");
        let payload = verify_and_strip(&frame).unwrap();
        assert_eq!(payload, b"hello world");
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut frame = encode_frame(b"hello world");
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(verify_and_strip(&frame).is_err());
    }

    #[test]
    fn test_echo_round_trip_over_loopback() {
        let server = TcpServer::bind("127.0.0.1:0", 1 << 20, test_logger()).unwrap();
        let addr = server.local_addr();

        let client = TcpClient::connect(&addr.to_string(), 1 << 20, test_logger()).unwrap();

        let server_side = loop {
            if let Some(channel) = server.try_accept() {
                break channel;
            }
            sleep(Duration::from_millis(10));
        };

        client.send(b"ping").unwrap();

        let message = loop {
            if let Some(msg) = server_side.pull_next_message() {
                break msg;
            }
            sleep(Duration::from_millis(10));
        };
        assert_eq!(message, b"ping");

        server_side.send(b"pong").unwrap();
        let reply = loop {
            if let Some(msg) = client.pull_next_message() {
                break msg;
            }
            sleep(Duration::from_millis(10));
        };
        assert_eq!(reply, b"pong");
    }

    #[test]
    fn test_close_marks_disconnected() {
        let server = TcpServer::bind("127.0.0.1:0", 1 << 20, test_logger()).unwrap();
        let addr = server.local_addr();
        let client = TcpClient::connect(&addr.to_string(), 1 << 20, test_logger()).unwrap();

        client.close();
        sleep(Duration::from_millis(50));
        assert!(!client.is_connected());
    }
}
