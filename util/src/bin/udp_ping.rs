//! Exercises the UDP endpoint end to end: binds locally, connects to a remote address given
//! on the command line, sends a single datagram and waits for a reply.
//!
//! Usage: `udp_ping <remote-host:port> [payload]`

use std::time::Duration;

use flux::logging;
use neutronium::net::connection::Connection;
use neutronium::net::udp::{UdpEndpoint, UdpEndpointConfig};

fn main() {
    let log = logging::terminal(sloggers::types::Severity::Info);

    let mut args = std::env::args().skip(1);
    let remote = match args.next() {
        Some(remote) => remote,
        None => {
            eprintln!("usage: udp_ping <remote-host:port> [payload]");
            std::process::exit(2);
        }
    };
    let payload = args.next().unwrap_or_else(|| "ping".to_string());

    let endpoint = UdpEndpoint::bind("0.0.0.0:0", UdpEndpointConfig::default(), log.new(logging::o!("tool" => "udp_ping")))
        .expect("failed binding local UDP socket");

    logging::info!(log, "connecting"; "remote" => remote.clone());
    let connection = endpoint
        .connect(&remote, Duration::from_secs(2), 5)
        .expect("failed connecting to remote endpoint");

    connection.send(payload.as_bytes()).expect("failed sending ping payload");
    logging::info!(log, "sent ping"; "bytes" => payload.len());

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(message) = connection.pull_next_message() {
            println!("reply: {}", String::from_utf8_lossy(&message));
            return;
        }
        if std::time::Instant::now() >= deadline {
            eprintln!("timed out waiting for a reply");
            std::process::exit(1);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
