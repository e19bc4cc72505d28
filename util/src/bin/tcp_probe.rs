//! Exercises the TCP transport end to end: connects to a remote message server, sends one
//! framed message and prints whatever comes back.
//!
//! Usage: `tcp_probe <remote-host:port> [payload]`

use std::time::Duration;

use flux::logging;
use neutronium::net::connection::Connection;
use neutronium::net::tcp::TcpClient;

const MAX_MESSAGE_SIZE: usize = 64 * 1024;

fn main() {
    let log = logging::terminal(sloggers::types::Severity::Info);

    let mut args = std::env::args().skip(1);
    let remote = match args.next() {
        Some(remote) => remote,
        None => {
            eprintln!("usage: tcp_probe <remote-host:port> [payload]");
            std::process::exit(2);
        }
    };
    let payload = args.next().unwrap_or_else(|| "probe".to_string());

    logging::info!(log, "connecting"; "remote" => remote.clone());
    let channel = TcpClient::connect(&remote, MAX_MESSAGE_SIZE, log.new(logging::o!("tool" => "tcp_probe")))
        .expect("failed connecting to remote message server");

    channel.send(payload.as_bytes()).expect("failed sending probe payload");
    logging::info!(log, "sent probe"; "bytes" => payload.len());

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(message) = channel.pull_next_message() {
            println!("reply: {}", String::from_utf8_lossy(&message));
            return;
        }
        if !channel.is_connected() {
            eprintln!("connection closed before a reply arrived");
            std::process::exit(1);
        }
        if std::time::Instant::now() >= deadline {
            eprintln!("timed out waiting for a reply");
            std::process::exit(1);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
