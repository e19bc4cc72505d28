//! The tick loop binding the UDP endpoint, per-peer replication, and the shared object
//! repository together into one running game server instance. TCP is accepted alongside UDP
//! (e.g. for an administrative/spectator connection) but is not yet wired into replication.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flux::logging::{self, Logger};
use neutronium::net::connection::Connection;
use neutronium::net::object_repo::MessageObjectRepository;
use neutronium::net::replicator::Replicator;
use neutronium::net::tcp::TcpServer;
use neutronium::net::udp::{UdpConnection, UdpEndpoint, UdpEndpointConfig};

use crate::config::GameConfig;
use crate::replicator::PlayerState;

/// Upper bound on how many bytes of queued framelets go out in a single tick's frame.
const MAX_FRAME_BYTES: usize = 16 * 1024;

struct PeerSession {
    connection: Arc<UdpConnection>,
    replicator: Replicator<()>,
}

/// Owns the UDP endpoint, the TCP server, the shared player-object repository, and one
/// [`Replicator`] per connected peer.
pub struct GameServer {
    udp: UdpEndpoint,
    tcp: TcpServer,
    objects: Arc<MessageObjectRepository<()>>,
    sessions: HashMap<u64, PeerSession>,
    log: Logger,
}

impl GameServer {
    pub fn bind(config: &GameConfig, log: Logger) -> std::io::Result<GameServer> {
        let udp_config = UdpEndpointConfig {
            max_fragment_size: config.net.udp.max_fragment_size,
            keepalive_interval: Duration::from_secs(config.net.udp.keepalive_interval_secs),
            idle_timeout: Duration::from_secs(config.net.udp.idle_timeout_secs),
        };
        let udp = UdpEndpoint::bind(&config.net.udp.bind_address, udp_config, log.new(logging::o!("transport" => "udp")))?;
        let tcp = TcpServer::bind(
            &config.net.tcp.bind_address,
            config.net.tcp.max_message_size,
            log.new(logging::o!("transport" => "tcp")),
        )?;

        Ok(GameServer {
            udp,
            tcp,
            objects: Arc::new(MessageObjectRepository::new()),
            sessions: HashMap::new(),
            log,
        })
    }

    /// Runs one tick: accepts new peers, retires closed ones, drains inbound frames into
    /// `PlayerState` updates, and rebroadcasts every update received this tick to every
    /// connected peer.
    pub fn tick(&mut self) {
        self.accept_new_peers();
        self.retire_closed_peers();

        while self.tcp.try_accept().is_some() {
            logging::info!(self.log, "tcp peer accepted, not wired into replication");
        }

        let updates = self.drain_inbound();
        self.broadcast(&updates);
    }

    fn accept_new_peers(&mut self) {
        while let Some(conn) = self.udp.try_accept() {
            logging::info!(self.log, "player joined"; "id" => conn.id());
            self.sessions.insert(
                conn.id(),
                PeerSession {
                    connection: conn,
                    replicator: Replicator::new(self.objects.clone()),
                },
            );
        }
    }

    fn retire_closed_peers(&mut self) {
        while let Some(id) = self.udp.try_closed() {
            logging::info!(self.log, "player left"; "id" => id);
            self.sessions.remove(&id);
        }
    }

    fn drain_inbound(&mut self) -> Vec<PlayerState> {
        let mut updates = Vec::new();
        for session in self.sessions.values_mut() {
            while let Some(frame) = session.connection.pull_next_message() {
                match session.replicator.ingest_frame::<PlayerState>(&frame) {
                    Ok(states) => updates.extend(states),
                    Err(e) => logging::warn!(
                        self.log, "dropping malformed frame";
                        "id" => session.connection.id(), "error" => format!("{:?}", e)
                    ),
                }
            }
        }
        updates
    }

    fn broadcast(&mut self, updates: &[PlayerState]) {
        if updates.is_empty() {
            return;
        }

        for session in self.sessions.values_mut() {
            for state in updates {
                if let Err(e) = session.replicator.record(state) {
                    logging::warn!(self.log, "failed recording player state"; "id" => session.connection.id(), "error" => format!("{:?}", e));
                }
            }

            while let Some(frame) = session.replicator.drain_frame(MAX_FRAME_BYTES) {
                if let Err(e) = session.connection.send(&frame) {
                    logging::warn!(self.log, "failed sending replication frame"; "id" => session.connection.id(), "error" => format!("{:?}", e));
                    break;
                }
            }
        }
    }

    #[inline]
    pub fn connected_peers(&self) -> usize {
        self.sessions.len()
    }
}
