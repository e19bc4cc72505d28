pub use crate::net::address::Address;
pub use crate::net::block::{Block, BlockAllocator};
pub use crate::net::command::{CancellationToken, CommandHost, ExecutionReport};
pub use crate::net::connection::{Connection, InboundQueue};
pub use crate::net::error::{ErrorSeverity, NetError, NetResult};
pub use crate::net::knowledge::{KnowledgeResolver, KnowledgeUpdater, MessageKnowledgeBase};
pub use crate::net::object_repo::MessageObjectRepository;
pub use crate::net::reassembler::{Inspection, Inspector, Reassembler};
pub use crate::net::replicator::{ReplicatedMessage, Replicator};
pub use crate::net::singleton::ShutdownRegistry;
pub use crate::net::stats::{ConnectionStats, StatsHandle};
pub use crate::net::tcp::{TcpChannel, TcpClient, TcpServer};
pub use crate::net::udp::{UdpConnection, UdpEndpoint, UdpEndpointConfig};
