//! A toy replicated message type: one player's display name and position, broadcast every
//! tick so a newly connected client and a long-running one both see the same wire format.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use flux::shared::{SizedRead, SizedWrite};
use neutronium::net::error::NetError;
use neutronium::net::knowledge::{KnowledgeResolver, KnowledgeUpdater};
use neutronium::net::replicator::ReplicatedMessage;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub player_id: u32,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl ReplicatedMessage for PlayerState {
    fn record<W: SizedWrite>(&self, updater: &mut KnowledgeUpdater, stream: &mut W) -> Result<(), NetError> {
        let name_id = updater.map_string(&self.name);

        stream
            .write_u32::<BigEndian>(self.player_id)
            .map_err(|_| NetError::Corruption("player state write failed"))?;
        stream
            .write_u32::<BigEndian>(name_id)
            .map_err(|_| NetError::Corruption("player state write failed"))?;
        stream
            .write_f32::<BigEndian>(self.x)
            .map_err(|_| NetError::Corruption("player state write failed"))?;
        stream
            .write_f32::<BigEndian>(self.y)
            .map_err(|_| NetError::Corruption("player state write failed"))?;
        stream
            .write_f32::<BigEndian>(self.z)
            .map_err(|_| NetError::Corruption("player state write failed"))?;
        Ok(())
    }

    fn restore<R: SizedRead>(resolver: &KnowledgeResolver, stream: &mut R) -> Result<PlayerState, NetError> {
        let player_id = stream.read_u32::<BigEndian>().map_err(|_| NetError::Corruption("player state read failed"))?;
        let name_id = stream.read_u32::<BigEndian>().map_err(|_| NetError::Corruption("player state read failed"))?;
        let x = stream.read_f32::<BigEndian>().map_err(|_| NetError::Corruption("player state read failed"))?;
        let y = stream.read_f32::<BigEndian>().map_err(|_| NetError::Corruption("player state read failed"))?;
        let z = stream.read_f32::<BigEndian>().map_err(|_| NetError::Corruption("player state read failed"))?;

        let name = resolver.resolve_string(name_id).ok_or(NetError::DictionaryMiss(name_id))?.to_string();

        Ok(PlayerState {
            player_id,
            name,
            x,
            y,
            z,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neutronium::net::object_repo::MessageObjectRepository;
    use neutronium::net::replicator::Replicator;
    use std::sync::Arc;

    #[test]
    fn test_player_state_round_trips_through_replicator() {
        let sender_objects = Arc::new(MessageObjectRepository::<()>::new());
        let mut sender = Replicator::new(sender_objects);

        let state = PlayerState {
            player_id: 7,
            name: "hatch".to_string(),
            x: 1.5,
            y: -2.0,
            z: 0.25,
        };
        sender.record(&state).unwrap();
        let frame = sender.drain_frame(65536).unwrap();

        let receiver_objects = Arc::new(MessageObjectRepository::<()>::new());
        let mut receiver = Replicator::new(receiver_objects);
        let messages: Vec<PlayerState> = receiver.ingest_frame(&frame).unwrap();

        assert_eq!(messages, vec![state]);
    }
}
