//! Per-connection message replicator. Serializes typed application messages against a
//! connection's private [`MessageKnowledgeBase`]/[`MessageObjectRepository`] pair, emitting a
//! dictionary "framelet" the first time a string, path or object is referenced so the peer
//! can resolve later call framelets that only carry the id. Grounded on the original
//! `tcpMessageClient.cpp`'s wiring of a reassembler + object repository + replicator as one
//! unit, and on `messageKnowledgeSync.cpp` for the framelet-before-reference ordering.

use std::collections::VecDeque;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use flux::shared::{SizedRead, SizedWrite};

use crate::net::error::NetError;
use crate::net::knowledge::{KnowledgeResolver, KnowledgeUpdateSink, KnowledgeUpdater, MappedId, MessageKnowledgeBase};
use crate::net::object_repo::MessageObjectRepository;

const TAG_STRING_DEF: u8 = 0;
const TAG_PATH_DEF: u8 = 1;
const TAG_CALL: u8 = 2;

enum Framelet {
    StringDef(MappedId, String),
    PathDef(MappedId, MappedId, MappedId),
    Call(Vec<u8>),
}

impl Framelet {
    fn encoded_len(&self) -> usize {
        match self {
            Framelet::StringDef(_, text) => 1 + 4 + 2 + text.len(),
            Framelet::PathDef(..) => 1 + 4 + 4 + 4,
            Framelet::Call(bytes) => 1 + 4 + bytes.len(),
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            Framelet::StringDef(id, text) => {
                buf.write_u8(TAG_STRING_DEF).unwrap();
                buf.write_u32::<BigEndian>(*id).unwrap();
                buf.write_u16::<BigEndian>(text.len() as u16).unwrap();
                buf.extend_from_slice(text.as_bytes());
            }
            Framelet::PathDef(id, text_id, parent_id) => {
                buf.write_u8(TAG_PATH_DEF).unwrap();
                buf.write_u32::<BigEndian>(*id).unwrap();
                buf.write_u32::<BigEndian>(*text_id).unwrap();
                buf.write_u32::<BigEndian>(*parent_id).unwrap();
            }
            Framelet::Call(bytes) => {
                buf.write_u8(TAG_CALL).unwrap();
                buf.write_u32::<BigEndian>(bytes.len() as u32).unwrap();
                buf.extend_from_slice(bytes);
            }
        }
    }
}

/// Collects framelets produced as a side effect of mapping strings/paths while recording a
/// message, so the replicator can queue them ahead of the call that referenced them.
struct FrameletSink<'a> {
    queue: &'a mut VecDeque<Framelet>,
}

impl<'a> KnowledgeUpdateSink for FrameletSink<'a> {
    fn report_new_string(&mut self, id: MappedId, text: &str) {
        self.queue.push_back(Framelet::StringDef(id, text.to_string()));
    }

    fn report_new_path(&mut self, id: MappedId, text_id: MappedId, parent_id: MappedId) {
        self.queue.push_back(Framelet::PathDef(id, text_id, parent_id));
    }
}

/// A message type the replicator can record and later deliver. `record` has access to a
/// [`KnowledgeUpdater`] so it can map strings/paths/objects to ids inline while it writes its
/// fields; `restore` gets the matching [`KnowledgeResolver`] to map ids back.
pub trait ReplicatedMessage: Sized {
    fn record<W: SizedWrite>(&self, updater: &mut KnowledgeUpdater, stream: &mut W) -> Result<(), NetError>;
    fn restore<R: SizedRead>(resolver: &KnowledgeResolver, stream: &mut R) -> Result<Self, NetError>;
}

/// Per-connection replication state: one knowledge base, one object repository, and a queue
/// of framelets waiting to be batched into outgoing frames.
pub struct Replicator<T> {
    knowledge: MessageKnowledgeBase,
    objects: Arc<MessageObjectRepository<T>>,
    pending: VecDeque<Framelet>,
}

impl<T> Replicator<T> {
    pub fn new(objects: Arc<MessageObjectRepository<T>>) -> Replicator<T> {
        Replicator {
            knowledge: MessageKnowledgeBase::new(),
            objects,
            pending: VecDeque::new(),
        }
    }

    #[inline]
    pub fn objects(&self) -> &Arc<MessageObjectRepository<T>> {
        &self.objects
    }

    /// Serializes `message`, queueing any dictionary framelets its `record` implementation
    /// triggers ahead of the call framelet that carries its bytes.
    pub fn record<M: ReplicatedMessage>(&mut self, message: &M) -> Result<(), NetError> {
        let mut body = vec![0u8; 0];
        let mut call_bytes = Vec::new();

        {
            let mut sink = FrameletSink { queue: &mut self.pending };
            let mut updater = KnowledgeUpdater::new(&mut self.knowledge, &mut sink);

            // Messages serialize into a growable cursor; capacity is pre-sized generously and
            // re-sliced down to what was actually written.
            body.resize(64 * 1024, 0);
            let mut cursor = Cursor::new(&mut body[..]);
            message.record(&mut updater, &mut cursor)?;
            let written = cursor.position() as usize;
            call_bytes.extend_from_slice(&body[..written]);
        }

        self.pending.push_back(Framelet::Call(call_bytes));
        Ok(())
    }

    /// Packs queued framelets into a single frame payload no larger than `max_bytes`.
    /// Framelets that don't fit are left queued for the next call. Returns `None` if nothing
    /// is queued.
    pub fn drain_frame(&mut self, max_bytes: usize) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }

        let mut frame = Vec::new();
        while let Some(next) = self.pending.front() {
            if !frame.is_empty() && frame.len() + next.encoded_len() > max_bytes {
                break;
            }
            let framelet = self.pending.pop_front().unwrap();
            framelet.write(&mut frame);
        }

        if frame.is_empty() {
            None
        } else {
            Some(frame)
        }
    }

    /// Decodes a frame payload received from the peer, updating the knowledge base from any
    /// dictionary framelets and restoring any call framelets into messages.
    pub fn ingest_frame<M: ReplicatedMessage>(&mut self, frame: &[u8]) -> Result<Vec<M>, NetError> {
        let mut messages = Vec::new();
        let mut cursor = Cursor::new(frame);

        while (cursor.position() as usize) < frame.len() {
            let tag = cursor.read_u8().map_err(|_| NetError::Corruption("truncated framelet tag"))?;

            match tag {
                TAG_STRING_DEF => {
                    let id = cursor.read_u32::<BigEndian>().map_err(|_| NetError::Corruption("truncated string def"))?;
                    let len = cursor.read_u16::<BigEndian>().map_err(|_| NetError::Corruption("truncated string def"))? as usize;
                    let start = cursor.position() as usize;
                    let end = start + len;
                    if end > frame.len() {
                        return Err(NetError::Corruption("string def overruns frame"));
                    }
                    let text = std::str::from_utf8(&frame[start..end]).map_err(|_| NetError::Corruption("non utf8 string def"))?;
                    self.knowledge.map_string(text);
                    // The remote assigned `id`; we trust the dictionary ordering to have us
                    // assign the very same id locally since both sides map in emission order.
                    debug_assert_eq!(self.knowledge.map_string(text).0, id);
                    cursor.set_position(end as u64);
                }
                TAG_PATH_DEF => {
                    let _id = cursor.read_u32::<BigEndian>().map_err(|_| NetError::Corruption("truncated path def"))?;
                    let text_id = cursor.read_u32::<BigEndian>().map_err(|_| NetError::Corruption("truncated path def"))?;
                    let parent_id = cursor.read_u32::<BigEndian>().map_err(|_| NetError::Corruption("truncated path def"))?;
                    self.knowledge.map_path_part(text_id, parent_id);
                }
                TAG_CALL => {
                    let len = cursor.read_u32::<BigEndian>().map_err(|_| NetError::Corruption("truncated call"))? as usize;
                    let start = cursor.position() as usize;
                    let end = start + len;
                    if end > frame.len() {
                        return Err(NetError::Corruption("call framelet overruns frame"));
                    }

                    let resolver = KnowledgeResolver::new(&self.knowledge);
                    let mut body_cursor = Cursor::new(&frame[start..end]);
                    messages.push(M::restore(&resolver, &mut body_cursor)?);
                    cursor.set_position(end as u64);
                }
                _ => return Err(NetError::Corruption("unknown framelet tag")),
            }
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::knowledge::{KnowledgeResolver, KnowledgeUpdater};

    struct Chat {
        channel: String,
        text: String,
    }

    impl ReplicatedMessage for Chat {
        fn record<W: SizedWrite>(&self, updater: &mut KnowledgeUpdater, stream: &mut W) -> Result<(), NetError> {
            let channel_id = updater.map_string(&self.channel);
            stream.write_u32::<BigEndian>(channel_id).map_err(|_| NetError::Corruption("write failed"))?;
            stream
                .write_u16::<BigEndian>(self.text.len() as u16)
                .map_err(|_| NetError::Corruption("write failed"))?;
            stream.write_all(self.text.as_bytes()).map_err(|_| NetError::Corruption("write failed"))?;
            Ok(())
        }

        fn restore<R: SizedRead>(resolver: &KnowledgeResolver, stream: &mut R) -> Result<Chat, NetError> {
            let channel_id = stream.read_u32::<BigEndian>().map_err(|_| NetError::Corruption("read failed"))?;
            let len = stream.read_u16::<BigEndian>().map_err(|_| NetError::Corruption("read failed"))? as usize;
            let mut text = vec![0u8; len];
            stream.read_exact(&mut text).map_err(|_| NetError::Corruption("read failed"))?;

            let channel = resolver.resolve_string(channel_id).ok_or(NetError::DictionaryMiss(channel_id))?.to_string();

            Ok(Chat {
                channel,
                text: String::from_utf8_lossy(&text).to_string(),
            })
        }
    }

    #[test]
    fn test_record_and_ingest_round_trip() {
        use std::io::Write;

        let objects = Arc::new(MessageObjectRepository::<()>::new());
        let mut sender = Replicator::new(objects.clone());

        sender
            .record(&Chat {
                channel: "general".to_string(),
                text: "hi".to_string(),
            })
            .unwrap();

        let frame = sender.drain_frame(65536).unwrap();
        assert!(sender.drain_frame(65536).is_none());

        let receiver_objects = Arc::new(MessageObjectRepository::<()>::new());
        let mut receiver = Replicator::new(receiver_objects);
        let messages: Vec<Chat> = receiver.ingest_frame(&frame).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].channel, "general");
        assert_eq!(messages[0].text, "hi");
    }

    #[test]
    fn test_dictionary_not_resent_for_repeated_value() {
        let objects = Arc::new(MessageObjectRepository::<()>::new());
        let mut sender = Replicator::new(objects);

        sender
            .record(&Chat {
                channel: "general".to_string(),
                text: "one".to_string(),
            })
            .unwrap();
        sender
            .record(&Chat {
                channel: "general".to_string(),
                text: "two".to_string(),
            })
            .unwrap();

        let frame = sender.drain_frame(65536).unwrap();

        // Exactly one StringDef framelet (for "general") plus two Call framelets.
        let mut tags = Vec::new();
        let mut cursor = Cursor::new(&frame[..]);
        while (cursor.position() as usize) < frame.len() {
            let tag = cursor.read_u8().unwrap();
            tags.push(tag);
            match tag {
                TAG_STRING_DEF => {
                    cursor.read_u32::<BigEndian>().unwrap();
                    let len = cursor.read_u16::<BigEndian>().unwrap() as usize;
                    cursor.set_position(cursor.position() + len as u64);
                }
                TAG_CALL => {
                    let len = cursor.read_u32::<BigEndian>().unwrap() as usize;
                    cursor.set_position(cursor.position() + len as u64);
                }
                _ => unreachable!(),
            }
        }

        assert_eq!(tags.iter().filter(|&&t| t == TAG_STRING_DEF).count(), 1);
        assert_eq!(tags.iter().filter(|&&t| t == TAG_CALL).count(), 2);
    }

    #[test]
    fn test_call_frame_referencing_unknown_id_is_dictionary_miss() {
        // A Call framelet whose body references string id 99, with no StringDef ever
        // preceding it on this connection, standing in for a corrupt or forged wire frame.
        let mut body = Vec::new();
        body.write_u32::<BigEndian>(99).unwrap();
        body.write_u16::<BigEndian>(2).unwrap();
        body.extend_from_slice(b"hi");

        let mut frame = Vec::new();
        Framelet::Call(body).write(&mut frame);

        let objects = Arc::new(MessageObjectRepository::<()>::new());
        let mut receiver = Replicator::new(objects);
        let result: Result<Vec<Chat>, NetError> = receiver.ingest_frame(&frame);

        assert!(matches!(result, Err(NetError::DictionaryMiss(99))));
    }
}
