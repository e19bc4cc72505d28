//! Generic stream reassembler. Grounded on the original `messageReassembler.cpp`: bytes are
//! fed in as they arrive off a stream socket, an `Inspector` is asked whether the bytes seen
//! so far describe a complete message, and once they do the message is popped out as an
//! owned `Vec<u8>` (header included) for the caller to parse. Corruption is sticky — once the
//! inspector rejects a header, the reassembler refuses to accept any more data.
//!
//! Storage is a `SliceDeque<u8>`, the same double-mapped ring buffer `net::buffer::Buffer`
//! uses for its FIFO byte queue: bytes are written at the tail and consumed from the head, so
//! there is no separate read cursor to track and no memmove-based compaction pass — advancing
//! the head is the compaction.

use slice_deque::SliceDeque;

use crate::net::error::NetError;

#[derive(Debug, Eq, PartialEq)]
pub enum Inspection {
    /// Not enough bytes yet to make a determination; need at least this many more.
    NeedsMore(usize),
    /// A complete, well-formed message of this total size (including header) is present.
    Valid(usize),
    /// The header is malformed; the stream cannot be recovered.
    Corruption,
}

/// Supplies protocol-specific knowledge of where a message header ends and how large the
/// full message is, without owning any buffering itself.
pub trait Inspector {
    /// Number of bytes needed before `inspect` can be called at all.
    fn header_size(&self) -> usize;

    /// Given at least `header_size()` bytes, determines whether they describe a complete
    /// message.
    fn inspect(&self, header: &[u8]) -> Inspection;
}

pub struct Reassembler<I> {
    inspector: I,
    storage: SliceDeque<u8>,
    max_message_size: usize,
    corrupted: bool,
}

impl<I: Inspector> Reassembler<I> {
    pub fn new(inspector: I, max_message_size: usize) -> Reassembler<I> {
        Reassembler {
            inspector,
            storage: SliceDeque::new(),
            max_message_size,
            corrupted: false,
        }
    }

    #[inline]
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// Appends freshly-received bytes to the reassembly buffer.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), NetError> {
        if self.corrupted {
            return Err(NetError::Corruption("reassembler already corrupted"));
        }

        let pending_len = self.storage.len() + data.len();
        if pending_len > self.max_message_size {
            self.corrupted = true;
            return Err(NetError::MessageTooLarge(pending_len));
        }

        let free_capacity = self.storage.capacity() - self.storage.len();
        if free_capacity < data.len() {
            self.storage.reserve(data.len());
        }

        unsafe {
            let tail = self.storage.tail_head_slice();
            tail[..data.len()].copy_from_slice(data);
            self.storage.move_tail(data.len() as isize);
        }

        Ok(())
    }

    /// Pulls the next complete message out of the buffer, if one is available. Returns
    /// `Ok(None)` when more bytes are needed. A single call extracts at most one message;
    /// callers loop until `Ok(None)` to drain everything already buffered.
    pub fn pop(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        if self.corrupted {
            return Err(NetError::Corruption("reassembler already corrupted"));
        }

        let header_size = self.inspector.header_size();
        if self.storage.len() < header_size {
            return Ok(None);
        }

        let inspection = self.inspector.inspect(&self.storage.as_slice()[..header_size]);

        match inspection {
            Inspection::NeedsMore(_) => Ok(None),
            Inspection::Corruption => {
                self.corrupted = true;
                Err(NetError::Corruption("inspector rejected message header"))
            }
            Inspection::Valid(total_size) => {
                if total_size > self.max_message_size {
                    self.corrupted = true;
                    return Err(NetError::MessageTooLarge(total_size));
                }

                if self.storage.len() < total_size {
                    return Ok(None);
                }

                let message = self.storage.as_slice()[..total_size].to_vec();
                unsafe {
                    self.storage.move_head(total_size as isize);
                }
                Ok(Some(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Length-prefixed test protocol: 2-byte big-endian length, followed by that many bytes
    /// of payload, total message size is length + 2.
    struct LengthPrefixed;

    impl Inspector for LengthPrefixed {
        fn header_size(&self) -> usize {
            2
        }

        fn inspect(&self, header: &[u8]) -> Inspection {
            let len = u16::from_be_bytes([header[0], header[1]]) as usize;
            if len == 0xffff {
                Inspection::Corruption
            } else {
                Inspection::Valid(len + 2)
            }
        }
    }

    #[test]
    fn test_partial_header_needs_more() {
        let mut r = Reassembler::new(LengthPrefixed, 1024);
        r.feed(&[0x00]).unwrap();
        assert_eq!(r.pop().unwrap(), None);
    }

    #[test]
    fn test_full_message_round_trip() {
        let mut r = Reassembler::new(LengthPrefixed, 1024);
        r.feed(&[0x00, 0x03, b'a', b'b', b'c']).unwrap();
        assert_eq!(r.pop().unwrap(), Some(vec![0x00, 0x03, b'a', b'b', b'c']));
        assert_eq!(r.pop().unwrap(), None);
    }

    #[test]
    fn test_multiple_messages_fed_as_one_chunk() {
        let mut r = Reassembler::new(LengthPrefixed, 1024);
        r.feed(&[0x00, 0x01, b'x', 0x00, 0x01, b'y']).unwrap();
        assert_eq!(r.pop().unwrap(), Some(vec![0x00, 0x01, b'x']));
        assert_eq!(r.pop().unwrap(), Some(vec![0x00, 0x01, b'y']));
        assert_eq!(r.pop().unwrap(), None);
    }

    #[test]
    fn test_message_split_across_feeds() {
        let mut r = Reassembler::new(LengthPrefixed, 1024);
        r.feed(&[0x00, 0x03, b'a']).unwrap();
        assert_eq!(r.pop().unwrap(), None);
        r.feed(&[b'b', b'c']).unwrap();
        assert_eq!(r.pop().unwrap(), Some(vec![0x00, 0x03, b'a', b'b', b'c']));
    }

    #[test]
    fn test_corruption_is_sticky() {
        let mut r = Reassembler::new(LengthPrefixed, 1024);
        r.feed(&[0xff, 0xff]).unwrap();
        assert!(r.pop().is_err());
        assert!(r.is_corrupted());

        // Any further interaction keeps failing, even with fresh well-formed bytes.
        assert!(r.feed(&[0x00, 0x01, b'z']).is_err());
        assert!(r.pop().is_err());
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let mut r = Reassembler::new(LengthPrefixed, 8);
        r.feed(&[0x00, 0x7f]).unwrap();
        assert!(r.pop().is_err());
        assert!(r.is_corrupted());
    }

    #[test]
    fn test_compaction_does_not_lose_unread_tail() {
        let mut r = Reassembler::new(LengthPrefixed, 1 << 20);
        // Push enough small messages that the head advances well past where a memmove-based
        // design would need to compact, then leave a final, not-yet-complete message
        // trailing in the buffer.
        for _ in 0..5000 {
            r.feed(&[0x00, 0x02, b'h', b'i']).unwrap();
        }
        for _ in 0..5000 {
            assert_eq!(r.pop().unwrap(), Some(vec![0x00, 0x02, b'h', b'i']));
        }
        r.feed(&[0x00, 0x03, b'n']).unwrap();
        assert_eq!(r.pop().unwrap(), None);
        r.feed(&[b'o', b'w']).unwrap();
        assert_eq!(r.pop().unwrap(), Some(vec![0x00, 0x03, b'n', b'o', b'w']));
    }

    #[test]
    fn test_feed_grows_storage_past_initial_capacity() {
        let mut r = Reassembler::new(LengthPrefixed, 1 << 20);
        let payload = vec![b'x'; 9000];
        let mut message = vec![(payload.len() as u16 >> 8) as u8, payload.len() as u8];
        message.extend_from_slice(&payload);

        r.feed(&message[..100]).unwrap();
        assert_eq!(r.pop().unwrap(), None);
        r.feed(&message[100..]).unwrap();
        assert_eq!(r.pop().unwrap(), Some(message));
    }
}
