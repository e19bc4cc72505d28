//! Reference-counted byte block allocator, grounded on `blockAllocator.cpp`'s counting and
//! leak-detection semantics: every live block keeps the allocator's live counters elevated,
//! `shrink` produces a non-copying window onto the same allocation, and
//! dropping the allocator while blocks are still outstanding is a programmer error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct AllocatorStats {
    pub live_blocks: usize,
    pub live_bytes: usize,
    pub peak_blocks: usize,
    pub peak_bytes: usize,
}

struct Inner {
    live_blocks: AtomicUsize,
    live_bytes: AtomicUsize,
    peak_blocks: AtomicUsize,
    peak_bytes: AtomicUsize,
}

impl Inner {
    fn bump_peak(counter: &AtomicUsize, value: usize) {
        let mut observed = counter.load(Ordering::Relaxed);
        while value > observed {
            match counter.compare_exchange_weak(observed, value, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(current) => observed = current,
            }
        }
    }
}

/// Tracks a single allocation's lifetime independently of how many `Block` windows currently
/// point into it. The allocator's live counters are decremented exactly once, when the last
/// window referencing the allocation is dropped.
struct Tracking {
    inner: Arc<Inner>,
    bytes: usize,
}

impl Drop for Tracking {
    fn drop(&mut self) {
        self.inner.live_blocks.fetch_sub(1, Ordering::Relaxed);
        self.inner.live_bytes.fetch_sub(self.bytes, Ordering::Relaxed);
    }
}

/// A reference-counted, possibly-shrunk view onto a byte allocation.
#[derive(Clone)]
pub struct Block {
    buffer: Arc<Vec<u8>>,
    offset: usize,
    len: usize,
    tracking: Arc<Tracking>,
}

impl Block {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.len]
    }

    /// Produces a new window onto the same allocation, advanced by `head_offset` bytes and
    /// optionally truncated to `new_size`. Never copies the underlying bytes.
    pub fn shrink(&self, head_offset: usize, new_size: Option<usize>) -> Block {
        assert!(head_offset <= self.len, "shrink offset past end of block");

        let remaining = self.len - head_offset;
        let len = match new_size {
            Some(size) => size.min(remaining),
            None => remaining,
        };

        Block {
            buffer: self.buffer.clone(),
            offset: self.offset + head_offset,
            len,
            tracking: self.tracking.clone(),
        }
    }
}

/// Arena-style allocator for wire buffers. Single-owner: tracks outstanding allocation
/// count/bytes plus their high-water marks, and asserts none remain outstanding when the
/// allocator itself is torn down.
pub struct BlockAllocator {
    inner: Arc<Inner>,
}

impl BlockAllocator {
    pub fn new() -> BlockAllocator {
        BlockAllocator {
            inner: Arc::new(Inner {
                live_blocks: AtomicUsize::new(0),
                live_bytes: AtomicUsize::new(0),
                peak_blocks: AtomicUsize::new(0),
                peak_bytes: AtomicUsize::new(0),
            }),
        }
    }

    /// Allocates a new zero-initialized block of the given size.
    pub fn alloc(&self, size: usize) -> Block {
        let live_blocks = self.inner.live_blocks.fetch_add(1, Ordering::Relaxed) + 1;
        let live_bytes = self.inner.live_bytes.fetch_add(size, Ordering::Relaxed) + size;

        Inner::bump_peak(&self.inner.peak_blocks, live_blocks);
        Inner::bump_peak(&self.inner.peak_bytes, live_bytes);

        Block {
            buffer: Arc::new(vec![0u8; size]),
            offset: 0,
            len: size,
            tracking: Arc::new(Tracking {
                inner: self.inner.clone(),
                bytes: size,
            }),
        }
    }

    /// Builds a block from existing bytes, taking ownership without copying.
    pub fn build(&self, bytes: Vec<u8>) -> Block {
        let size = bytes.len();
        let live_blocks = self.inner.live_blocks.fetch_add(1, Ordering::Relaxed) + 1;
        let live_bytes = self.inner.live_bytes.fetch_add(size, Ordering::Relaxed) + size;

        Inner::bump_peak(&self.inner.peak_blocks, live_blocks);
        Inner::bump_peak(&self.inner.peak_bytes, live_bytes);

        Block {
            buffer: Arc::new(bytes),
            offset: 0,
            len: size,
            tracking: Arc::new(Tracking {
                inner: self.inner.clone(),
                bytes: size,
            }),
        }
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            live_blocks: self.inner.live_blocks.load(Ordering::Relaxed),
            live_bytes: self.inner.live_bytes.load(Ordering::Relaxed),
            peak_blocks: self.inner.peak_blocks.load(Ordering::Relaxed),
            peak_bytes: self.inner.peak_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Drop for BlockAllocator {
    fn drop(&mut self) {
        let live = self.inner.live_blocks.load(Ordering::Relaxed);
        assert_eq!(live, 0, "BlockAllocator dropped with {} outstanding blocks", live);
    }
}
