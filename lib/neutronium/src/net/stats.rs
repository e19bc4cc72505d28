//! Per-connection traffic counters, surfaced through `Connection::stats()`. Kept as plain
//! atomics behind a cheap `Clone` handle so both the I/O thread and the application can read
//! or bump them without a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub fragments_sent: u64,
    pub fragments_received: u64,
}

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    fragments_sent: AtomicU64,
    fragments_received: AtomicU64,
}

#[derive(Clone, Default)]
pub struct StatsHandle {
    inner: Arc<Counters>,
}

impl StatsHandle {
    pub fn new() -> StatsHandle {
        StatsHandle::default()
    }

    #[inline]
    pub fn record_send(&self, bytes: usize) {
        self.inner.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.inner.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_receive(&self, bytes: usize) {
        self.inner.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.inner.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fragment_sent(&self) {
        self.inner.fragments_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fragment_received(&self) {
        self.inner.fragments_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            bytes_sent: self.inner.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.inner.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.inner.messages_sent.load(Ordering::Relaxed),
            messages_received: self.inner.messages_received.load(Ordering::Relaxed),
            fragments_sent: self.inner.fragments_sent.load(Ordering::Relaxed),
            fragments_received: self.inner.fragments_received.load(Ordering::Relaxed),
        }
    }
}
