//! Transport-agnostic connection abstraction and the spinlock-protected inbound queue that
//! backs it. Both the UDP endpoint and the TCP channel hand their decoded messages to an
//! `InboundQueue`; the application only ever sees the `Connection` trait and drains it by
//! polling — it never blocks waiting on the network.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::net::error::NetError;
use crate::net::stats::ConnectionStats;

/// A minimal test-and-test-and-set spinlock. Inbound queues are drained on every poll tick
/// and pushed to on every socket readable event, so contention windows are microseconds —
/// short enough that parking a thread costs more than spinning.
struct SpinLock<T> {
    locked: AtomicBool,
    data: std::cell::UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}

struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    fn new(data: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: std::cell::UnsafeCell::new(data),
        }
    }

    fn lock(&self) -> SpinGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
        SpinGuard { lock: self }
    }
}

impl<'a, T> std::ops::Deref for SpinGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> std::ops::DerefMut for SpinGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// FIFO of fully decoded inbound payloads, pushed from the I/O thread(s) and drained from
/// the application's poll loop. Cheaply `Clone`able — all clones share the same queue.
#[derive(Clone)]
pub struct InboundQueue {
    inner: Arc<SpinLock<VecDeque<Vec<u8>>>>,
}

impl InboundQueue {
    pub fn new() -> InboundQueue {
        InboundQueue {
            inner: Arc::new(SpinLock::new(VecDeque::new())),
        }
    }

    #[inline]
    pub fn push(&self, message: Vec<u8>) {
        self.inner.lock().push_back(message);
    }

    #[inline]
    pub fn pop(&self) -> Option<Vec<u8>> {
        self.inner.lock().pop_front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Common surface both the UDP endpoint's per-peer connection and the TCP per-socket
/// channel expose to application code.
pub trait Connection {
    fn id(&self) -> u64;
    fn local_addr(&self) -> SocketAddr;
    fn remote_addr(&self) -> SocketAddr;
    fn is_connected(&self) -> bool;
    fn stats(&self) -> ConnectionStats;

    /// Queues `payload` for transmission. Never blocks; returns `NetError::Wait` if the
    /// outbound side is momentarily saturated.
    fn send(&self, payload: &[u8]) -> Result<(), NetError>;

    /// Pops the oldest received, fully reassembled message, if any.
    fn pull_next_message(&self) -> Option<Vec<u8>>;

    /// Initiates a graceful close. Idempotent.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_inbound_queue_fifo_order() {
        let queue = InboundQueue::new();
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.push(vec![3]);

        assert_eq!(queue.pop(), Some(vec![1]));
        assert_eq!(queue.pop(), Some(vec![2]));
        assert_eq!(queue.pop(), Some(vec![3]));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_inbound_queue_shared_across_threads() {
        let queue = InboundQueue::new();
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            for i in 0..1000u8 {
                producer.push(vec![i]);
            }
        });

        handle.join().unwrap();

        let mut count = 0;
        while queue.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 1000);
    }
}
