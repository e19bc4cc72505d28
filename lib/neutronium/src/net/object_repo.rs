//! Thread-safe bidirectional id ↔ object registry, grounded on the original
//! `messageObjectRepository.h`/`.cpp`: id `0` always means "no object", id `1` is reserved
//! for the connection's own peer object, and new ids come from a bit-pool allocator so freed
//! slots get reused instead of growing forever. Objects are held weakly — if the owning side
//! drops an object, the id silently starts resolving to nothing rather than keeping it alive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

pub type MappedId = u32;

/// Reserved id meaning "no object".
pub const NULL_ID: MappedId = 0;
/// Reserved id for the connection's own peer/host object.
pub const HOST_ID: MappedId = 1;

const BITS_PER_WORD: u32 = 64;

/// Simple growable bitset allocator handing out the lowest free id.
struct BitPool {
    words: Vec<u64>,
}

impl BitPool {
    fn new() -> BitPool {
        // Ids 0 and 1 are reserved and never handed out by the allocator.
        BitPool { words: vec![0b11] }
    }

    fn alloc(&mut self) -> MappedId {
        for (word_index, word) in self.words.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones();
                *word |= 1 << bit;
                return word_index as MappedId * BITS_PER_WORD + bit;
            }
        }

        self.words.push(1);
        (self.words.len() as MappedId - 1) * BITS_PER_WORD
    }

    fn free(&mut self, id: MappedId) {
        if id <= HOST_ID {
            return;
        }
        let word_index = (id / BITS_PER_WORD) as usize;
        let bit = id % BITS_PER_WORD;
        if let Some(word) = self.words.get_mut(word_index) {
            *word &= !(1 << bit);
        }
    }
}

struct Inner<T> {
    objects: HashMap<MappedId, Weak<T>>,
    reverse: HashMap<usize, MappedId>,
    allocator: BitPool,
}

fn ptr_key<T>(obj: &Arc<T>) -> usize {
    Arc::as_ptr(obj) as usize
}

/// Registry mapping small integer ids to objects, so messages can reference objects by id
/// instead of embedding a full serialized copy.
pub struct MessageObjectRepository<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> MessageObjectRepository<T> {
    pub fn new() -> MessageObjectRepository<T> {
        MessageObjectRepository {
            inner: Mutex::new(Inner {
                objects: HashMap::new(),
                reverse: HashMap::new(),
                allocator: BitPool::new(),
            }),
        }
    }

    /// Allocates an unused id without attaching anything to it yet.
    pub fn allocate_object_id(&self) -> MappedId {
        self.inner.lock().expect("object repository mutex poisoned").allocator.alloc()
    }

    /// Attaches `object` under `id`. The caller decides the id — ids the peer is not
    /// authorized to assign itself (like `HOST_ID`) are simply never passed through
    /// `allocate_object_id`.
    pub fn attach_object(&self, id: MappedId, object: Arc<T>) {
        let mut inner = self.inner.lock().expect("object repository mutex poisoned");
        let key = ptr_key(&object);
        inner.reverse.insert(key, id);
        inner.objects.insert(id, Arc::downgrade(&object));
    }

    /// Allocates a fresh id and attaches `object` to it under a single lock acquisition.
    pub fn attach_new_object(&self, object: Arc<T>) -> MappedId {
        let mut inner = self.inner.lock().expect("object repository mutex poisoned");
        let id = inner.allocator.alloc();
        let key = ptr_key(&object);
        inner.reverse.insert(key, id);
        inner.objects.insert(id, Arc::downgrade(&object));
        id
    }

    /// Detaches `id`. When `free_id` is set the id is returned to the allocator for reuse.
    pub fn detach_object(&self, id: MappedId, free_id: bool) {
        let mut inner = self.inner.lock().expect("object repository mutex poisoned");
        if let Some(weak) = inner.objects.remove(&id) {
            if let Some(strong) = weak.upgrade() {
                inner.reverse.remove(&ptr_key(&strong));
            }
        }
        if free_id {
            inner.allocator.free(id);
        }
    }

    pub fn resolve_object(&self, id: MappedId) -> Option<Arc<T>> {
        if id == NULL_ID {
            return None;
        }
        let inner = self.inner.lock().expect("object repository mutex poisoned");
        inner.objects.get(&id).and_then(Weak::upgrade)
    }

    /// Finds the id for `object`, defensively re-validating the reverse-map entry still
    /// points at a live object with the same identity — a dropped object's address can be
    /// reused by a later allocation, which would otherwise return a stale id for the wrong
    /// object.
    pub fn find_object_id(&self, object: &Arc<T>) -> Option<MappedId> {
        let mut inner = self.inner.lock().expect("object repository mutex poisoned");
        let key = ptr_key(object);

        let id = *inner.reverse.get(&key)?;

        match inner.objects.get(&id).and_then(Weak::upgrade) {
            Some(candidate) if Arc::ptr_eq(&candidate, object) => Some(id),
            _ => {
                // Stale: the reverse entry outlived the object it pointed at.
                inner.reverse.remove(&key);
                None
            }
        }
    }
}

impl<T> Default for MessageObjectRepository<T> {
    fn default() -> Self {
        MessageObjectRepository::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_and_resolve() {
        let repo: MessageObjectRepository<String> = MessageObjectRepository::new();
        let obj = Arc::new("hello".to_string());
        let id = repo.attach_new_object(obj.clone());

        assert!(id > HOST_ID);
        assert_eq!(repo.resolve_object(id).as_deref(), Some(&"hello".to_string()));
        assert_eq!(repo.find_object_id(&obj), Some(id));
    }

    #[test]
    fn test_weak_reference_expires_with_object() {
        let repo: MessageObjectRepository<String> = MessageObjectRepository::new();
        let id = {
            let obj = Arc::new("temp".to_string());
            repo.attach_new_object(obj)
        };

        assert_eq!(repo.resolve_object(id), None);
    }

    #[test]
    fn test_ids_are_reused_after_detach() {
        let repo: MessageObjectRepository<String> = MessageObjectRepository::new();
        let a = Arc::new("a".to_string());
        let id_a = repo.attach_new_object(a);
        repo.detach_object(id_a, true);

        let b = Arc::new("b".to_string());
        let id_b = repo.attach_new_object(b);
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn test_stale_reverse_entry_is_rejected() {
        let repo: MessageObjectRepository<String> = MessageObjectRepository::new();
        let obj = Arc::new("x".to_string());
        let id = repo.attach_new_object(obj.clone());
        repo.detach_object(id, true);

        // A fresh, unrelated object that happens to not be registered at all must never
        // resolve to the old id.
        let other = Arc::new("y".to_string());
        assert_eq!(repo.find_object_id(&other), None);
        assert_eq!(repo.find_object_id(&obj), None);
    }

    #[test]
    fn test_null_id_never_resolves() {
        let repo: MessageObjectRepository<String> = MessageObjectRepository::new();
        assert_eq!(repo.resolve_object(NULL_ID), None);
    }
}
