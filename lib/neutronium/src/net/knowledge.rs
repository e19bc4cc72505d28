//! Per-connection string/path dictionary. Grounded on the original
//! `messageKnowledgeSync.cpp`/`messageKnowledgeBase.h`: values are mapped to small integer
//! ids the first time they're seen, and only on that first use is the caller told to push
//! the mapping to the remote peer (`reportNewString`/`reportNewPath`) — every later
//! reference to the same value is just the id, never the bytes again.

use std::collections::HashMap;

pub type MappedId = u32;

/// Dictionary shared between a connection's outgoing serializer and its remote peer.
/// `0` is reserved to mean "no value" the same way a null object id does in the object
/// repository.
#[derive(Default)]
pub struct MessageKnowledgeBase {
    strings: HashMap<String, MappedId>,
    string_texts: Vec<String>,
    // Keyed by (text_id, parent_path_id) so identical leaf names under different parents get
    // distinct ids, the same as splitting "a/b" and "c/b" never collide on "b".
    paths: HashMap<(MappedId, MappedId), MappedId>,
    path_entries: Vec<(MappedId, MappedId)>,
}

impl MessageKnowledgeBase {
    pub fn new() -> MessageKnowledgeBase {
        MessageKnowledgeBase::default()
    }

    /// Maps `text` to an id, allocating a new one if this is the first time it's seen.
    /// Returns `(id, was_new)`.
    pub fn map_string(&mut self, text: &str) -> (MappedId, bool) {
        if let Some(&id) = self.strings.get(text) {
            return (id, false);
        }

        self.string_texts.push(text.to_string());
        let id = self.string_texts.len() as MappedId;
        self.strings.insert(text.to_string(), id);
        (id, true)
    }

    /// Maps one path segment (already tokenized by the caller) onto a path id, chaining off
    /// `parent_id` (`0` for the root segment). Returns `(id, was_new)`.
    pub fn map_path_part(&mut self, text_id: MappedId, parent_id: MappedId) -> (MappedId, bool) {
        let key = (text_id, parent_id);
        if let Some(&id) = self.paths.get(&key) {
            return (id, false);
        }

        self.path_entries.push(key);
        let id = self.path_entries.len() as MappedId;
        self.paths.insert(key, id);
        (id, true)
    }

    pub fn resolve_string(&self, id: MappedId) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.string_texts.get((id - 1) as usize).map(String::as_str)
    }

    /// Walks the parent chain for `id` back to the root, joining segments with `separator`.
    pub fn resolve_path(&self, id: MappedId, separator: &str) -> Option<String> {
        if id == 0 {
            return None;
        }

        let mut segments = Vec::new();
        let mut current = id;
        while current != 0 {
            let &(text_id, parent_id) = self.path_entries.get((current - 1) as usize)?;
            segments.push(self.resolve_string(text_id)?.to_string());
            current = parent_id;
        }

        segments.reverse();
        Some(segments.join(separator))
    }
}

/// Receives notification the first time a string or path is mapped on a given connection, so
/// it can push the definition across the wire before any frame references the new id.
pub trait KnowledgeUpdateSink {
    fn report_new_string(&mut self, id: MappedId, text: &str);
    fn report_new_path(&mut self, id: MappedId, text_id: MappedId, parent_id: MappedId);
}

/// Write-side helper bound to a knowledge base and its update sink. Splits path text into
/// segments on any of `separators` before mapping each one in turn.
pub struct KnowledgeUpdater<'a> {
    base: &'a mut MessageKnowledgeBase,
    sink: &'a mut dyn KnowledgeUpdateSink,
}

impl<'a> KnowledgeUpdater<'a> {
    pub fn new(base: &'a mut MessageKnowledgeBase, sink: &'a mut dyn KnowledgeUpdateSink) -> KnowledgeUpdater<'a> {
        KnowledgeUpdater { base, sink }
    }

    pub fn map_string(&mut self, text: &str) -> MappedId {
        let (id, is_new) = self.base.map_string(text);
        if is_new {
            self.sink.report_new_string(id, text);
        }
        id
    }

    pub fn map_path(&mut self, path: &str, separators: &[char]) -> MappedId {
        let mut parent_id = 0;

        for part in path.split(|c| separators.contains(&c)).filter(|p| !p.is_empty()) {
            let text_id = self.map_string(part);
            let (id, is_new) = self.base.map_path_part(text_id, parent_id);
            if is_new {
                self.sink.report_new_path(id, text_id, parent_id);
            }
            parent_id = id;
        }

        parent_id
    }
}

/// Read-side helper bound to a knowledge base for resolving ids back into values.
pub struct KnowledgeResolver<'a> {
    base: &'a MessageKnowledgeBase,
}

impl<'a> KnowledgeResolver<'a> {
    pub fn new(base: &'a MessageKnowledgeBase) -> KnowledgeResolver<'a> {
        KnowledgeResolver { base }
    }

    pub fn resolve_string(&self, id: MappedId) -> Option<&str> {
        self.base.resolve_string(id)
    }

    pub fn resolve_path(&self, id: MappedId, separator: &str) -> Option<String> {
        self.base.resolve_path(id, separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        new_strings: Vec<(MappedId, String)>,
        new_paths: Vec<(MappedId, MappedId, MappedId)>,
    }

    impl KnowledgeUpdateSink for RecordingSink {
        fn report_new_string(&mut self, id: MappedId, text: &str) {
            self.new_strings.push((id, text.to_string()));
        }

        fn report_new_path(&mut self, id: MappedId, text_id: MappedId, parent_id: MappedId) {
            self.new_paths.push((id, text_id, parent_id));
        }
    }

    #[test]
    fn test_string_mapped_once() {
        let mut base = MessageKnowledgeBase::new();
        let mut sink = RecordingSink::default();
        let mut updater = KnowledgeUpdater::new(&mut base, &mut sink);

        let first = updater.map_string("hello");
        let second = updater.map_string("hello");
        assert_eq!(first, second);
        assert_eq!(sink.new_strings.len(), 1);
    }

    #[test]
    fn test_path_segments_share_leaf_but_differ_by_parent() {
        let mut base = MessageKnowledgeBase::new();
        let mut sink = RecordingSink::default();
        let mut updater = KnowledgeUpdater::new(&mut base, &mut sink);

        let a_b = updater.map_path("a/b", &['/']);
        let c_b = updater.map_path("c/b", &['/']);
        assert_ne!(a_b, c_b);

        let resolver = KnowledgeResolver::new(&base);
        assert_eq!(resolver.resolve_path(a_b, "/").as_deref(), Some("a/b"));
        assert_eq!(resolver.resolve_path(c_b, "/").as_deref(), Some("c/b"));
    }

    #[test]
    fn test_repeated_path_does_not_resend() {
        let mut base = MessageKnowledgeBase::new();
        let mut sink = RecordingSink::default();
        let mut updater = KnowledgeUpdater::new(&mut base, &mut sink);

        updater.map_path("a/b/c", &['/']);
        let before = sink.new_paths.len();
        updater.map_path("a/b/c", &['/']);
        assert_eq!(sink.new_paths.len(), before);
    }
}
