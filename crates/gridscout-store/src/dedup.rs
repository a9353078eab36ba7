//! Seen-identifier index.

use crate::state::ProgressState;
use gridscout_core::CanonicalId;
use std::collections::HashSet;

/// In-memory set of identifiers already accepted by a job.
///
/// The index is a cache of the seen-set held in [`ProgressState`]; it is
/// rebuilt from that state before a crawl begins and never persisted on its
/// own.
#[derive(Debug, Clone, Default)]
pub struct DeduplicationIndex {
    seen: HashSet<CanonicalId>,
}

impl DeduplicationIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index holding every identifier the state has seen.
    #[must_use]
    pub fn from_state(state: &ProgressState) -> Self {
        let mut index = Self::new();
        index.restore(state.seen_ids.iter().cloned());
        index
    }

    /// Whether `id` has been registered.
    #[must_use]
    pub fn seen(&self, id: &CanonicalId) -> bool {
        self.seen.contains(id)
    }

    /// Register `id`, returning `true` only the first time it is seen.
    pub fn register(&mut self, id: &CanonicalId) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.clone())
    }

    /// Bulk-load identifiers, equivalent to registering each in turn.
    pub fn restore<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = CanonicalId>,
    {
        self.seen.extend(ids);
    }

    /// Number of distinct identifiers registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> CanonicalId {
        CanonicalId::new(s).expect("valid id")
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut index = DeduplicationIndex::new();
        assert!(index.register(&id("a")));
        assert!(!index.register(&id("a")));
        assert!(!index.register(&id("a")));
        assert_eq!(index.len(), 1);
        assert!(index.seen(&id("a")));
        assert!(!index.seen(&id("b")));
    }

    #[test]
    fn test_restore_matches_replay() {
        let ids = vec![id("x"), id("y"), id("x"), id("z")];

        let mut replayed = DeduplicationIndex::new();
        for i in &ids {
            replayed.register(i);
        }

        let mut restored = DeduplicationIndex::new();
        restored.restore(ids);

        assert_eq!(restored.len(), replayed.len());
        assert!(!restored.register(&id("y")));
        assert!(restored.register(&id("w")));
    }

    #[test]
    fn test_empty_index() {
        let index = DeduplicationIndex::default();
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }
}
