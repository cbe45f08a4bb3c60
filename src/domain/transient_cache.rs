//! Access-ordered, capacity-bounded cache of transient cores.
//!
//! The cache never closes anything. An insert that overflows capacity hands
//! the least recently used core back to the caller, and the registry queues
//! it for an asynchronous close.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::CoreHandle;

/// What an insert displaced.
#[derive(Debug, Default)]
pub struct InsertOutcome {
    /// Core previously stored under the same name.
    pub displaced: Option<Arc<CoreHandle>>,
    /// Least recently used entry pushed out by the insert.
    pub evicted: Option<(String, Arc<CoreHandle>)>,
}

/// LRU map of transient cores keyed by name.
#[derive(Debug)]
pub struct TransientCache {
    entries: LruCache<String, Arc<CoreHandle>>,
    bounded: bool,
}

impl TransientCache {
    /// Creates a cache holding at most `capacity` cores, or an unbounded
    /// one for `None`.
    #[must_use]
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        match capacity {
            Some(cap) => Self {
                entries: LruCache::new(cap),
                bounded: true,
            },
            None => Self {
                entries: LruCache::unbounded(),
                bounded: false,
            },
        }
    }

    /// Whether a capacity was configured.
    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.bounded
    }

    /// Inserts `core` under `name` as the most recently used entry.
    ///
    /// Replacing an existing name never evicts. Inserting a new name into a
    /// full cache evicts exactly one entry.
    pub fn insert(&mut self, name: String, core: Arc<CoreHandle>) -> InsertOutcome {
        match self.entries.push(name.clone(), core) {
            Some((key, old)) if key == name => InsertOutcome {
                displaced: Some(old),
                evicted: None,
            },
            Some(evicted) => InsertOutcome {
                displaced: None,
                evicted: Some(evicted),
            },
            None => InsertOutcome::default(),
        }
    }

    /// Looks up `name` and marks it most recently used.
    pub fn get(&mut self, name: &str) -> Option<Arc<CoreHandle>> {
        self.entries.get(name).cloned()
    }

    /// Looks up `name` without touching recency.
    #[must_use]
    pub fn peek(&self, name: &str) -> Option<&Arc<CoreHandle>> {
        self.entries.peek(name)
    }

    /// Removes `name`.
    pub fn remove(&mut self, name: &str) -> Option<Arc<CoreHandle>> {
        self.entries.pop(name)
    }

    /// Returns `true` if `name` is cached. Does not touch recency.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }

    /// Names from most to least recently used.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Iterates entries from most to least recently used without touching
    /// recency.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<CoreHandle>)> {
        self.entries.iter()
    }

    /// Number of cached cores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::testing::TestCore;

    fn cache(cap: usize) -> TransientCache {
        TransientCache::new(NonZeroUsize::new(cap))
    }

    #[test]
    fn k_plus_one_inserts_evict_exactly_the_lru_name() {
        let mut cache = cache(3);
        let mut evictions = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let (core, _) = TestCore::handle(name);
            if let Some((evicted, _)) = cache.insert(name.to_string(), core).evicted {
                evictions.push(evicted);
            }
        }
        assert_eq!(evictions, vec!["a".to_string()]);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn get_counts_as_access() {
        let mut cache = cache(2);
        let (a, _) = TestCore::handle("a");
        let (b, _) = TestCore::handle("b");
        let (c, _) = TestCore::handle("c");
        cache.insert("a".to_string(), a);
        cache.insert("b".to_string(), b);
        assert!(cache.get("a").is_some());

        let outcome = cache.insert("c".to_string(), c);
        let Some((evicted, _)) = outcome.evicted else {
            panic!("expected an eviction");
        };
        assert_eq!(evicted, "b");
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn peek_does_not_count_as_access() {
        let mut cache = cache(2);
        let (a, _) = TestCore::handle("a");
        let (b, _) = TestCore::handle("b");
        let (c, _) = TestCore::handle("c");
        cache.insert("a".to_string(), a);
        cache.insert("b".to_string(), b);
        assert!(cache.peek("a").is_some());

        let Some((evicted, _)) = cache.insert("c".to_string(), c).evicted else {
            panic!("expected an eviction");
        };
        assert_eq!(evicted, "a");
    }

    #[test]
    fn replacing_a_name_displaces_without_evicting() {
        let mut cache = cache(1);
        let (first, _) = TestCore::handle("a");
        let (second, _) = TestCore::handle("a");
        let first_id = first.id();
        cache.insert("a".to_string(), first);

        let outcome = cache.insert("a".to_string(), second);
        assert!(outcome.evicted.is_none());
        let Some(displaced) = outcome.displaced else {
            panic!("expected the old core back");
        };
        assert_eq!(displaced.id(), first_id);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unbounded_never_evicts() {
        let mut cache = TransientCache::new(None);
        assert!(!cache.is_bounded());
        for i in 0..100 {
            let name = format!("c{i}");
            let (core, _) = TestCore::handle(&name);
            assert!(cache.insert(name, core).evicted.is_none());
        }
        assert_eq!(cache.len(), 100);
    }

    #[test]
    fn names_are_most_recent_first() {
        let mut cache = cache(3);
        for name in ["a", "b", "c"] {
            let (core, _) = TestCore::handle(name);
            cache.insert(name.to_string(), core);
        }
        let _ = cache.get("a");
        assert_eq!(cache.names(), vec!["a", "c", "b"]);
    }
}
