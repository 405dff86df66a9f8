//! Identity caches for proxies.
//!
//! Wrapping the same host object twice must give back the same proxy, so
//! that per-object state kept on a proxy survives between events and proxies
//! can be compared by identity.

use std::collections::HashMap;
use std::hash::Hash;

/// A map from a stable host identity to the single proxy representing it.
///
/// Entries are created lazily and only removed by [`prune`](Self::prune),
/// which drops entries whose host object has gone away.
#[derive(Debug, Clone)]
pub struct IdentityCache<K, P> {
    entries: HashMap<K, P>,
}

impl<K, P> Default for IdentityCache<K, P> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy, P: Clone> IdentityCache<K, P> {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The proxy already known for `key`, if any.
    #[must_use]
    pub fn get_known(&self, key: &K) -> Option<P> {
        self.entries.get(key).cloned()
    }

    /// Return the proxy for `key`, creating and remembering it on a miss.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> P) -> P {
        self.entries.entry(key).or_insert_with(make).clone()
    }

    /// Remember `proxy` as the representative for `key`, replacing any
    /// previous entry.
    pub fn insert(&mut self, key: K, proxy: P) {
        self.entries.insert(key, proxy);
    }

    /// Drop every entry for which `is_valid` is false. Returns the number of
    /// entries removed.
    pub fn prune(&mut self, mut is_valid: impl FnMut(&P) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, proxy| is_valid(proxy));
        before - self.entries.len()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
