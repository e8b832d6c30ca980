//! TTL-bounded dedup filter.
//!
//! Bounded, size-limited map keyed by [`FilterKey`] with time-to-live
//! eviction. The dispatcher consumes this as the "TTL cache" black box
//! described by its own design: `create`, `remove`, `range`, `size`, and
//! `flush_limit`, each parameterized by a caller-supplied timestamp rather
//! than the wall clock, so that tests can move time forward without
//! sleeping.
//!
//! Grounded on the same `Mutex<LruCache<..>>` shape as the bytecode cache
//! elsewhere in this workspace, extended with per-entry insertion instants
//! and lazy TTL expiry. Unlike that cache, a [`TtlFilter`] is always driven
//! from inside the dispatcher's own mutex, so it carries no lock of its
//! own — see the dispatcher's single-mutex discipline.

use std::collections::hash_map::RandomState;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

/// A size-bounded, TTL-evicting map from `K` to an insertion timestamp.
///
/// `K` plays the role of the filter key; the filter stores no value beyond
/// presence, matching the dispatcher's own use (the "value" of an entry is
/// simply "this id has been seen").
pub struct TtlFilter<K: Eq + Hash + Clone> {
    entries: LruCache<K, Instant, RandomState>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone> TtlFilter<K> {
    /// Builds a filter bounded to `capacity` live entries (clamped to at
    /// least 1, so `capacity == 0` degrades rather than panics — the same
    /// convention the bytecode cache elsewhere in this workspace uses) with
    /// the given time-to-live.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        TtlFilter {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    fn is_live(&self, ts: Instant, inserted: Instant) -> bool {
        ts.saturating_duration_since(inserted) < self.ttl
    }

    /// Inserts `key` if absent (or present-but-expired). Returns `true` if
    /// the key is now freshly admitted, `false` if it was already present
    /// and unexpired.
    pub fn create(&mut self, ts: Instant, key: K) -> bool {
        if let Some(inserted) = self.entries.peek(&key) {
            if self.is_live(ts, *inserted) {
                return false;
            }
        }
        self.entries.put(key, ts);
        true
    }

    /// Removes `key` if present and unexpired. Returns `true` on removal.
    /// An expired entry is evicted as a side effect but still reports
    /// `false`, matching "removes if present and unexpired; returns false
    /// otherwise".
    pub fn remove(&mut self, ts: Instant, key: &K) -> bool {
        match self.entries.peek(key) {
            Some(inserted) if self.is_live(ts, *inserted) => {
                self.entries.pop(key);
                true
            }
            Some(_) => {
                self.entries.pop(key);
                false
            }
            None => false,
        }
    }

    /// Visits live (unexpired) entries in recency order; `fn` returning
    /// `false` halts iteration early.
    pub fn range<F>(&self, ts: Instant, mut f: F)
    where
        F: FnMut(&K) -> bool,
    {
        for (key, inserted) in self.entries.iter() {
            if !self.is_live(ts, *inserted) {
                continue;
            }
            if !f(key) {
                return;
            }
        }
    }

    /// Count of live (unexpired) entries, computed lazily.
    pub fn size(&self, ts: Instant) -> usize {
        self.entries
            .iter()
            .filter(|(_, inserted)| self.is_live(ts, **inserted))
            .count()
    }

    /// Evicts down to at most `n` entries, preferring to drop already-expired
    /// entries (in no particular order) before falling back to LRU order
    /// among the remaining live ones.
    pub fn flush_limit(&mut self, ts: Instant, n: usize) {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, inserted)| !self.is_live(ts, **inserted))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if self.entries.len() <= n {
                break;
            }
            self.entries.pop(&key);
        }
        while self.entries.len() > n {
            if self.entries.pop_lru().is_none() {
                break;
            }
        }
    }
}
