//! Page Cache
//!
//! Fixed-capacity LRU cache of raw page bytes.
//!
//! Entries are independent immutable copies (`Bytes`), never the live page:
//! writers must `invalidate` a page id after changing that page.
//!
//! Readers that fill the cache from a file read take `epoch()` before the
//! read and insert with `put_if_unchanged`; an invalidation in between
//! bumps the epoch and the possibly stale copy is not cached.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::RwLock;

use crate::page::PageId;

/// LRU cache keyed by page id
///
/// ## Concurrency:
/// - Lookups peek under a shared read lock (many concurrent readers)
/// - Promotion on hit takes the write lock briefly
/// - Inserts, evictions and invalidations take the write lock
pub struct PageCache {
    entries: RwLock<LruCache<PageId, Bytes>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Bumped by every invalidation, under the write lock
    epoch: AtomicU64,
}

impl PageCache {
    /// Create a cache holding at most `capacity` pages (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(cap)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    /// Get a cached page copy, promoting it to most-recently-used
    pub fn get(&self, id: PageId) -> Option<Bytes> {
        let hit = self.entries.read().peek(&id).cloned();
        match hit {
            Some(bytes) => {
                self.entries.write().promote(&id);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(bytes)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache a copy of `data` for `id`
    ///
    /// Updates and promotes an existing entry, otherwise inserts and evicts
    /// the least-recently-used entry when full.
    pub fn put(&self, id: PageId, data: &[u8]) {
        self.entries.write().put(id, Bytes::copy_from_slice(data));
    }

    /// Current invalidation epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Cache `data` for `id` unless anything was invalidated since `epoch`
    ///
    /// Returns true if the copy was cached.
    pub fn put_if_unchanged(&self, id: PageId, data: &[u8], epoch: u64) -> bool {
        let mut entries = self.entries.write();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        entries.put(id, Bytes::copy_from_slice(data));
        true
    }

    /// Drop the cached copy of `id`, if any
    pub fn invalidate(&self, id: PageId) {
        let mut entries = self.entries.write();
        entries.pop(&id);
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop every cached page
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// True if `id` is cached (does not promote)
    pub fn contains(&self, id: PageId) -> bool {
        self.entries.read().contains(&id)
    }

    /// Number of cached pages
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached pages
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
