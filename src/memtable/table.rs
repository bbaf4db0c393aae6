//! MemTable implementation
//!
//! BTreeMap-based memtable behind a single mutex.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::{key_size, DEFAULT_SIZE_LIMIT};

/// In-memory table for recent writes
pub struct MemTable {
    /// Sorted entries + running size, updated together
    inner: Mutex<Inner>,

    /// Byte budget for new keys
    size_limit: usize,
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<String, Vec<u8>>,
    size: usize,
}

impl MemTable {
    /// Create an empty MemTable with the given byte budget
    pub fn new(size_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            size_limit,
        }
    }

    /// Insert or update an entry
    ///
    /// Returns false, leaving the table untouched, when `key` is new and the
    /// entry would push the size past the budget. Updates to an existing key
    /// are always accepted in place.
    pub fn try_insert(&self, key: &str, value: Vec<u8>) -> bool {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.data.get_mut(key) {
            let old_len = existing.len();
            let new_len = value.len();
            *existing = value;
            inner.size = inner.size - old_len + new_len;
            return true;
        }

        let entry_size = key_size(key) + value.len();
        if inner.size + entry_size > self.size_limit {
            return false;
        }

        inner.data.insert(key.to_string(), value);
        inner.size += entry_size;
        true
    }

    /// Get a copy of the value stored for `key`
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().data.get(key).cloned()
    }

    /// True if `key` is buffered
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().data.contains_key(key)
    }

    /// Check if the size threshold has been reached
    pub fn should_flush(&self) -> bool {
        self.inner.lock().size >= self.size_limit
    }

    /// Empty the table, returning every entry in ascending key order
    pub fn drain(&self) -> Vec<(String, Vec<u8>)> {
        let mut inner = self.inner.lock();
        inner.size = 0;
        std::mem::take(&mut inner.data).into_iter().collect()
    }

    /// Copy every entry in ascending key order without draining
    pub fn entries(&self) -> Vec<(String, Vec<u8>)> {
        self.inner
            .lock()
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Get current accounted size in bytes
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// True if no entries are buffered
    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    /// Byte budget for new keys
    pub fn size_limit(&self) -> usize {
        self.size_limit
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE_LIMIT)
    }
}
