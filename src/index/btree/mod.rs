//! B-tree Index
//!
//! Ordered multi-map from a typed column value to the keys of the records
//! holding it.
//!
//! ## Responsibilities
//! - Exact, range, greater/less-than and full sorted lookups
//! - Duplicate values share one key slot holding several record ids
//! - Balanced deletion (borrow from siblings, merge, shrink root)
//! - Persistence to a page-addressed index file
//!
//! ## Concurrency
//! One mutex per tree. Reads and writes both take it.

mod persist;
mod tree;

use std::ops::Bound;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::index::IndexKey;
use crate::storage::FileManager;

pub use persist::{BTreeNodeData, IndexMetadata};

use tree::BTree;

/// Smallest order a tree accepts
pub const MIN_ORDER: usize = 4;

/// Shape and size of a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BTreeStats {
    /// Distinct keys
    pub key_count: usize,
    /// Record ids across all keys
    pub record_id_count: usize,
    pub node_count: usize,
    /// Levels from root to leaf (0 when empty)
    pub height: usize,
    /// Effective order, after `BTreeIndex::new` rounds odd or small requests
    pub order: usize,
}

/// Thread-safe B-tree over keys of type `K`
pub struct BTreeIndex<K> {
    inner: Mutex<BTree<K>>,
}

impl<K: IndexKey> BTreeIndex<K> {
    /// Create an empty tree
    ///
    /// Odd orders are rounded up and small ones raised to `MIN_ORDER`, so
    /// split halves and merged nodes always stay within bounds.
    pub fn new(order: usize) -> Self {
        let order = order.max(MIN_ORDER);
        let order = order + order % 2;
        Self {
            inner: Mutex::new(BTree::new(order)),
        }
    }

    /// Effective order: the requested order raised to `MIN_ORDER` and
    /// rounded up to even (`new(5)` gives 6)
    pub fn order(&self) -> usize {
        self.inner.lock().order()
    }

    /// Add `record_id` under `key`
    ///
    /// An existing key gains the id (at most once); no second slot is made.
    pub fn insert(&self, key: K, record_id: impl Into<String>) {
        self.inner.lock().insert(key, record_id.into());
    }

    /// Record ids stored under exactly `key`
    pub fn find(&self, key: &K) -> Vec<String> {
        self.inner
            .lock()
            .find(key)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Ids for keys in `[min, max]`
    pub fn find_range(&self, min: &K, max: &K) -> Vec<String> {
        self.ids_in(Bound::Included(min), Bound::Included(max))
    }

    /// Ids for keys strictly above `min`
    pub fn find_greater_than(&self, min: &K) -> Vec<String> {
        self.ids_in(Bound::Excluded(min), Bound::Unbounded)
    }

    /// Ids for keys strictly below `max`
    pub fn find_less_than(&self, max: &K) -> Vec<String> {
        self.ids_in(Bound::Unbounded, Bound::Excluded(max))
    }

    /// Every id in ascending key order
    pub fn get_all_sorted(&self) -> Vec<String> {
        self.ids_in(Bound::Unbounded, Bound::Unbounded)
    }

    /// Every key in ascending order
    pub fn keys(&self) -> Vec<K> {
        self.entries_in(Bound::Unbounded, Bound::Unbounded)
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    }

    /// (key, ids) pairs within the bounds, ascending
    pub fn entries_in(&self, lower: Bound<&K>, upper: Bound<&K>) -> Vec<(K, Vec<String>)> {
        let mut out = Vec::new();
        self.inner.lock().collect(lower, upper, &mut out);
        out
    }

    fn ids_in(&self, lower: Bound<&K>, upper: Bound<&K>) -> Vec<String> {
        self.entries_in(lower, upper)
            .into_iter()
            .flat_map(|(_, ids)| ids)
            .collect()
    }

    /// Remove `key` and all of its ids; true if it was present
    pub fn remove(&self, key: &K) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Remove one id from `key`; the key goes once no ids remain
    pub fn remove_id(&self, key: &K, record_id: &str) -> bool {
        self.inner.lock().remove_id(key, record_id)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.inner.lock().key_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BTreeStats {
        let tree = self.inner.lock();
        BTreeStats {
            key_count: tree.key_count(),
            record_id_count: tree.record_id_count(),
            node_count: tree.node_count(),
            height: tree.height(),
            order: tree.order(),
        }
    }

    /// Check every structural invariant of the tree
    pub fn validate(&self) -> Result<()> {
        self.inner.lock().validate()
    }

    /// Persist the tree into `file`, filling in the shape fields of `metadata`
    pub fn save_to_file(&self, file: &FileManager, metadata: &mut IndexMetadata) -> Result<()> {
        let tree = self.inner.lock();
        persist::save(&tree, file, metadata)?;
        debug!(
            column = %metadata.column_name,
            keys = metadata.key_count,
            nodes = metadata.node_count,
            "saved b-tree index"
        );
        Ok(())
    }

    /// Replace the tree with the one persisted in `file`
    ///
    /// On error the current contents are left untouched.
    pub fn load_from_file(&self, file: &FileManager) -> Result<IndexMetadata> {
        let (loaded, metadata) = persist::load::<K>(file)?;
        *self.inner.lock() = loaded;
        debug!(
            column = %metadata.column_name,
            keys = metadata.key_count,
            "loaded b-tree index"
        );
        Ok(metadata)
    }
}

impl<K: IndexKey> Default for BTreeIndex<K> {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BTREE_ORDER)
    }
}
