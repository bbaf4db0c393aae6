//! Index Module
//!
//! Primary and secondary indexes over a table's records.
//!
//! ## Responsibilities
//! - Primary hash index: record key → page id, for O(1) point lookups
//! - Secondary B-tree indexes: column value → record keys, for exact,
//!   range and sorted queries
//! - Persistence of every index next to the table file
//!
//! ## Key Typing
//! Secondary indexes are typed by a closed set of key types. `KeyType` is the
//! runtime tag, `IndexValue` the tagged value, and `IndexKey` links each tag
//! to its concrete Rust key so `SecondaryIndex` can match on the tag instead
//! of inspecting types at runtime.

mod btree;
mod hash;
mod manager;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Bound;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FolioError, Result};
use crate::record::integral_i64;
use crate::storage::FileManager;

pub use btree::{BTreeIndex, BTreeNodeData, BTreeStats, IndexMetadata};
pub use hash::HashIndex;
pub use manager::{
    ColumnIndexStats, IndexDefinition, IndexManager, IndexStats, LoadOutcome, PRIMARY_INDEX_FILE,
};

// =============================================================================
// Key Types
// =============================================================================

/// Runtime tag of a secondary index's key type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    Int,
    Float,
    Text,
    Bool,
}

impl KeyType {
    /// Pull an index value of this type out of a JSON field
    ///
    /// Returns None for null, missing or unconvertible values; such records
    /// are simply not indexed on this column.
    pub fn extract(self, value: &Value) -> Option<IndexValue> {
        match (self, value) {
            (KeyType::Int, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(integral_i64))
                .map(IndexValue::Int),
            (KeyType::Int, Value::String(s)) => s.trim().parse().ok().map(IndexValue::Int),
            (KeyType::Float, Value::Number(n)) => {
                n.as_f64().map(|f| IndexValue::Float(FloatKey(f)))
            }
            (KeyType::Float, Value::String(s)) => {
                s.trim().parse().ok().map(|f| IndexValue::Float(FloatKey(f)))
            }
            (KeyType::Text, Value::String(s)) => Some(IndexValue::Text(s.clone())),
            (KeyType::Text, Value::Number(n)) => Some(IndexValue::Text(n.to_string())),
            (KeyType::Bool, Value::Bool(b)) => Some(IndexValue::Bool(*b)),
            (KeyType::Bool, Value::String(s)) => match s.as_str() {
                "true" => Some(IndexValue::Bool(true)),
                "false" => Some(IndexValue::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Parse a textual bound (CLI input) as a value of this type
    pub fn parse(self, text: &str) -> Result<IndexValue> {
        let value = match self {
            KeyType::Text => Value::String(text.to_string()),
            _ => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        };
        self.extract(&value).ok_or_else(|| {
            FolioError::InvalidValue(format!("'{}' is not a valid {} value", text, self))
        })
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::Int => "Int",
            KeyType::Float => "Float",
            KeyType::Text => "Text",
            KeyType::Bool => "Bool",
        };
        f.write_str(name)
    }
}

/// Totally ordered f64 key (IEEE total order)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FloatKey(pub f64);

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloatKey {}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for FloatKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<f64> for FloatKey {
    fn from(value: f64) -> Self {
        FloatKey(value)
    }
}

/// A key value tagged with its type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexValue {
    Int(i64),
    Float(FloatKey),
    Text(String),
    Bool(bool),
}

impl IndexValue {
    pub fn key_type(&self) -> KeyType {
        match self {
            IndexValue::Int(_) => KeyType::Int,
            IndexValue::Float(_) => KeyType::Float,
            IndexValue::Text(_) => KeyType::Text,
            IndexValue::Bool(_) => KeyType::Bool,
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Int(i) => write!(f, "{}", i),
            IndexValue::Float(x) => write!(f, "{}", x.0),
            IndexValue::Text(s) => write!(f, "{}", s),
            IndexValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Rust key types a secondary B-tree can be specialized for
pub trait IndexKey:
    Ord + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KEY_TYPE: KeyType;

    fn into_value(self) -> IndexValue;

    fn from_value(value: IndexValue) -> Option<Self>;
}

impl IndexKey for i64 {
    const KEY_TYPE: KeyType = KeyType::Int;

    fn into_value(self) -> IndexValue {
        IndexValue::Int(self)
    }

    fn from_value(value: IndexValue) -> Option<Self> {
        match value {
            IndexValue::Int(i) => Some(i),
            _ => None,
        }
    }
}

impl IndexKey for FloatKey {
    const KEY_TYPE: KeyType = KeyType::Float;

    fn into_value(self) -> IndexValue {
        IndexValue::Float(self)
    }

    fn from_value(value: IndexValue) -> Option<Self> {
        match value {
            IndexValue::Float(f) => Some(f),
            _ => None,
        }
    }
}

impl IndexKey for String {
    const KEY_TYPE: KeyType = KeyType::Text;

    fn into_value(self) -> IndexValue {
        IndexValue::Text(self)
    }

    fn from_value(value: IndexValue) -> Option<Self> {
        match value {
            IndexValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl IndexKey for bool {
    const KEY_TYPE: KeyType = KeyType::Bool;

    fn into_value(self) -> IndexValue {
        IndexValue::Bool(self)
    }

    fn from_value(value: IndexValue) -> Option<Self> {
        match value {
            IndexValue::Bool(b) => Some(b),
            _ => None,
        }
    }
}

// =============================================================================
// Secondary Index
// =============================================================================

/// A B-tree specialized for one key type
pub enum TypedTree {
    Int(BTreeIndex<i64>),
    Float(BTreeIndex<FloatKey>),
    Text(BTreeIndex<String>),
    Bool(BTreeIndex<bool>),
}

macro_rules! with_tree {
    ($typed:expr, $tree:ident => $body:expr) => {
        match $typed {
            TypedTree::Int($tree) => $body,
            TypedTree::Float($tree) => $body,
            TypedTree::Text($tree) => $body,
            TypedTree::Bool($tree) => $body,
        }
    };
}

/// Named, typed secondary index over one column
pub struct SecondaryIndex {
    column: String,
    tree: TypedTree,
}

impl SecondaryIndex {
    /// Create an empty index of `key_type`
    pub fn new(column: impl Into<String>, key_type: KeyType, order: usize) -> Self {
        let tree = match key_type {
            KeyType::Int => TypedTree::Int(BTreeIndex::new(order)),
            KeyType::Float => TypedTree::Float(BTreeIndex::new(order)),
            KeyType::Text => TypedTree::Text(BTreeIndex::new(order)),
            KeyType::Bool => TypedTree::Bool(BTreeIndex::new(order)),
        };
        Self {
            column: column.into(),
            tree,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn key_type(&self) -> KeyType {
        match self.tree {
            TypedTree::Int(_) => KeyType::Int,
            TypedTree::Float(_) => KeyType::Float,
            TypedTree::Text(_) => KeyType::Text,
            TypedTree::Bool(_) => KeyType::Bool,
        }
    }

    /// Borrow the concrete tree
    pub fn tree(&self) -> &TypedTree {
        &self.tree
    }

    /// Add `record_id` under `key`
    pub fn insert(&self, key: IndexValue, record_id: &str) -> Result<()> {
        with_tree!(&self.tree, tree => {
            tree.insert(self.typed(key)?, record_id);
        });
        Ok(())
    }

    /// Remove one record id from `key`; true if it was present
    pub fn remove_id(&self, key: IndexValue, record_id: &str) -> Result<bool> {
        with_tree!(&self.tree, tree => Ok(tree.remove_id(&self.typed(key)?, record_id)))
    }

    /// Remove `key` and every id stored under it
    pub fn remove(&self, key: IndexValue) -> Result<bool> {
        with_tree!(&self.tree, tree => Ok(tree.remove(&self.typed(key)?)))
    }

    /// Ids stored under exactly `key`
    pub fn find(&self, key: IndexValue) -> Result<Vec<String>> {
        with_tree!(&self.tree, tree => Ok(tree.find(&self.typed(key)?)))
    }

    /// (key, ids) pairs within the bounds, in ascending key order
    pub fn entries(
        &self,
        lower: Bound<IndexValue>,
        upper: Bound<IndexValue>,
    ) -> Result<Vec<(IndexValue, Vec<String>)>> {
        with_tree!(&self.tree, tree => {
            let lower = self.typed_bound(lower)?;
            let upper = self.typed_bound(upper)?;
            Ok(tree
                .entries_in(lower.as_ref(), upper.as_ref())
                .into_iter()
                .map(|(k, ids)| (k.into_value(), ids))
                .collect())
        })
    }

    pub fn clear(&self) {
        with_tree!(&self.tree, tree => tree.clear())
    }

    pub fn stats(&self) -> BTreeStats {
        with_tree!(&self.tree, tree => tree.stats())
    }

    /// Persist the tree into `file`
    pub fn save_to_file(&self, file: &FileManager, metadata: &mut IndexMetadata) -> Result<()> {
        with_tree!(&self.tree, tree => tree.save_to_file(file, metadata))
    }

    /// Replace the tree's contents with those persisted in `file`
    pub fn load_from_file(&self, file: &FileManager) -> Result<IndexMetadata> {
        with_tree!(&self.tree, tree => tree.load_from_file(file))
    }

    fn typed<K: IndexKey>(&self, value: IndexValue) -> Result<K> {
        let requested = value.key_type();
        K::from_value(value).ok_or_else(|| FolioError::IndexTypeMismatch {
            column: self.column.clone(),
            expected: requested,
            actual: K::KEY_TYPE,
        })
    }

    fn typed_bound<K: IndexKey>(&self, bound: Bound<IndexValue>) -> Result<Bound<K>> {
        Ok(match bound {
            Bound::Included(v) => Bound::Included(self.typed(v)?),
            Bound::Excluded(v) => Bound::Excluded(self.typed(v)?),
            Bound::Unbounded => Bound::Unbounded,
        })
    }
}
