//! Index Manager
//!
//! Owns a table's primary hash index and its named secondary B-trees.
//!
//! ## Responsibilities
//! - Fan out per-record indexing and removal to every index
//! - Rebuild everything from data pages
//! - Save and load the index directory (`primary.hash` + `<column>.idx`)
//! - Report stale or unreadable persisted state instead of failing

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{BTreeStats, HashIndex, IndexMetadata, IndexValue, KeyType, SecondaryIndex};
use crate::error::{FolioError, Result};
use crate::page::{PageId, PagePool};
use crate::record::{RecordLayout, RecordPage};
use crate::storage::FileManager;

/// File name of the persisted primary index
pub const PRIMARY_INDEX_FILE: &str = "primary.hash";

/// Extension of persisted secondary indexes
pub const SECONDARY_INDEX_EXTENSION: &str = "idx";

/// A secondary index as recorded in table metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub column: String,
    pub key_type: KeyType,
}

/// Result of loading persisted indexes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Every index loaded and matches the table
    Loaded,
    /// Something was missing, unreadable or stale; the caller must rebuild
    NeedsRebuild { reason: String },
}

/// Statistics for one secondary index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnIndexStats {
    pub column: String,
    pub key_type: KeyType,
    pub tree: BTreeStats,
}

/// Statistics across all indexes of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Keys in the primary hash index
    pub primary_entries: usize,
    /// One entry per secondary index, by column name
    pub secondary: Vec<ColumnIndexStats>,
}

/// Index set of one table
///
/// ## Concurrency:
/// - `primary`: internally sharded
/// - `secondary`: RwLock over the name map; each tree has its own mutex
pub struct IndexManager {
    /// `<table>.indexes` directory
    dir: PathBuf,
    order: usize,
    pool: Arc<PagePool>,
    sync_on_flush: bool,
    primary: HashIndex,
    secondary: RwLock<BTreeMap<String, SecondaryIndex>>,
}

impl IndexManager {
    pub fn new(dir: impl Into<PathBuf>, order: usize, pool: Arc<PagePool>) -> Self {
        Self {
            dir: dir.into(),
            order,
            pool,
            sync_on_flush: true,
            primary: HashIndex::new(),
            secondary: RwLock::new(BTreeMap::new()),
        }
    }

    /// Enable or disable fsync when index files are saved
    pub fn with_sync_on_flush(mut self, sync: bool) -> Self {
        self.sync_on_flush = sync;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn primary(&self) -> &HashIndex {
        &self.primary
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an empty secondary index
    ///
    /// Returns false if an index of the same type already exists.
    pub fn create_index(&self, column: &str, key_type: KeyType) -> Result<bool> {
        let mut secondary = self.secondary.write();
        if let Some(existing) = secondary.get(column) {
            if existing.key_type() == key_type {
                return Ok(false);
            }
            return Err(FolioError::IndexTypeMismatch {
                column: column.to_string(),
                expected: key_type,
                actual: existing.key_type(),
            });
        }
        secondary.insert(
            column.to_string(),
            SecondaryIndex::new(column, key_type, self.order),
        );
        Ok(true)
    }

    pub fn has_index(&self, column: &str) -> bool {
        self.secondary.read().contains_key(column)
    }

    pub fn key_type(&self, column: &str) -> Option<KeyType> {
        self.secondary.read().get(column).map(SecondaryIndex::key_type)
    }

    /// Registered indexes, ordered by column
    pub fn definitions(&self) -> Vec<IndexDefinition> {
        self.secondary
            .read()
            .values()
            .map(|index| IndexDefinition {
                column: index.column().to_string(),
                key_type: index.key_type(),
            })
            .collect()
    }

    /// Run `f` against the index on `column`
    pub fn with_index<R>(
        &self,
        column: &str,
        f: impl FnOnce(&SecondaryIndex) -> Result<R>,
    ) -> Result<R> {
        let secondary = self.secondary.read();
        let index = secondary.get(column).ok_or_else(|| FolioError::IndexNotFound {
            column: column.to_string(),
        })?;
        f(index)
    }

    // =========================================================================
    // Per-record maintenance
    // =========================================================================

    /// Index a record stored on `page_id`
    ///
    /// The primary index is always updated. Each secondary index receives
    /// the record's value for its column, converted to the index's key type;
    /// absent or unconvertible values are skipped.
    pub fn index_record(&self, key: &str, page_id: PageId, value: &Value) -> Result<()> {
        self.primary.put(key, page_id);
        self.index_secondary(key, value)
    }

    /// Add a record to the secondary indexes only
    pub fn index_secondary(&self, key: &str, value: &Value) -> Result<()> {
        let secondary = self.secondary.read();
        for index in secondary.values() {
            if let Some(indexed) = column_value(index, value) {
                index.insert(indexed, key)?;
            }
        }
        Ok(())
    }

    /// Drop a record from every index
    ///
    /// `value` is the record's last stored value; without it only the
    /// primary entry can be removed.
    pub fn remove_record(&self, key: &str, value: Option<&Value>) -> Result<()> {
        self.primary.remove(key);
        if let Some(value) = value {
            self.remove_secondary(key, value)?;
        }
        Ok(())
    }

    /// Drop a record's entries from the secondary indexes only
    pub fn remove_secondary(&self, key: &str, value: &Value) -> Result<()> {
        let secondary = self.secondary.read();
        for index in secondary.values() {
            if let Some(indexed) = column_value(index, value) {
                index.remove_id(indexed, key)?;
            }
        }
        Ok(())
    }

    /// Clear every index and repopulate from the data pages of `file`
    ///
    /// Records whose body cannot be decoded keep their primary entry but are
    /// left out of secondary indexes.
    pub fn rebuild_all(&self, file: &FileManager, page_count: u64, layout: &RecordLayout) -> Result<()> {
        self.primary.clear();
        let secondary = self.secondary.read();
        for index in secondary.values() {
            index.clear();
        }

        let mut indexed = 0usize;
        for page_id in 1..page_count {
            let page = file.read_page(page_id)?;
            let records = match RecordPage::from_bytes(page.data(), layout.page_layout()) {
                Ok(records) => records,
                Err(e) => {
                    warn!(page_id, error = %e, "skipping undecodable page during index rebuild");
                    continue;
                }
            };

            for record in records.records() {
                self.primary.put(record.key.clone(), page_id);
                if secondary.is_empty() {
                    continue;
                }
                let value = match layout.decode_json(&record.key, &record.body) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(key = %record.key, error = %e, "skipping undecodable record during index rebuild");
                        continue;
                    }
                };
                for index in secondary.values() {
                    if let Some(v) = column_value(index, &value) {
                        index.insert(v, &record.key)?;
                    }
                }
                indexed += 1;
            }
        }

        info!(
            dir = %self.dir.display(),
            primary = self.primary.len(),
            secondary = secondary.len(),
            records = indexed,
            "rebuilt indexes"
        );
        Ok(())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Save every index, stamped with the table's flush sequence
    pub fn save_indexes(&self, table_sequence: u64) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.primary
            .save(&self.dir.join(PRIMARY_INDEX_FILE), table_sequence)?;

        let secondary = self.secondary.read();
        for index in secondary.values() {
            let path = self.secondary_path(index.column());
            let file = FileManager::open_or_create(&path, Arc::clone(&self.pool))?
                .with_sync_on_flush(self.sync_on_flush);
            let mut metadata = IndexMetadata::read_from(&file)
                .ok()
                .filter(|m| m.column_name == index.column())
                .unwrap_or_else(|| IndexMetadata::new(index.column(), index.key_type(), self.order));
            metadata.table_sequence = table_sequence;
            index.save_to_file(&file, &mut metadata)?;
        }

        debug!(
            dir = %self.dir.display(),
            secondary = secondary.len(),
            sequence = table_sequence,
            "saved indexes"
        );
        Ok(())
    }

    /// Register `definitions` and load their persisted state
    ///
    /// Never fails on unreadable index files: those are reported through
    /// `LoadOutcome::NeedsRebuild` so the caller can rebuild from data.
    pub fn load_indexes(
        &self,
        definitions: &[IndexDefinition],
        table_sequence: u64,
    ) -> Result<LoadOutcome> {
        for definition in definitions {
            self.create_index(&definition.column, definition.key_type)?;
        }

        let mut problems = Vec::new();

        match self.primary.load(&self.dir.join(PRIMARY_INDEX_FILE)) {
            Ok(seq) if seq == table_sequence => {}
            Ok(seq) => problems.push(format!(
                "primary index saved at sequence {}, table is at {}",
                seq, table_sequence
            )),
            Err(e) => problems.push(format!("primary index: {}", e)),
        }

        let secondary = self.secondary.read();
        for index in secondary.values() {
            match self.load_secondary(index) {
                Ok(seq) if seq == table_sequence => {}
                Ok(seq) => problems.push(format!(
                    "index '{}' saved at sequence {}, table is at {}",
                    index.column(),
                    seq,
                    table_sequence
                )),
                Err(e) => problems.push(format!("index '{}': {}", index.column(), e)),
            }
        }

        if problems.is_empty() {
            debug!(dir = %self.dir.display(), secondary = secondary.len(), "loaded indexes");
            return Ok(LoadOutcome::Loaded);
        }

        let reason = problems.join("; ");
        warn!(dir = %self.dir.display(), %reason, "persisted indexes unusable");
        Ok(LoadOutcome::NeedsRebuild { reason })
    }

    fn load_secondary(&self, index: &SecondaryIndex) -> Result<u64> {
        let path = self.secondary_path(index.column());
        let file = FileManager::open(&path, Arc::clone(&self.pool))?;
        let metadata = index.load_from_file(&file)?;
        if metadata.column_name != index.column() {
            index.clear();
            return Err(FolioError::Corruption(format!(
                "{} belongs to column '{}'",
                path.display(),
                metadata.column_name
            )));
        }
        Ok(metadata.table_sequence)
    }

    fn secondary_path(&self, column: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", column, SECONDARY_INDEX_EXTENSION))
    }

    /// Forget every entry, keeping registrations
    pub fn clear_all(&self) -> Result<()> {
        self.primary.clear();
        for index in self.secondary.read().values() {
            index.clear();
        }
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        let secondary = self
            .secondary
            .read()
            .values()
            .map(|index| ColumnIndexStats {
                column: index.column().to_string(),
                key_type: index.key_type(),
                tree: index.stats(),
            })
            .collect();
        IndexStats {
            primary_entries: self.primary.len(),
            secondary,
        }
    }
}

/// Value of `index`'s column in `record`, as the index's key type
fn column_value(index: &SecondaryIndex, record: &Value) -> Option<IndexValue> {
    record
        .get(index.column())
        .and_then(|v| index.key_type().extract(v))
}
