//! Table Module
//!
//! The public façade over one table file and its indexes.
//!
//! ## Responsibilities
//! - Buffer inserts in the MemTable, flushing into pages when it fills
//! - Point lookups: MemTable → primary index → full page scan (repairs index)
//! - Full scans and secondary-index queries that include buffered rows
//! - Create, open, reshape and close tables, keeping indexes consistent
//!
//! ## Read Path
//! ```text
//! find(key)
//!   │
//!   ├─▶ MemTable ──────────────── hit ─▶ decode
//!   │
//!   ├─▶ primary index ─▶ page (PageCache / FileManager) ─▶ decode
//!   │
//!   └─▶ scan pages 1..N ─▶ repair primary index ─▶ decode
//! ```
//!
//! ## Locking
//! `flush_lock` serializes flushes, page scans and index maintenance. The
//! layout lock is only held around MemTable access and is always taken
//! after `flush_lock`.

mod metadata;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::ops::{Bound, RangeBounds};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FolioError, Result};
use crate::index::{IndexKey, IndexManager, IndexStats, IndexValue, KeyType, LoadOutcome};
use crate::memtable::MemTable;
use crate::page::{Page, PageId, PagePool, METADATA_PAGE_ID};
use crate::record::{PageLayout, RecordLayout, RecordPage, StoredRecord, PAGE_RECORD_CAPACITY};
use crate::schema::{parse_schema, ColumnDefinition};
use crate::storage::{FileManager, PageCache};

pub use metadata::{TableMetadata, TableStats};

/// A stored table
///
/// ## Concurrency:
/// All methods take `&self` and may be called from many threads.
/// - `memtable`, `cache`, primary index: internally synchronized
/// - `flush_lock`: one flush / scan / index rebuild at a time
/// - `metadata`: only mutated while `flush_lock` is held
pub struct Table {
    name: String,
    config: Config,
    file: FileManager,
    memtable: MemTable,
    indexes: IndexManager,
    cache: PageCache,
    metadata: RwLock<TableMetadata>,
    layout: RwLock<RecordLayout>,
    flush_lock: Mutex<()>,
    /// A flush failed after it may have written some pages; indexes are
    /// rebuilt from the data pages before the next flush
    flush_failed: AtomicBool,
    /// No checkpoint on drop: set until the table is fully open, and again
    /// once `close` has checkpointed
    closed: bool,
}

impl Table {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a new table, optionally typed by a schema definition
    ///
    /// Fails with `TableExists` if the table file is already present.
    pub fn create(name: &str, config: Config, schema: Option<&str>) -> Result<Self> {
        config.validate()?;
        check_name(name)?;
        fs::create_dir_all(&config.data_dir)?;

        let path = config.table_path(name);
        if path.exists() {
            return Err(FolioError::TableExists(name.to_string()));
        }

        let columns = match schema {
            Some(text) => parse_schema(text)?,
            None => Vec::new(),
        };

        // Index files left behind by a deleted table must not be picked up
        let index_dir = config.index_dir(name);
        if index_dir.exists() {
            fs::remove_dir_all(&index_dir)?;
        }

        let pool = PagePool::new(config.page_pool_capacity);
        let file = FileManager::create(&path, Arc::clone(&pool))?
            .with_sync_on_flush(config.sync_on_flush);
        let metadata = TableMetadata::new(name, columns);
        metadata.write_to(&file)?;
        file.flush()?;

        let mut table = Self::assemble(name, config, file, pool, metadata);
        table.indexes.save_indexes(0)?;
        table.closed = false;

        info!(table = name, columns = table.metadata.read().columns.len(), "created table");
        Ok(table)
    }

    /// Open an existing table
    ///
    /// Persisted indexes that are missing, unreadable or older than the
    /// last flush are rebuilt from the data pages and saved again.
    pub fn open(name: &str, config: Config) -> Result<Self> {
        config.validate()?;
        check_name(name)?;

        let path = config.table_path(name);
        if !path.exists() {
            return Err(FolioError::TableNotFound(name.to_string()));
        }

        let pool = PagePool::new(config.page_pool_capacity);
        let file = FileManager::open(&path, Arc::clone(&pool))?
            .with_sync_on_flush(config.sync_on_flush);
        let metadata = TableMetadata::read_from(&file)?;
        if metadata.name != name {
            return Err(FolioError::Corruption(format!(
                "table file {} belongs to table '{}'",
                path.display(),
                metadata.name
            )));
        }

        let definitions = metadata.indexes.clone();
        let sequence = metadata.flush_sequence;
        let page_count = metadata.page_count;
        let mut table = Self::assemble(name, config, file, pool, metadata);

        match table.indexes.load_indexes(&definitions, sequence)? {
            LoadOutcome::Loaded => {}
            LoadOutcome::NeedsRebuild { reason } => {
                info!(table = name, %reason, "rebuilding indexes");
                let layout = table.layout.read().clone();
                table.indexes.rebuild_all(&table.file, page_count, &layout)?;
                table.indexes.save_indexes(sequence)?;
            }
        }

        info!(
            table = name,
            records = table.metadata.read().record_count,
            pages = page_count,
            "opened table"
        );
        table.closed = false;
        Ok(table)
    }

    /// Open the table if it exists, otherwise create it
    pub fn open_or_create(name: &str, config: Config, schema: Option<&str>) -> Result<Self> {
        if config.table_path(name).exists() {
            Self::open(name, config)
        } else {
            Self::create(name, config, schema)
        }
    }

    fn assemble(
        name: &str,
        config: Config,
        file: FileManager,
        pool: Arc<PagePool>,
        metadata: TableMetadata,
    ) -> Self {
        let indexes = IndexManager::new(config.index_dir(name), config.btree_order, pool)
            .with_sync_on_flush(config.sync_on_flush);
        Self {
            name: name.to_string(),
            memtable: MemTable::new(config.memtable_size_limit),
            cache: PageCache::new(config.page_cache_capacity),
            layout: RwLock::new(RecordLayout::for_columns(&metadata.columns)),
            metadata: RwLock::new(metadata),
            indexes,
            file,
            config,
            flush_lock: Mutex::new(()),
            flush_failed: AtomicBool::new(false),
            closed: true,
        }
    }

    /// Flush buffered records, save every index and sync the file
    ///
    /// The only durability checkpoint for indexes; data pages are also
    /// durable after each `flush_memtable`.
    pub fn close(mut self) -> Result<()> {
        self.checkpoint()?;
        self.closed = true;
        info!(table = %self.name, "closed table");
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        self.flush_memtable()?;
        let _flush = self.flush_lock.lock();
        let sequence = self.metadata.read().flush_sequence;
        self.indexes.save_indexes(sequence)?;
        self.file.flush()?;
        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace the record for `key`
    ///
    /// For schema tables `value` must be a JSON object; it is stored by
    /// column position. Generic tables store `value` as given.
    pub fn insert(&self, key: &str, value: &str) -> Result<()> {
        if !self.buffer(key, value)? {
            self.flush_memtable()?;
            if !self.buffer(key, value)? {
                return Err(FolioError::RecordTooLarge {
                    key: key.to_string(),
                    size: value.len(),
                    limit: self.memtable.size_limit(),
                });
            }
        }

        if self.memtable.should_flush() {
            self.flush_memtable()?;
        }
        Ok(())
    }

    /// Encode and buffer a record; false if the MemTable is full
    fn buffer(&self, key: &str, value: &str) -> Result<bool> {
        let layout = self.layout.read();
        let record = StoredRecord::new(key, layout.encode(key, value)?);
        if !RecordPage::new(layout.page_layout()).fits(&record) {
            return Err(FolioError::RecordTooLarge {
                key: key.to_string(),
                size: record.encoded_size(),
                limit: PAGE_RECORD_CAPACITY,
            });
        }
        Ok(self.memtable.try_insert(key, record.body))
    }

    /// Move every buffered record into data pages
    ///
    /// Each record replaces its previous version in place when it still
    /// fits there; otherwise it goes to the first page with room, or a new
    /// page. Returns the number of records written.
    pub fn flush_memtable(&self) -> Result<usize> {
        let _flush = self.flush_lock.lock();
        let layout = self.layout.read().clone();
        self.flush_locked(&layout)
    }

    /// Flush with `flush_lock` already held by the caller
    fn flush_locked(&self, layout: &RecordLayout) -> Result<usize> {
        let entries = self.memtable.drain();
        if entries.is_empty() {
            return Ok(0);
        }

        match self.write_entries(&entries, layout) {
            Ok(()) => Ok(entries.len()),
            Err(e) => {
                // Keep the records readable and retryable
                for (key, body) in entries {
                    if !self.memtable.contains_key(&key) {
                        self.memtable.try_insert(&key, body);
                    }
                }
                Err(e)
            }
        }
    }

    /// Place `entries` into data pages, write them, then update indexes
    ///
    /// Metadata and indexes change only once the pages are durable. On a
    /// failed write the staged pages are discarded and the next flush
    /// rebuilds the indexes, since part of the batch may be on disk.
    fn write_entries(&self, entries: &[(String, Vec<u8>)], layout: &RecordLayout) -> Result<()> {
        let mut metadata = self.metadata.write();
        if self.flush_failed.load(Ordering::Acquire) {
            self.indexes
                .rebuild_all(&self.file, metadata.page_count, layout)?;
            metadata.record_count = self.indexes.primary().len() as u64;
            self.flush_failed.store(false, Ordering::Release);
            info!(table = %self.name, records = metadata.record_count, "recovered indexes after failed flush");
        }

        let mut batch = FlushBatch::new(self, layout.page_layout(), metadata.page_count);
        let mut placed = Vec::with_capacity(entries.len());
        let mut added = 0u64;

        for (key, body) in entries {
            let record = StoredRecord::new(key.as_str(), body.clone());
            let replaced = match self.indexes.primary().get(key) {
                Some(page_id) => batch.replace(page_id, record.clone(), layout)?,
                None => None,
            };
            let (page_id, previous) = match replaced {
                Some(found) => found,
                None => {
                    added += 1;
                    (batch.place(record)?, None)
                }
            };
            placed.push((key.as_str(), body.as_slice(), page_id, previous));
        }

        let mut next = metadata.clone();
        next.page_count = batch.page_count;
        next.record_count += added;
        next.flush_sequence += 1;
        next.touch();

        if let Err(e) = self.write_batch(&batch, &next) {
            self.file.discard_pending();
            self.cache.clear();
            self.flush_failed.store(true, Ordering::Release);
            return Err(e);
        }
        *metadata = next;

        for (key, body, page_id, previous) in placed {
            let indexed = match previous {
                Some(old_value) => self.indexes.remove_secondary(key, &old_value),
                None => Ok(()),
            }
            .and_then(|()| {
                let value = decode_or_null(layout, key, body);
                self.indexes.index_record(key, page_id, &value)
            });
            if let Err(e) = indexed {
                self.flush_failed.store(true, Ordering::Release);
                return Err(e);
            }
        }

        debug!(
            table = %self.name,
            records = entries.len(),
            new_records = added,
            pages = batch.dirty.len(),
            sequence = metadata.flush_sequence,
            "flushed memtable"
        );
        Ok(())
    }

    /// Write the batch's data pages, then the metadata page
    fn write_batch(&self, batch: &FlushBatch<'_>, metadata: &TableMetadata) -> Result<()> {
        for page_id in &batch.dirty {
            if let Some(records) = batch.pages.get(page_id) {
                let mut page = Page::pooled(*page_id, self.file.pool());
                records.write_to(&mut page)?;
                self.file.write_page_owned(page)?;
                self.cache.invalidate(*page_id);
            }
        }
        self.file.flush()?;

        metadata.write_to(&self.file)?;
        self.file.flush()?;
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look up the value stored for `key`
    pub fn find(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.find_buffered(key)? {
            return Ok(Some(value));
        }

        let layout = self.layout.read().clone();
        if let Some(value) = self.find_indexed(key, &layout) {
            return Ok(Some(value));
        }

        let _flush = self.flush_lock.lock();
        // A flush may have finished while we waited
        if let Some(value) = self.find_buffered(key)? {
            return Ok(Some(value));
        }
        let layout = self.layout.read().clone();
        self.scan_for(key, &layout)
    }

    fn find_buffered(&self, key: &str) -> Result<Option<String>> {
        let layout = self.layout.read();
        match self.memtable.get(key) {
            Some(body) => layout.decode(key, &body).map(Some),
            None => Ok(None),
        }
    }

    /// Look up through the primary index; None on any miss
    fn find_indexed(&self, key: &str, layout: &RecordLayout) -> Option<String> {
        let page_id = self.indexes.primary().get(key)?;
        let page = match self.read_record_page(page_id, layout.page_layout()) {
            Ok(page) => page,
            Err(e) => {
                warn!(table = %self.name, page_id, error = %e, "indexed page unreadable");
                return None;
            }
        };
        let record = page.get(key)?;
        match layout.decode(key, &record.body) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(table = %self.name, key, error = %e, "undecodable record");
                None
            }
        }
    }

    /// Scan every data page for `key`, repairing the primary index on a hit
    ///
    /// Caller holds `flush_lock`.
    fn scan_for(&self, key: &str, layout: &RecordLayout) -> Result<Option<String>> {
        let page_count = self.metadata.read().page_count;
        for page_id in 1..page_count {
            let page = match self.read_record_page(page_id, layout.page_layout()) {
                Ok(page) => page,
                Err(e) => {
                    warn!(table = %self.name, page_id, error = %e, "skipping unreadable page");
                    continue;
                }
            };
            if let Some(record) = page.get(key) {
                self.indexes.primary().put(key, page_id);
                debug!(table = %self.name, key, page_id, "repaired primary index entry");
                return layout.decode(key, &record.body).map(Some);
            }
        }
        Ok(None)
    }

    /// Every record, buffered and flushed, ordered by key
    ///
    /// Records that fail to decode are skipped.
    pub fn select_all(&self) -> Result<Vec<(String, String)>> {
        let _flush = self.flush_lock.lock();
        let layout = self.layout.read().clone();

        let mut rows = BTreeMap::new();
        for (key, body) in self.memtable.entries() {
            match layout.decode(&key, &body) {
                Ok(value) => {
                    rows.insert(key, value);
                }
                Err(e) => warn!(table = %self.name, %key, error = %e, "skipping undecodable record"),
            }
        }

        let page_count = self.metadata.read().page_count;
        for page_id in 1..page_count {
            let page = match self.read_record_page(page_id, layout.page_layout()) {
                Ok(page) => page,
                Err(e) => {
                    warn!(table = %self.name, page_id, error = %e, "skipping unreadable page");
                    continue;
                }
            };
            for record in page.records() {
                if rows.contains_key(&record.key) {
                    continue;
                }
                match layout.decode(&record.key, &record.body) {
                    Ok(value) => {
                        rows.insert(record.key.clone(), value);
                    }
                    Err(e) => {
                        warn!(table = %self.name, key = %record.key, error = %e, "skipping undecodable record")
                    }
                }
            }
        }

        Ok(rows.into_iter().collect())
    }

    /// Read a data page through the cache
    fn read_record_page(&self, page_id: PageId, layout: PageLayout) -> Result<RecordPage> {
        if let Some(bytes) = self.cache.get(page_id) {
            return RecordPage::from_bytes(&bytes, layout);
        }
        let epoch = self.cache.epoch();
        let page = self.file.read_page(page_id)?;
        self.cache.put_if_unchanged(page_id, page.data(), epoch);
        RecordPage::from_bytes(page.data(), layout)
    }

    // =========================================================================
    // Secondary Indexes
    // =========================================================================

    /// Create a secondary index on `column` keyed by `K`
    pub fn create_index<K: IndexKey>(&self, column: &str) -> Result<()> {
        self.create_index_of_type(column, K::KEY_TYPE)
    }

    /// Create a secondary index on `column` keyed by `key_type`
    ///
    /// Creating an index that already exists is a no-op. Existing records
    /// are indexed immediately and every index is saved.
    pub fn create_index_of_type(&self, column: &str, key_type: KeyType) -> Result<()> {
        let _flush = self.flush_lock.lock();
        let layout = self.layout.read().clone();
        check_indexable(layout.columns(), column, key_type)?;

        if !self.indexes.create_index(column, key_type)? {
            debug!(table = %self.name, column, "index already exists");
            return Ok(());
        }

        let mut metadata = self.metadata.write();
        if metadata.page_count > 1 {
            self.indexes
                .rebuild_all(&self.file, metadata.page_count, &layout)?;
        }
        metadata.indexes = self.indexes.definitions();
        metadata.touch();
        metadata.write_to(&self.file)?;
        self.file.flush()?;
        self.indexes.save_indexes(metadata.flush_sequence)?;

        info!(table = %self.name, column, %key_type, "created index");
        Ok(())
    }

    /// Records whose `column` value lies in `[min, max]`, ascending by value
    pub fn find_by_range<K: IndexKey>(
        &self,
        column: &str,
        min: K,
        max: K,
    ) -> Result<Vec<(String, String)>> {
        self.query_index(
            column,
            Bound::Included(min.into_value()),
            Bound::Included(max.into_value()),
        )
    }

    /// Records whose `column` value is strictly greater than `min`
    pub fn find_greater_than<K: IndexKey>(&self, column: &str, min: K) -> Result<Vec<(String, String)>> {
        self.query_index(column, Bound::Excluded(min.into_value()), Bound::Unbounded)
    }

    /// Records whose `column` value is strictly less than `max`
    pub fn find_less_than<K: IndexKey>(&self, column: &str, max: K) -> Result<Vec<(String, String)>> {
        self.query_index(column, Bound::Unbounded, Bound::Excluded(max.into_value()))
    }

    /// Every record with a value for `column`, ascending by that value
    pub fn select_all_sorted(&self, column: &str) -> Result<Vec<(String, String)>> {
        self.query_index(column, Bound::Unbounded, Bound::Unbounded)
    }

    /// Records whose indexed `column` value lies within the bounds
    ///
    /// Buffered records take part and supersede their flushed versions.
    /// Records sharing a value keep index order, flushed before buffered.
    pub fn query_index(
        &self,
        column: &str,
        lower: Bound<IndexValue>,
        upper: Bound<IndexValue>,
    ) -> Result<Vec<(String, String)>> {
        let _flush = self.flush_lock.lock();
        let layout = self.layout.read().clone();
        let key_type = self
            .indexes
            .key_type(column)
            .ok_or_else(|| FolioError::IndexNotFound {
                column: column.to_string(),
            })?;

        let buffered = self.memtable.entries();
        let buffered_keys: HashSet<&str> = buffered.iter().map(|(k, _)| k.as_str()).collect();

        let mut hits: Vec<(IndexValue, String, Option<String>)> = Vec::new();
        let entries = self
            .indexes
            .with_index(column, |index| index.entries(lower.clone(), upper.clone()))?;
        for (value, ids) in entries {
            for id in ids {
                if !buffered_keys.contains(id.as_str()) {
                    hits.push((value.clone(), id, None));
                }
            }
        }

        let bounds = (lower, upper);
        for (key, body) in &buffered {
            let json = match layout.decode_json(key, body) {
                Ok(json) => json,
                Err(e) => {
                    warn!(table = %self.name, %key, error = %e, "skipping undecodable record");
                    continue;
                }
            };
            let Some(value) = json.get(column).and_then(|v| key_type.extract(v)) else {
                continue;
            };
            if bounds.contains(&value) {
                let text = layout.decode(key, body)?;
                hits.push((value, key.clone(), Some(text)));
            }
        }

        hits.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rows = Vec::with_capacity(hits.len());
        for (_, key, text) in hits {
            let text = match text {
                Some(text) => Some(text),
                None => match self.find_indexed(&key, &layout) {
                    Some(text) => Some(text),
                    None => self.scan_for(&key, &layout)?,
                },
            };
            match text {
                Some(text) => rows.push((key, text)),
                None => warn!(table = %self.name, %key, column, "index entry has no record"),
            }
        }
        Ok(rows)
    }

    /// Primary and per-column index statistics
    pub fn get_index_stats(&self) -> IndexStats {
        self.indexes.stats()
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Replace the table's schema and re-encode every stored record
    ///
    /// An empty definition turns the table into a generic key/value table.
    /// Fails without changing anything if a record cannot be expressed in
    /// the new schema or an existing index conflicts with it.
    pub fn alter_schema(&self, schema: &str) -> Result<()> {
        let columns = if schema.trim().is_empty() {
            Vec::new()
        } else {
            parse_schema(schema)?
        };
        for definition in self.indexes.definitions() {
            check_indexable(&columns, &definition.column, definition.key_type)?;
        }

        let _flush = self.flush_lock.lock();
        let mut layout = self.layout.write();
        self.flush_locked(&layout)?;

        let new_layout = RecordLayout::for_columns(&columns);
        let page_count = self.metadata.read().page_count;

        // Re-encode everything before touching the file
        let mut pages: Vec<RecordPage> = Vec::new();
        let mut current = RecordPage::new(new_layout.page_layout());
        let mut records = 0u64;
        for page_id in 1..page_count {
            let page = match self.read_record_page(page_id, layout.page_layout()) {
                Ok(page) => page,
                Err(e) => {
                    warn!(table = %self.name, page_id, error = %e, "dropping unreadable page");
                    continue;
                }
            };
            for record in page.records() {
                let value = match layout.decode(&record.key, &record.body) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(table = %self.name, key = %record.key, error = %e, "dropping undecodable record");
                        continue;
                    }
                };
                let stored = StoredRecord::new(record.key.as_str(), new_layout.encode(&record.key, &value)?);
                let size = stored.encoded_size();
                if !current.fits(&stored) {
                    let full = std::mem::replace(&mut current, RecordPage::new(new_layout.page_layout()));
                    pages.push(full);
                }
                if !current.try_add(stored) {
                    return Err(FolioError::RecordTooLarge {
                        key: record.key.clone(),
                        size,
                        limit: PAGE_RECORD_CAPACITY,
                    });
                }
                records += 1;
            }
        }
        if !current.is_empty() {
            pages.push(current);
        }

        for (i, records) in pages.iter().enumerate() {
            let mut page = Page::pooled(i as PageId + 1, self.file.pool());
            records.write_to(&mut page)?;
            self.file.write_page_owned(page)?;
        }
        let new_page_count = pages.len() as u64 + 1;
        self.file.truncate(new_page_count)?;
        self.cache.clear();

        let mut metadata = self.metadata.write();
        metadata.columns = columns;
        metadata.page_count = new_page_count;
        metadata.record_count = records;
        metadata.flush_sequence += 1;
        metadata.touch();
        metadata.write_to(&self.file)?;
        self.file.flush()?;

        *layout = new_layout;
        self.indexes
            .rebuild_all(&self.file, new_page_count, &layout)?;
        self.indexes.save_indexes(metadata.flush_sequence)?;

        info!(
            table = %self.name,
            columns = metadata.columns.len(),
            records,
            pages = new_page_count,
            "altered schema"
        );
        Ok(())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Declared columns (empty for generic tables)
    pub fn columns(&self) -> Vec<ColumnDefinition> {
        self.metadata.read().columns.clone()
    }

    /// Snapshot of the persisted metadata
    pub fn metadata(&self) -> TableMetadata {
        self.metadata.read().clone()
    }

    pub fn memtable(&self) -> &MemTable {
        &self.memtable
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn stats(&self) -> TableStats {
        let metadata = self.metadata.read();
        let (cache_hits, cache_misses) = self.cache.stats();
        TableStats {
            name: self.name.clone(),
            record_count: metadata.record_count,
            page_count: metadata.page_count,
            flush_sequence: metadata.flush_sequence,
            memtable_entries: self.memtable.entry_count(),
            memtable_bytes: self.memtable.size(),
            cached_pages: self.cache.len(),
            cache_hits,
            cache_misses,
            indexes: self.indexes.stats(),
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.checkpoint() {
            warn!(table = %self.name, error = %e, "checkpoint on drop failed");
        }
    }
}

// =============================================================================
// Flush Batch
// =============================================================================

/// Data pages touched by one flush
struct FlushBatch<'a> {
    table: &'a Table,
    layout: PageLayout,
    pages: BTreeMap<PageId, RecordPage>,
    dirty: BTreeSet<PageId>,
    /// Pages that failed to decode; never written to
    unusable: HashSet<PageId>,
    page_count: u64,
}

impl<'a> FlushBatch<'a> {
    fn new(table: &'a Table, layout: PageLayout, page_count: u64) -> Self {
        Self {
            table,
            layout,
            pages: BTreeMap::new(),
            dirty: BTreeSet::new(),
            unusable: HashSet::new(),
            page_count: page_count.max(METADATA_PAGE_ID + 1),
        }
    }

    fn page_mut(&mut self, page_id: PageId) -> Option<&mut RecordPage> {
        if page_id == METADATA_PAGE_ID || page_id >= self.page_count || self.unusable.contains(&page_id) {
            return None;
        }
        if !self.pages.contains_key(&page_id) {
            match self.table.read_record_page(page_id, self.layout) {
                Ok(page) => {
                    self.pages.insert(page_id, page);
                }
                Err(e) => {
                    warn!(table = %self.table.name, page_id, error = %e, "page unusable for flush");
                    self.unusable.insert(page_id);
                    return None;
                }
            }
        }
        self.pages.get_mut(&page_id)
    }

    /// Overwrite the flushed version of `record` held on `page_id`
    ///
    /// Returns the page the record now lives on and the decoded old value,
    /// or None if the old version was not found there.
    fn replace(
        &mut self,
        page_id: PageId,
        record: StoredRecord,
        layout: &RecordLayout,
    ) -> Result<Option<(PageId, Option<Value>)>> {
        let Some(page) = self.page_mut(page_id) else {
            return Ok(None);
        };
        let Some(old) = page.get(&record.key) else {
            return Ok(None);
        };
        let previous = layout.decode_json(&old.key, &old.body).ok();

        self.dirty.insert(page_id);
        let Some(page) = self.pages.get_mut(&page_id) else {
            return Ok(None);
        };
        if page.try_replace(record.clone()) {
            return Ok(Some((page_id, previous)));
        }
        page.remove(&record.key);
        let new_page = self.place(record)?;
        Ok(Some((new_page, previous)))
    }

    /// First-fit placement from page 1, appending a page if none has room
    fn place(&mut self, record: StoredRecord) -> Result<PageId> {
        for page_id in 1..self.page_count {
            if let Some(page) = self.page_mut(page_id) {
                if page.fits(&record) {
                    page.try_add(record);
                    self.dirty.insert(page_id);
                    return Ok(page_id);
                }
            }
        }

        let page_id = self.page_count;
        let mut page = RecordPage::new(self.layout);
        if !page.try_add(record) {
            return Err(FolioError::Corruption(format!(
                "record does not fit an empty page of table '{}'",
                self.table.name
            )));
        }
        self.pages.insert(page_id, page);
        self.dirty.insert(page_id);
        self.page_count += 1;
        Ok(page_id)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(FolioError::InvalidValue(format!(
            "'{}' is not a valid table name",
            name
        )));
    }
    Ok(())
}

/// Check that `column` can carry an index of `key_type` under `columns`
///
/// Undeclared columns (including every column of a generic table) accept
/// any key type.
fn check_indexable(columns: &[ColumnDefinition], column: &str, key_type: KeyType) -> Result<()> {
    let Some(definition) = columns.iter().find(|c| c.name == column) else {
        return Ok(());
    };
    if !definition.is_stored() {
        return Err(FolioError::Schema(format!(
            "column '{}' is a relationship and cannot be indexed",
            column
        )));
    }
    match definition.key_type() {
        Some(declared) if declared == key_type => Ok(()),
        Some(declared) => Err(FolioError::IndexTypeMismatch {
            column: column.to_string(),
            expected: key_type,
            actual: declared,
        }),
        None => Err(FolioError::Schema(format!(
            "list column '{}' cannot be indexed",
            column
        ))),
    }
}

fn decode_or_null(layout: &RecordLayout, key: &str, body: &[u8]) -> Value {
    layout.decode_json(key, body).unwrap_or_else(|e| {
        warn!(key, error = %e, "record not decodable for indexing");
        Value::Null
    })
}
