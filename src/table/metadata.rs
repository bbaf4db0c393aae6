//! Table metadata (page 0 of a table file)

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};
use crate::index::{IndexDefinition, IndexStats};
use crate::page::{Page, METADATA_PAGE_ID};
use crate::schema::ColumnDefinition;
use crate::storage::FileManager;

/// Persistent description of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,

    /// Declared columns; empty for a generic key/value table
    pub columns: Vec<ColumnDefinition>,

    /// Secondary indexes to restore on open
    pub indexes: Vec<IndexDefinition>,

    /// Distinct records stored on data pages
    pub record_count: u64,

    /// Pages in the table file, metadata page included
    pub page_count: u64,

    /// Incremented by every flush; persisted indexes record the value
    /// they were saved at
    pub flush_sequence: u64,

    /// Unix millis
    pub created_at: u64,
    pub updated_at: u64,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        let now = crate::unix_millis();
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
            record_count: 0,
            page_count: 1,
            flush_sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Decode the metadata page of `file`
    pub fn read_from(file: &FileManager) -> Result<Self> {
        let page = file.read_page(METADATA_PAGE_ID)?;
        let payload = page.read_prefixed()?;
        if payload.is_empty() {
            return Err(FolioError::Corruption(format!(
                "table file {} has no metadata",
                file.path().display()
            )));
        }
        let metadata: TableMetadata = bincode::deserialize(payload)?;
        if metadata.page_count == 0 {
            return Err(FolioError::Corruption(format!(
                "table '{}' records zero pages",
                metadata.name
            )));
        }
        Ok(metadata)
    }

    /// Stage the metadata page; durable after the next `FileManager::flush`
    pub fn write_to(&self, file: &FileManager) -> Result<()> {
        let payload = bincode::serialize(self)?;
        let mut page = Page::pooled(METADATA_PAGE_ID, file.pool());
        page.write_prefixed(&payload)?;
        file.write_page_owned(page)
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = crate::unix_millis();
    }
}

/// Point-in-time statistics for a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    pub name: String,
    pub record_count: u64,
    pub page_count: u64,
    pub flush_sequence: u64,
    pub memtable_entries: usize,
    pub memtable_bytes: usize,
    pub cached_pages: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub indexes: IndexStats,
}
