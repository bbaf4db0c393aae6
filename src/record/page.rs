//! Record pages
//!
//! Bin-packs record slots into a data page, filling at most 75% of the page
//! to leave room for framing and growth.

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};
use crate::page::{read_prefixed, Page, PAGE_SIZE};

/// Serialized bytes a data page may hold
pub const PAGE_RECORD_CAPACITY: usize = PAGE_SIZE * 3 / 4;

/// Layout tag: enum variant (4) + slot count (8)
const PAGE_HEADER_SIZE: usize = 12;

/// Which record encoding the slots of a page use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageLayout {
    Generic,
    SchemaBased,
}

/// One record as held on a page: key plus encoded body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub body: Vec<u8>,
}

impl StoredRecord {
    pub fn new(key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            body,
        }
    }

    /// Serialized size: two u64 length prefixes plus key and body bytes
    pub fn encoded_size(&self) -> usize {
        16 + self.key.len() + self.body.len()
    }
}

/// Contents of a data page (page 1 and up)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPage {
    layout: PageLayout,
    records: Vec<StoredRecord>,
}

impl RecordPage {
    /// Create an empty page for `layout`
    pub fn new(layout: PageLayout) -> Self {
        Self {
            layout,
            records: Vec::new(),
        }
    }

    /// Decode raw page bytes (a page or a cached copy)
    ///
    /// A never-written page decodes as empty. A page written with a
    /// different layout is reported as corruption.
    pub fn from_bytes(bytes: &[u8], layout: PageLayout) -> Result<Self> {
        let payload = read_prefixed(bytes)?;
        if payload.is_empty() {
            return Ok(Self::new(layout));
        }

        let page: RecordPage = bincode::deserialize(payload)?;
        if page.layout != layout {
            return Err(FolioError::Corruption(format!(
                "data page uses {:?} records, table expects {:?}",
                page.layout, layout
            )));
        }
        Ok(page)
    }

    /// Serialize into `page` behind a length prefix
    pub fn write_to(&self, page: &mut Page) -> Result<()> {
        let payload = bincode::serialize(self)?;
        page.write_prefixed(&payload)
    }

    /// Bytes this page would serialize to
    pub fn used_bytes(&self) -> usize {
        PAGE_HEADER_SIZE
            + self
                .records
                .iter()
                .map(StoredRecord::encoded_size)
                .sum::<usize>()
    }

    /// True if `record` can be added without exceeding page capacity
    pub fn fits(&self, record: &StoredRecord) -> bool {
        self.used_bytes() + record.encoded_size() <= PAGE_RECORD_CAPACITY
    }

    /// Append a record with a new key if it fits
    pub fn try_add(&mut self, record: StoredRecord) -> bool {
        if !self.fits(&record) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Replace the record with the same key, if the page can hold the new body
    ///
    /// Returns false (page unchanged) if the key is absent or it does not fit.
    pub fn try_replace(&mut self, record: StoredRecord) -> bool {
        let Some(pos) = self.position(&record.key) else {
            return false;
        };
        let used = self.used_bytes() - self.records[pos].encoded_size();
        if used + record.encoded_size() > PAGE_RECORD_CAPACITY {
            return false;
        }
        self.records[pos] = record;
        true
    }

    /// Remove and return the record for `key`
    pub fn remove(&mut self, key: &str) -> Option<StoredRecord> {
        self.position(key).map(|pos| self.records.remove(pos))
    }

    /// Get the record for `key`
    pub fn get(&self, key: &str) -> Option<&StoredRecord> {
        self.records.iter().find(|r| r.key == key)
    }

    pub fn records(&self) -> &[StoredRecord] {
        &self.records
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.records.iter().position(|r| r.key == key)
    }
}
