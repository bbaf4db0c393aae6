//! Primary hash index
//!
//! Maps every flushed record key to the data page holding it.
//!
//! ## File Format (`primary.hash`)
//! ```text
//! ┌───────────┬──────────────┬──────────────┬──────────────────────────┐
//! │ Magic (4) │ Length (8)   │ CRC32 (4)    │ Snapshot (bincode)       │
//! └───────────┴──────────────┴──────────────┴──────────────────────────┘
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FolioError, Result};
use crate::page::PageId;
use crate::record::{RecordLayout, RecordPage};
use crate::storage::FileManager;

/// Magic bytes identifying a primary index file
pub const MAGIC: &[u8; 4] = b"FHIX";

/// Magic (4) + length (8) + crc32 (4)
const HEADER_SIZE: usize = 16;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    table_sequence: u64,
    entries: Vec<(String, PageId)>,
}

/// Concurrent key → page id map
///
/// ## Concurrency:
/// Sharded locking inside `DashMap`; no external lock needed.
#[derive(Debug, Default)]
pub struct HashIndex {
    entries: DashMap<String, PageId>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `key` at `page_id`, replacing any previous mapping
    pub fn put(&self, key: impl Into<String>, page_id: PageId) {
        self.entries.insert(key.into(), page_id);
    }

    pub fn get(&self, key: &str) -> Option<PageId> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    pub fn remove(&self, key: &str) -> Option<PageId> {
        self.entries.remove(key).map(|(_, page_id)| page_id)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Repopulate from every data page of `file`
    ///
    /// Pages `1..page_count` are decoded with `layout`. A page that fails to
    /// decode is skipped.
    pub fn rebuild(&self, file: &FileManager, page_count: u64, layout: &RecordLayout) -> Result<()> {
        self.clear();
        for page_id in 1..page_count {
            let page = file.read_page(page_id)?;
            let records = match RecordPage::from_bytes(page.data(), layout.page_layout()) {
                Ok(records) => records,
                Err(e) => {
                    warn!(page_id, error = %e, "skipping undecodable page during hash rebuild");
                    continue;
                }
            };
            for record in records.records() {
                self.put(record.key.clone(), page_id);
            }
        }
        debug!(entries = self.len(), pages = page_count, "rebuilt primary index");
        Ok(())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the index to `path`, stamped with `table_sequence`
    pub fn save(&self, path: &Path, table_sequence: u64) -> Result<()> {
        let mut entries: Vec<(String, PageId)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort();

        let body = bincode::serialize(&Snapshot {
            table_sequence,
            entries,
        })?;

        let tmp = path.with_extension("hash.tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(MAGIC)?;
            writer.write_all(&(body.len() as u64).to_le_bytes())?;
            writer.write_all(&crc32fast::hash(&body).to_le_bytes())?;
            writer.write_all(&body)?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Replace the contents with those saved at `path`
    ///
    /// Returns the table sequence the file was stamped with. The index is
    /// left unchanged on error.
    pub fn load(&self, path: &Path) -> Result<u64> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        if bytes.len() < HEADER_SIZE || &bytes[..4] != MAGIC {
            return Err(FolioError::Corruption(format!(
                "{} is not a primary index file",
                path.display()
            )));
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[4..12]);
        let len = u64::from_le_bytes(len) as usize;
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&bytes[12..16]);
        let crc = u32::from_le_bytes(crc);

        let body = &bytes[HEADER_SIZE..];
        if body.len() != len {
            return Err(FolioError::Corruption(format!(
                "{} holds {} body bytes, header says {}",
                path.display(),
                body.len(),
                len
            )));
        }
        if crc32fast::hash(body) != crc {
            return Err(FolioError::Corruption(format!(
                "checksum mismatch in {}",
                path.display()
            )));
        }

        let snapshot: Snapshot = bincode::deserialize(body)?;
        self.clear();
        for (key, page_id) in snapshot.entries {
            self.entries.insert(key, page_id);
        }
        Ok(snapshot.table_sequence)
    }
}
