//! File Manager
//!
//! Maps one table or index file onto page-addressed reads and writes.
//!
//! ## Responsibilities
//! - Read pages at page-aligned offsets (zeroed page past end of file)
//! - Buffer writes in a dirty-page table until `flush()`
//! - Serve pending dirty copies ahead of disk contents
//! - Write whole pages only, then issue a durable sync

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::page::{Page, PageId, PagePool, PAGE_SIZE};

/// Page-granular access to a single file
///
/// ## Concurrency:
/// - `state`: one mutex guarding the file handle and the dirty-page table
/// - All methods use `&self`
pub struct FileManager {
    /// Path of the backing file
    path: PathBuf,

    /// Buffer pool for pages handed out by reads
    pool: Arc<PagePool>,

    /// fsync the file at the end of every flush
    sync_on_flush: bool,

    /// File handle + pending writes
    state: Mutex<FileState>,
}

struct FileState {
    file: File,
    /// Length of the file on disk, in bytes
    disk_len: u64,
    /// Pages written since the last flush, keyed by id
    dirty: BTreeMap<PageId, Page>,
    /// Page writes allowed before the next flush fails
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl FileManager {
    /// Create (or truncate) a file and manage it
    pub fn create(path: &Path, pool: Arc<PagePool>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::from_file(path, file, 0, pool))
    }

    /// Open an existing file; fails if it does not exist
    pub fn open(path: &Path, pool: Arc<PagePool>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let disk_len = file.metadata()?.len();
        Ok(Self::from_file(path, file, disk_len, pool))
    }

    /// Open a file, creating an empty one if missing
    pub fn open_or_create(path: &Path, pool: Arc<PagePool>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let disk_len = file.metadata()?.len();
        Ok(Self::from_file(path, file, disk_len, pool))
    }

    fn from_file(path: &Path, file: File, disk_len: u64, pool: Arc<PagePool>) -> Self {
        Self {
            path: path.to_path_buf(),
            pool,
            sync_on_flush: true,
            state: Mutex::new(FileState {
                file,
                disk_len,
                dirty: BTreeMap::new(),
                #[cfg(test)]
                fail_after: None,
            }),
        }
    }

    /// Enable or disable fsync on flush
    pub fn with_sync_on_flush(mut self, sync: bool) -> Self {
        self.sync_on_flush = sync;
        self
    }

    /// Read a page
    ///
    /// Returns:
    /// - the pending dirty copy, if the page was written since the last flush
    /// - a zeroed page, if the page lies beyond the end of the file
    /// - otherwise the on-disk contents
    pub fn read_page(&self, id: PageId) -> Result<Page> {
        let mut state = self.state.lock();

        if let Some(page) = state.dirty.get(&id) {
            return Ok(page.clone());
        }

        let mut page = self.pool.page(id);
        let offset = id * PAGE_SIZE as u64;
        if offset >= state.disk_len {
            return Ok(page);
        }

        // A torn tail page reads back as much as exists; the rest stays zeroed
        let available = (state.disk_len - offset).min(PAGE_SIZE as u64) as usize;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read_exact(&mut page.data_mut()[..available])?;
        Ok(page)
    }

    /// Stage a page for writing at its page-aligned offset
    pub fn write_page(&self, page: &Page) -> Result<()> {
        self.write_page_owned(page.clone())
    }

    /// Stage an owned page without copying it
    pub fn write_page_owned(&self, page: Page) -> Result<()> {
        let mut state = self.state.lock();
        state.dirty.insert(page.id(), page);
        Ok(())
    }

    /// Write every dirty page and sync the file
    ///
    /// Pages stay in the dirty table until every write and the sync have
    /// succeeded, so a failed flush can be retried. Returns the number of
    /// pages written.
    pub fn flush(&self) -> Result<usize> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.dirty.is_empty() {
            return Ok(0);
        }

        #[cfg(test)]
        let mut budget = state.fail_after.take();

        for (id, page) in &state.dirty {
            #[cfg(test)]
            if let Some(left) = budget.as_mut() {
                if *left == 0 {
                    return Err(std::io::Error::other("injected write failure").into());
                }
                *left -= 1;
            }

            let offset = id * PAGE_SIZE as u64;
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.write_all(page.data())?;
            state.disk_len = state.disk_len.max(offset + PAGE_SIZE as u64);
        }

        state.file.flush()?;
        if self.sync_on_flush {
            state.file.sync_data()?;
        }

        let written = state.dirty.len();
        state.dirty.clear();
        debug!(path = %self.path.display(), pages = written, "flushed dirty pages");
        Ok(written)
    }

    /// Drop every pending write, returning how many pages were discarded
    ///
    /// Later reads see the on-disk contents again.
    pub fn discard_pending(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.dirty.len();
        state.dirty.clear();
        if discarded > 0 {
            debug!(path = %self.path.display(), pages = discarded, "discarded pending pages");
        }
        discarded
    }

    /// Make the next flush fail after `pages` page writes
    #[cfg(test)]
    pub(crate) fn fail_flush_after(&self, pages: usize) {
        self.state.lock().fail_after = Some(pages);
    }

    /// Number of addressable pages (on disk or pending)
    pub fn page_count(&self) -> u64 {
        let state = self.state.lock();
        let on_disk = state.disk_len.div_ceil(PAGE_SIZE as u64);
        let pending = state.dirty.keys().next_back().map(|id| id + 1).unwrap_or(0);
        on_disk.max(pending)
    }

    /// Shrink the file to `page_count` pages, discarding pending writes past it
    pub fn truncate(&self, page_count: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.dirty.retain(|id, _| *id < page_count);

        let len = page_count * PAGE_SIZE as u64;
        if len < state.disk_len {
            state.file.set_len(len)?;
            state.disk_len = len;
        }
        Ok(())
    }

    /// Number of pages written but not yet flushed
    pub fn dirty_page_count(&self) -> usize {
        self.state.lock().dirty.len()
    }

    /// Get the path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the buffer pool used for pages read from this file
    pub fn pool(&self) -> &Arc<PagePool> {
        &self.pool
    }
}
