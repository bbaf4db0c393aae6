//! Page Module
//!
//! Fixed-size pages: the unit of all file I/O.
//!
//! ## Responsibilities
//! - Own exactly `PAGE_SIZE` bytes, zero-filled on creation
//! - Bounds-checked reads and writes
//! - Length-prefixed payload framing shared by every on-disk structure
//! - Return buffers to a `PagePool` on drop instead of freeing them
//!
//! ## Payload Framing
//! ```text
//! ┌────────────────┬──────────────────────────────┬──────────────┐
//! │ Length (4, LE) │ Payload (Length bytes)       │ Zero padding │
//! └────────────────┴──────────────────────────────┴──────────────┘
//! ```

mod pool;

use std::fmt;
use std::sync::Arc;

use crate::error::{FolioError, Result};

pub use pool::PagePool;

/// Size of every page in bytes (64 KB)
pub const PAGE_SIZE: usize = 65536;

/// Size of the length prefix written by `write_prefixed`
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload that fits behind the length prefix
pub const MAX_PAYLOAD_SIZE: usize = PAGE_SIZE - LENGTH_PREFIX_SIZE;

/// Page 0 of every table and index file holds metadata
pub const METADATA_PAGE_ID: PageId = 0;

/// Page identifier: position of the page within its file
pub type PageId = u64;

/// A fixed-size page buffer
pub struct Page {
    id: PageId,
    data: Box<[u8]>,
    /// Pool the buffer goes back to on drop (None = plain allocation)
    pool: Option<Arc<PagePool>>,
}

impl Page {
    /// Create a zero-filled page backed by a fresh allocation
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            pool: None,
        }
    }

    /// Create a zero-filled page whose buffer is borrowed from `pool`
    pub fn pooled(id: PageId, pool: &Arc<PagePool>) -> Self {
        Self {
            id,
            data: pool.acquire(),
            pool: Some(Arc::clone(pool)),
        }
    }

    /// Get the page id
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Raw page contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw page contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy `bytes` into the page at `offset`
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = Self::checked_end(offset, bytes.len())?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Fill `buf` from the page starting at `offset`
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let end = Self::checked_end(offset, buf.len())?;
        buf.copy_from_slice(&self.data[offset..end]);
        Ok(())
    }

    /// Write `payload` behind a 4-byte little-endian length prefix
    ///
    /// Bytes after the payload are zeroed so no stale tail survives a rewrite.
    pub fn write_prefixed(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FolioError::PageBounds {
                offset: LENGTH_PREFIX_SIZE,
                len: payload.len(),
            });
        }
        self.write(0, &(payload.len() as u32).to_le_bytes())?;
        self.write(LENGTH_PREFIX_SIZE, payload)?;
        self.data[LENGTH_PREFIX_SIZE + payload.len()..].fill(0);
        Ok(())
    }

    /// Read the payload written by `write_prefixed`
    pub fn read_prefixed(&self) -> Result<&[u8]> {
        read_prefixed(&self.data)
    }

    /// True if no byte of the page has been written
    pub fn is_zeroed(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    fn checked_end(offset: usize, len: usize) -> Result<usize> {
        match offset.checked_add(len) {
            Some(end) if end <= PAGE_SIZE => Ok(end),
            _ => Err(FolioError::PageBounds { offset, len }),
        }
    }
}

/// Decode a length-prefixed payload from raw page bytes
///
/// Used directly on cached page copies, which are plain byte slices.
pub fn read_prefixed(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return Err(FolioError::Corruption(format!(
            "page buffer of {} bytes has no length prefix",
            bytes.len()
        )));
    }
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&bytes[..LENGTH_PREFIX_SIZE]);
    let len = u32::from_le_bytes(prefix) as usize;
    if len > bytes.len() - LENGTH_PREFIX_SIZE {
        return Err(FolioError::Corruption(format!(
            "length prefix {} exceeds page payload capacity",
            len
        )));
    }
    Ok(&bytes[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len])
}

impl Clone for Page {
    fn clone(&self) -> Self {
        let mut copy = match &self.pool {
            Some(pool) => Page::pooled(self.id, pool),
            None => Page::new(self.id),
        };
        copy.data.copy_from_slice(&self.data);
        copy
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}
