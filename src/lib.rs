//! # FolioDB
//!
//! An embedded, page-oriented storage engine with:
//! - Fixed-size 64 KB pages with pooled buffers
//! - A byte-bounded MemTable absorbing writes before they are packed into pages
//! - Generic or schema-based (positional) record encodings
//! - A primary hash index and typed secondary B-tree indexes
//! - An LRU page cache in front of file reads
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Table                               │
//! │        insert / find / select_all / range / sorted           │
//! └──────┬──────────────────┬──────────────────────┬────────────┘
//!        │                  │                      │
//!        ▼                  ▼                      ▼
//!  ┌───────────┐     ┌──────────────┐      ┌──────────────┐
//!  │ MemTable  │     │ IndexManager │      │  PageCache   │
//!  │  (Mutex)  │     │ hash + btree │      │    (LRU)     │
//!  └─────┬─────┘     └──────┬───────┘      └──────┬───────┘
//!        │ flush            │ save / load         │ miss
//!        ▼                  ▼                     ▼
//!  ┌─────────────────────────────────────────────────────────┐
//!  │                     FileManager                          │
//!  │          dirty-page table → page-aligned writes          │
//!  └─────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod page;
pub mod storage;
pub mod memtable;
pub mod schema;
pub mod record;
pub mod index;
pub mod table;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{FolioError, Result};
pub use config::Config;
pub use index::{BTreeIndex, FloatKey, IndexKey, IndexValue, KeyType};
pub use table::{Table, TableStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of FolioDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Milliseconds since the Unix epoch (0 if the clock is before it)
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
