//! Storage Module
//!
//! Page-addressed file I/O and the page cache in front of it.
//!
//! ## Responsibilities
//! - Read/write fixed-size pages at page-aligned offsets
//! - Buffer dirty pages until an explicit, durable flush
//! - Cache raw page copies to avoid repeated disk reads
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Page 0: metadata                       │
//! │   [Len: u32 LE][serialized metadata]   │
//! ├────────────────────────────────────────┤
//! │ Page 1..N: payload pages               │
//! │   [Len: u32 LE][serialized payload]    │
//! │   ... each exactly 65536 bytes ...     │
//! └────────────────────────────────────────┘
//! ```

mod cache;
mod file_manager;

pub use cache::PageCache;
pub use file_manager::FileManager;
