//! MemTable Module
//!
//! In-memory sorted write buffer absorbing inserts before they are packed
//! into pages.
//!
//! ## Responsibilities
//! - Hold encoded records keyed by exact byte-order string comparison
//! - Enforce a byte budget for new keys (updates always succeed)
//! - Signal when the owner should flush
//! - Drain atomically, in ascending key order, for flushing
//!
//! ## Size Accounting
//! Each entry costs `2 * utf16_len(key) + value.len()` bytes, so the budget
//! tracks wide-character key storage rather than UTF-8 length.

mod table;

pub use table::MemTable;

/// Default byte budget of a MemTable (16 MB)
pub const DEFAULT_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Bytes charged for a key: two per UTF-16 code unit
pub fn key_size(key: &str) -> usize {
    key.encode_utf16().count() * 2
}
