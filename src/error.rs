//! Error types for FolioDB
//!
//! Provides a unified error type for all engine operations.

use thiserror::Error;

use crate::index::KeyType;

/// Result type alias using FolioError
pub type Result<T> = std::result::Result<T, FolioError>;

/// Unified error type for FolioDB operations
#[derive(Debug, Error)]
pub enum FolioError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page access out of bounds: offset {offset} + length {len} exceeds page size")]
    PageBounds { offset: usize, len: usize },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Record '{key}' is {size} bytes, exceeding the {limit}-byte page capacity")]
    RecordTooLarge { key: String, size: usize, limit: usize },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("No index exists on column '{column}'")]
    IndexNotFound { column: String },

    #[error("Index on column '{column}' has key type {actual}, not {expected}")]
    IndexTypeMismatch {
        column: String,
        expected: KeyType,
        actual: KeyType,
    },

    // -------------------------------------------------------------------------
    // Schema / Value Errors
    // -------------------------------------------------------------------------
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for FolioError {
    fn from(err: bincode::Error) -> Self {
        FolioError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for FolioError {
    fn from(err: serde_json::Error) -> Self {
        FolioError::Serialization(err.to_string())
    }
}
