//! Configuration for FolioDB
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};

use crate::error::{FolioError, Result};

/// Default order of secondary B-trees
pub const DEFAULT_BTREE_ORDER: usize = 32;

/// Main configuration for a FolioDB data directory
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all table and index files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── {table}.tbl            (page-addressed table file)
    ///     └── {table}.indexes/
    ///           ├── primary.hash     (primary key → page id)
    ///           └── {column}.idx     (one B-tree per indexed column)
    pub data_dir: PathBuf,

    /// fsync the table file at the end of every flush
    pub sync_on_flush: bool,

    /// Number of page buffers kept for reuse after pages are dropped
    pub page_pool_capacity: usize,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Cache / Index Configuration
    // -------------------------------------------------------------------------
    /// Number of raw pages held by the LRU page cache
    pub page_cache_capacity: usize,

    /// Order of every secondary B-tree (max keys per node = order - 1)
    pub btree_order: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./foliodb_data"),
            sync_on_flush: true,
            page_pool_capacity: 64,
            memtable_size_limit: 16 * 1024 * 1024, // 16 MB
            page_cache_capacity: 256,
            btree_order: DEFAULT_BTREE_ORDER,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the configured sizes can produce a working engine
    pub fn validate(&self) -> Result<()> {
        if self.memtable_size_limit == 0 {
            return Err(FolioError::Config(
                "memtable_size_limit must be greater than zero".to_string(),
            ));
        }
        if self.page_cache_capacity == 0 {
            return Err(FolioError::Config(
                "page_cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self.btree_order < 4 || self.btree_order % 2 != 0 {
            return Err(FolioError::Config(format!(
                "btree_order must be an even number >= 4, got {}",
                self.btree_order
            )));
        }
        Ok(())
    }

    /// Path of the page file backing `table`
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{}.tbl", table))
    }

    /// Directory holding the persisted indexes of `table`
    pub fn index_dir(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{}.indexes", table))
    }

    /// Convenience: default config rooted at `path`
    pub fn with_data_dir(path: &Path) -> Self {
        Self {
            data_dir: path.to_path_buf(),
            ..Self::default()
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set whether flushes fsync the table file
    pub fn sync_on_flush(mut self, sync: bool) -> Self {
        self.config.sync_on_flush = sync;
        self
    }

    /// Set how many page buffers the pool retains
    pub fn page_pool_capacity(mut self, count: usize) -> Self {
        self.config.page_pool_capacity = count;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the page cache capacity (in pages)
    pub fn page_cache_capacity(mut self, pages: usize) -> Self {
        self.config.page_cache_capacity = pages;
        self
    }

    /// Set the B-tree order for secondary indexes
    pub fn btree_order(mut self, order: usize) -> Self {
        self.config.btree_order = order;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
