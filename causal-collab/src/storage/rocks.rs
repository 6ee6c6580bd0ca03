//! RocksDB tuning and errors shared by every store in the data directory.
//!
//! Each document lives in its own database, so the defaults are sized for
//! many small databases open at once rather than one large one.

use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, Options, WriteOptions};
use std::path::PathBuf;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes, shared by the column families of one database (default: 16MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Fsync every committed write (default: true)
    pub sync_writes: bool,
    /// Max open files per database (default: 128)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 4MB)
    pub write_buffer_size: usize,
    /// How long a registry transaction waits for a contended key (default: 5s)
    pub lock_timeout_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data"),
            block_cache_size: 16 * 1024 * 1024, // 16MB
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 128,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            lock_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 1024 * 1024, // 1MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 32,
            write_buffer_size: 1024 * 1024, // 1MB
            lock_timeout_ms: 5_000,
        }
    }

    /// Same tuning, different location.
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Database-wide options.
    pub(crate) fn db_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(self.max_open_files);
        opts.set_keep_log_file_num(2);
        opts
    }

    /// Column family options: bloom filter for point lookups, LZ4 blocks.
    pub(crate) fn cf_options(&self, cache: &Cache) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(cache);
        block_opts.set_bloom_filter(self.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_max_write_buffer_number(2);
        opts
    }

    pub(crate) fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        write_opts
    }
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// RocksDB internal error
    #[error("Database error: {0}")]
    Database(String),
    /// A vertex with this id is already stored
    #[error("Duplicate vertex id: {0}")]
    DuplicateVertex(String),
    /// An id that cannot be used as a storage key
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}
