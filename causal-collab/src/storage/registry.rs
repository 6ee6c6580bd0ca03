//! Durable document name → storage filename mapping.
//!
//! Backed by a pessimistic RocksDB `TransactionDB`. Allocation is a single
//! transaction: `get_for_update` locks the name's key whether or not it
//! exists, so concurrent first callers for the same name queue on that lock
//! and the first commit decides the filename for everyone.

use rocksdb::{
    Cache, ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Transaction, TransactionDB,
    TransactionDBOptions,
};
use std::path::Path;
use uuid::Uuid;

use super::rocks::{StoreConfig, StoreError};

const CF_DOCUMENTS: &str = "documents";

/// Suffix of every allocated document filename.
pub const FILENAME_SUFFIX: &str = ".db";

/// Name → filename registry.
pub struct FilenameStore {
    db: TransactionDB,
    config: StoreConfig,
}

impl FilenameStore {
    /// Open the registry at `config.path`.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let db_opts = config.db_options();
        let cache = Cache::new_lru_cache(config.block_cache_size);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(config.lock_timeout_ms);

        let db = TransactionDB::open_cf_descriptors(
            &db_opts,
            &txn_opts,
            &config.path,
            vec![ColumnFamilyDescriptor::new(
                CF_DOCUMENTS,
                config.cf_options(&cache),
            )],
        )?;

        log::debug!("Opened filename registry {}", config.path.display());
        Ok(Self { db, config })
    }

    /// Get the filename for `name`, allocating a fresh one on first use.
    ///
    /// Idempotent: every call for the same name returns the same filename,
    /// including concurrent first calls.
    pub fn filename_for(&self, name: &str) -> Result<String, StoreError> {
        let cf = self.cf()?;
        let txn = self.db.transaction();

        match Self::lookup_or_insert(&txn, cf, name) {
            Ok((filename, inserted)) => {
                txn.commit()?;
                if inserted {
                    log::info!("Allocated {filename} for document {name:?}");
                }
                Ok(filename)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback() {
                    log::error!("Rollback failed for document {name:?}: {rollback}");
                }
                Err(e)
            }
        }
    }

    fn lookup_or_insert(
        txn: &Transaction<'_, TransactionDB>,
        cf: &ColumnFamily,
        name: &str,
    ) -> Result<(String, bool), StoreError> {
        if let Some(existing) = txn.get_for_update_cf(cf, name.as_bytes(), true)? {
            return Ok((decode_filename(existing)?, false));
        }

        let filename = format!("{}{FILENAME_SUFFIX}", Uuid::new_v4());
        txn.put_cf(cf, name.as_bytes(), filename.as_bytes())?;
        Ok((filename, true))
    }

    /// Look up an existing mapping without allocating.
    pub fn lookup(&self, name: &str) -> Result<Option<String>, StoreError> {
        let cf = self.cf()?;
        self.db
            .get_cf(cf, name.as_bytes())?
            .map(decode_filename)
            .transpose()
    }

    /// All `(name, filename)` records, ordered by name.
    pub fn list(&self) -> Result<Vec<(String, String)>, StoreError> {
        let cf = self.cf()?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let name = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            records.push((name, decode_filename(value.to_vec())?));
        }
        Ok(records)
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self) -> Result<&ColumnFamily, StoreError> {
        self.db.cf_handle(CF_DOCUMENTS).ok_or_else(|| {
            StoreError::Database(format!("Column family '{CF_DOCUMENTS}' not found"))
        })
    }
}

fn decode_filename(bytes: Vec<u8>) -> Result<String, StoreError> {
    String::from_utf8(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
}
