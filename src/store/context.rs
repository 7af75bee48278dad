//! TypedDbContext implementation for type-safe RocksDB operations
//!
//! Provides type-safe database operations with column families and codecs.
//! A [`WriteTxn`] overlays staged writes on top of the database so a whole
//! event cascade can read its own uncommitted effects and then land in a
//! single atomic batch.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use thiserror::Error;

use crate::store::{
    codec::{CodecError, DbCodec},
    table::TypedCf,
};

#[derive(Debug, Error)]
pub enum DbContextError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Database context providing type-safe operations with column families
#[derive(Clone)]
pub struct TypedDbContext {
    db: Arc<DB>,
}

impl TypedDbContext {
    /// Open database with specified column families
    pub fn open<P: AsRef<Path>>(
        path: P,
        column_families: Vec<&'static str>,
    ) -> Result<Self, DbContextError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(1000);
        opts.set_use_fsync(false);
        opts.set_bytes_per_sync(8388608);
        opts.optimize_for_point_lookup(1024);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = column_families
            .iter()
            .map(|&name| {
                let mut cf_opts = Options::default();
                cf_opts.optimize_for_point_lookup(1024);
                ColumnFamilyDescriptor::new(name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Put a key-value pair in the specified column family
    pub fn put<CF: TypedCf>(&self, key: &CF::Key, value: &CF::Value) -> Result<(), DbContextError> {
        let cf = self.cf_handle(CF::NAME)?;
        let key_bytes = CF::KeyCodec::encode(key)?;
        let value_bytes = CF::ValueCodec::encode(value)?;

        self.db.put_cf(&cf, key_bytes, value_bytes)?;
        Ok(())
    }

    /// Get a value by key from the specified column family
    pub fn get<CF: TypedCf>(&self, key: &CF::Key) -> Result<Option<CF::Value>, DbContextError> {
        let key_bytes = CF::KeyCodec::encode(key)?;
        match self.get_bytes(CF::NAME, &key_bytes)? {
            Some(value_bytes) => Ok(Some(CF::ValueCodec::decode(&value_bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a key from the specified column family
    pub fn delete<CF: TypedCf>(&self, key: &CF::Key) -> Result<(), DbContextError> {
        let cf = self.cf_handle(CF::NAME)?;
        let key_bytes = CF::KeyCodec::encode(key)?;

        self.db.delete_cf(&cf, key_bytes)?;
        Ok(())
    }

    /// Check if a key exists in the specified column family
    pub fn exists<CF: TypedCf>(&self, key: &CF::Key) -> Result<bool, DbContextError> {
        let key_bytes = CF::KeyCodec::encode(key)?;
        Ok(self.get_bytes(CF::NAME, &key_bytes)?.is_some())
    }

    /// Scan all key-value pairs in the specified column family
    pub fn scan<CF: TypedCf>(&self) -> Result<Vec<(CF::Key, CF::Value)>, DbContextError> {
        let cf = self.cf_handle(CF::NAME)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        let mut results = Vec::new();
        for item in iter {
            let (key_bytes, value_bytes) = item?;
            let key = CF::KeyCodec::decode(&key_bytes)?;
            let value = CF::ValueCodec::decode(&value_bytes)?;
            results.push((key, value));
        }

        Ok(results)
    }

    /// Scan with key prefix in the specified column family
    pub fn scan_prefix<CF: TypedCf>(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(CF::Key, CF::Value)>, DbContextError> {
        let mut results = Vec::new();
        for (key_bytes, value_bytes) in self.scan_prefix_bytes(CF::NAME, prefix)? {
            let key = CF::KeyCodec::decode(&key_bytes)?;
            let value = CF::ValueCodec::decode(&value_bytes)?;
            results.push((key, value));
        }
        Ok(results)
    }

    /// Count rows in the specified column family
    pub fn count<CF: TypedCf>(&self) -> Result<u64, DbContextError> {
        let cf = self.cf_handle(CF::NAME)?;
        let mut total = 0u64;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            total += 1;
        }
        Ok(total)
    }

    /// Begin a write transaction layered over the current database state
    pub fn begin(&self) -> WriteTxn<'_> {
        WriteTxn {
            ctx: self,
            staged: HashMap::new(),
        }
    }

    fn cf_handle(&self, name: &'static str) -> Result<&rocksdb::ColumnFamily, DbContextError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| DbContextError::ColumnFamilyNotFound(name.to_string()))
    }

    fn get_bytes(
        &self,
        cf_name: &'static str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, DbContextError> {
        let cf = self.cf_handle(cf_name)?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    fn scan_prefix_bytes(
        &self,
        cf_name: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbContextError> {
        let cf = self.cf_handle(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut results = Vec::new();
        for item in iter {
            let (key_bytes, value_bytes) = item?;

            // Stop when we move past our prefix
            if !key_bytes.starts_with(prefix) {
                break;
            }

            results.push((key_bytes.to_vec(), value_bytes.to_vec()));
        }

        Ok(results)
    }
}

/// A write transaction: staged puts and deletes keyed by column family.
///
/// Reads through the transaction see staged state first, then fall back to
/// the database, so later stages of a cascade observe what earlier stages
/// wrote. Nothing reaches RocksDB until [`WriteTxn::commit`], which flushes
/// everything as one `WriteBatch`. Dropping the transaction discards it.
pub struct WriteTxn<'a> {
    ctx: &'a TypedDbContext,
    staged: HashMap<&'static str, BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl WriteTxn<'_> {
    /// Get a value, consulting staged writes before the database
    pub fn get<CF: TypedCf>(&self, key: &CF::Key) -> Result<Option<CF::Value>, DbContextError> {
        let key_bytes = CF::KeyCodec::encode(key)?;
        if let Some(entries) = self.staged.get(CF::NAME) {
            if let Some(staged) = entries.get(&key_bytes) {
                return match staged {
                    Some(value_bytes) => Ok(Some(CF::ValueCodec::decode(value_bytes)?)),
                    None => Ok(None),
                };
            }
        }
        match self.ctx.get_bytes(CF::NAME, &key_bytes)? {
            Some(value_bytes) => Ok(Some(CF::ValueCodec::decode(&value_bytes)?)),
            None => Ok(None),
        }
    }

    /// Stage a put
    pub fn put<CF: TypedCf>(&mut self, key: &CF::Key, value: &CF::Value) -> Result<(), DbContextError> {
        let key_bytes = CF::KeyCodec::encode(key)?;
        let value_bytes = CF::ValueCodec::encode(value)?;
        self.staged
            .entry(CF::NAME)
            .or_default()
            .insert(key_bytes, Some(value_bytes));
        Ok(())
    }

    /// Stage a delete
    pub fn delete<CF: TypedCf>(&mut self, key: &CF::Key) -> Result<(), DbContextError> {
        let key_bytes = CF::KeyCodec::encode(key)?;
        self.staged
            .entry(CF::NAME)
            .or_default()
            .insert(key_bytes, None);
        Ok(())
    }

    /// Prefix scan merging committed rows with staged puts and deletes
    pub fn scan_prefix<CF: TypedCf>(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(CF::Key, CF::Value)>, DbContextError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .ctx
            .scan_prefix_bytes(CF::NAME, prefix)?
            .into_iter()
            .collect();

        if let Some(entries) = self.staged.get(CF::NAME) {
            for (key_bytes, staged) in entries.range(prefix.to_vec()..) {
                if !key_bytes.starts_with(prefix) {
                    break;
                }
                match staged {
                    Some(value_bytes) => {
                        merged.insert(key_bytes.clone(), value_bytes.clone());
                    }
                    None => {
                        merged.remove(key_bytes);
                    }
                }
            }
        }

        let mut results = Vec::with_capacity(merged.len());
        for (key_bytes, value_bytes) in merged {
            let key = CF::KeyCodec::decode(&key_bytes)?;
            let value = CF::ValueCodec::decode(&value_bytes)?;
            results.push((key, value));
        }
        Ok(results)
    }

    /// Number of rows staged so far
    pub fn staged_len(&self) -> usize {
        self.staged.values().map(BTreeMap::len).sum()
    }

    /// Flush all staged writes atomically. Returns the number of rows written.
    pub fn commit(self) -> Result<usize, DbContextError> {
        let rows = self.staged_len();
        let mut batch = WriteBatch::default();
        for (cf_name, entries) in &self.staged {
            let cf = self.ctx.cf_handle(cf_name)?;
            for (key_bytes, staged) in entries {
                match staged {
                    Some(value_bytes) => batch.put_cf(&cf, key_bytes, value_bytes),
                    None => batch.delete_cf(&cf, key_bytes),
                }
            }
        }
        self.ctx.db.write(batch)?;
        Ok(rows)
    }
}
