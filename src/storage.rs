//! Key-value persistence: RocksDB for production, an in-memory map for tests
//!
//! All multi-row mutations go through [`StoreBatch`], which every backend
//! applies atomically.

use crate::{
    config::{CompressionType, StorageConfig},
    errors::{CasinoError, CasinoResult, StorageError},
};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Arc, RwLock},
};

/// A single mutation inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Ordered set of mutations committed all-or-nothing
#[derive(Debug, Default, Clone)]
pub struct StoreBatch {
    ops: Vec<WriteOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(WriteOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(WriteOp::Delete(key));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

/// Storage backend used by [`crate::store::CasinoStore`]
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &[u8]) -> CasinoResult<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> CasinoResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every operation in the batch atomically
    fn write(&self, batch: StoreBatch) -> CasinoResult<()>;
}

#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<DB>,
}

impl OptimizedStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> CasinoResult<Self> {
        Self::new_with_config(&StorageConfig {
            data_directory: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        })
    }

    pub fn new_with_config(config: &StorageConfig) -> CasinoResult<Self> {
        if config.clear_on_start && Path::new(&config.data_directory).exists() {
            tracing::warn!(path = %config.data_directory, "Clearing casino database on start");
            std::fs::remove_dir_all(&config.data_directory)?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_compression_type(match config.compression_type {
            CompressionType::None => rocksdb::DBCompressionType::None,
            CompressionType::Snappy => rocksdb::DBCompressionType::Snappy,
            CompressionType::Lz4 => rocksdb::DBCompressionType::Lz4,
            CompressionType::Zstd => rocksdb::DBCompressionType::Zstd,
        });

        let db = DB::open(&opts, &config.data_directory).map_err(|e| {
            CasinoError::Storage(StorageError::DatabaseOpenFailed(format!(
                "{}: {}",
                config.data_directory, e
            )))
        })?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl KvBackend for OptimizedStorage {
    fn get(&self, key: &[u8]) -> CasinoResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> CasinoResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    fn write(&self, batch: StoreBatch) -> CasinoResult<()> {
        let mut rocks_batch = WriteBatch::default();
        for op in batch.ops {
            match op {
                WriteOp::Put(key, value) => rocks_batch.put(key, value),
                WriteOp::Delete(key) => rocks_batch.delete(key),
            }
        }
        self.db.write(rocks_batch)?;
        Ok(())
    }
}

/// Volatile backend with the same atomicity guarantees
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> CasinoError {
    CasinoError::Storage(StorageError::LockPoisoned("memory backend".to_string()))
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &[u8]) -> CasinoResult<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> CasinoResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write(&self, batch: StoreBatch) -> CasinoResult<()> {
        // Holding the write lock for the whole batch makes it atomic for readers
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        for op in batch.ops {
            match op {
                WriteOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                WriteOp::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
