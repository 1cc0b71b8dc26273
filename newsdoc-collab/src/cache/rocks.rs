//! RocksDB-backed cache store.
//!
//! Column families:
//! - `documents`  — cached replica envelopes (LZ4 compressed), keyed by cache key
//! - `touched`    — recency index, key = `<timestamp_ms:8 bytes BE><cache key>`
//! - `touch_keys` — cache key → last touch timestamp, so a re-touch replaces
//!   its old index entry
//!
//! The `touched` family iterates in timestamp order, which is what
//! [`RocksCacheStore::touched_between`] and
//! [`RocksCacheStore::prune_touched_before`] rely on.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};

use futures_util::future::{BoxFuture, FutureExt};

use super::{now_millis, CacheError, CacheStore};

const CF_DOCUMENTS: &str = "documents";
const CF_TOUCHED: &str = "touched";
const CF_TOUCH_KEYS: &str = "touch_keys";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_TOUCHED, CF_TOUCH_KEYS];

/// Cache database configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("newsdoc_cache"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    /// Small caches, caller-chosen directory.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// RocksDB-backed [`CacheStore`].
pub struct RocksCacheStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: CacheConfig,
}

impl RocksCacheStore {
    /// Open the cache at the configured path, creating it if missing.
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened document cache at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &CacheConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DOCUMENTS => {
                // Values are already LZ4 framed
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_TOUCH_KEYS => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_TOUCHED => {
                opts.set_compression_type(DBCompressionType::Lz4);
            }
            _ => {}
        }

        opts
    }

    // ─── Documents ────────────────────────────────────────────────────

    /// Load and decompress a cached value.
    pub fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map(Some)
                .map_err(|e| CacheError::Compression(e.to_string())),
            None => Ok(None),
        }
    }

    /// Compress and write a value.
    pub fn save(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let compressed = lz4_flex::compress_prepend_size(value);
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.put_cf_opt(&cf, key.as_bytes(), &compressed, &write_opts)?;
        Ok(())
    }

    /// Drop a cached value and its touch entries.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_touched = self.cf(CF_TOUCHED)?;
        let cf_keys = self.cf(CF_TOUCH_KEYS)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_docs, key.as_bytes());
        if let Some(previous) = self.last_touch(key)? {
            batch.delete_cf(&cf_touched, touched_key(previous, key));
            batch.delete_cf(&cf_keys, key.as_bytes());
        }
        self.db.write(batch)?;
        Ok(())
    }

    // ─── Touched index ────────────────────────────────────────────────

    /// Record a touch for `key` at `timestamp` (ms), replacing any earlier one.
    pub fn touch_at(&self, key: &str, timestamp: u64) -> Result<(), CacheError> {
        let cf_touched = self.cf(CF_TOUCHED)?;
        let cf_keys = self.cf(CF_TOUCH_KEYS)?;

        let mut batch = WriteBatch::default();
        if let Some(previous) = self.last_touch(key)? {
            batch.delete_cf(&cf_touched, touched_key(previous, key));
        }
        batch.put_cf(&cf_touched, touched_key(timestamp, key), b"");
        batch.put_cf(&cf_keys, key.as_bytes(), timestamp.to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    /// Touches with timestamps in `[from, to]`, oldest first.
    pub fn touched_between(&self, from: u64, to: u64) -> Result<Vec<(u64, String)>, CacheError> {
        let cf = self.cf(CF_TOUCHED)?;
        let start = from.to_be_bytes();
        let mut touched = Vec::new();

        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (raw, _) = item?;
            let Some((timestamp, key)) = split_touched_key(&raw) else {
                continue;
            };
            if timestamp > to {
                break;
            }
            touched.push((timestamp, key));
        }

        Ok(touched)
    }

    /// Remove every touch recorded before `cutoff`. Returns the count removed.
    pub fn prune_touched_before(&self, cutoff: u64) -> Result<u64, CacheError> {
        let cf_touched = self.cf(CF_TOUCHED)?;
        let cf_keys = self.cf(CF_TOUCH_KEYS)?;

        let mut batch = WriteBatch::default();
        let mut count = 0u64;
        for item in self.db.iterator_cf(&cf_touched, IteratorMode::Start) {
            let (raw, _) = item?;
            let Some((timestamp, key)) = split_touched_key(&raw) else {
                continue;
            };
            if timestamp >= cutoff {
                break;
            }
            batch.delete_cf(&cf_touched, &raw);
            batch.delete_cf(&cf_keys, key.as_bytes());
            count += 1;
        }

        if count > 0 {
            self.db.write(batch)?;
        }
        Ok(count)
    }

    fn last_touch(&self, key: &str) -> Result<Option<u64>, CacheError> {
        let cf = self.cf(CF_TOUCH_KEYS)?;
        Ok(self
            .db
            .get_cf(&cf, key.as_bytes())?
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
            .map(u64::from_be_bytes))
    }

    /// Force a flush of memtables to disk.
    pub fn sync(&self) -> Result<(), CacheError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, CacheError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CacheError::Database(format!("Column family '{name}' not found")))
    }
}

impl CacheStore for RocksCacheStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
        async move { self.load(key) }.boxed()
    }

    fn store<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<(), CacheError>> {
        async move { self.save(key, &value) }.boxed()
    }

    fn touch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        async move { self.touch_at(key, now_millis()) }.boxed()
    }
}

/// `<timestamp:8 bytes BE><key>`
fn touched_key(timestamp: u64, key: &str) -> Vec<u8> {
    let mut raw = Vec::with_capacity(8 + key.len());
    raw.extend_from_slice(&timestamp.to_be_bytes());
    raw.extend_from_slice(key.as_bytes());
    raw
}

fn split_touched_key(raw: &[u8]) -> Option<(u64, String)> {
    if raw.len() < 8 {
        return None;
    }
    let (ts, key) = raw.split_at(8);
    let timestamp = u64::from_be_bytes(<[u8; 8]>::try_from(ts).ok()?);
    Some((timestamp, String::from_utf8_lossy(key).into_owned()))
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
