//! RocksDB-backed snapshot store.
//!
//! Column families:
//! - `snapshots` — full room snapshots (LZ4 compressed)
//! - `metadata`  — per-room bookkeeping (bincode: sizes, timestamps, flushes)
//!
//! Durability matches the scheduler's contract: one blob per room, replaced
//! wholesale on every flush. There is no per-edit log; data since the last
//! flush is lost on crash.

use async_trait::async_trait;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{SnapshotStore, StoreError};

const CF_SNAPSHOTS: &str = "snapshots";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_SNAPSHOTS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tabula_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Config for testing (small caches, caller-provided temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024,
        }
    }
}

/// Per-room bookkeeping stored alongside each snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMetadata {
    /// Uncompressed snapshot size in bytes
    pub snapshot_size: u64,
    /// Compressed snapshot size in bytes
    pub compressed_size: u64,
    /// Number of flushes ever written for this room
    pub flush_count: u64,
    /// First flush timestamp (seconds since epoch)
    pub created_at: u64,
    /// Last flush timestamp (seconds since epoch)
    pub updated_at: u64,
}

impl RoomMetadata {
    fn new() -> Self {
        let now = unix_now();
        Self {
            snapshot_size: 0,
            compressed_size: 0,
            flush_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// RocksDB-backed snapshot store.
pub struct RocksSnapshotStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksSnapshotStore {
    /// Open the store at the configured path, creating the database and
    /// column families as needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db, config })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        // Blobs are already LZ4-compressed before they reach RocksDB.
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);

        opts
    }

    /// Write a snapshot and its metadata atomically.
    pub fn put_snapshot(&self, room_id: &str, snapshot: &[u8]) -> Result<RoomMetadata, StoreError> {
        let cf_snaps = self.cf(CF_SNAPSHOTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(snapshot);

        let mut meta = self
            .room_metadata(room_id)?
            .unwrap_or_else(RoomMetadata::new);
        meta.snapshot_size = snapshot.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.flush_count += 1;
        meta.updated_at = unix_now();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_snaps, room_id.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, room_id.as_bytes(), &meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    /// Read a snapshot back, decompressed. `None` if the room was never saved.
    pub fn get_snapshot(&self, room_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        match self.db.get_cf(&cf, room_id.as_bytes())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map(Some)
                .map_err(|e| StoreError::CompressionError(e.to_string())),
            None => Ok(None),
        }
    }

    /// Load per-room metadata.
    pub fn room_metadata(&self, room_id: &str) -> Result<Option<RoomMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, room_id.as_bytes())? {
            Some(bytes) => RoomMetadata::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// List all room ids with a persisted snapshot.
    pub fn list_rooms(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut room_ids = Vec::new();

        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            room_ids.push(String::from_utf8_lossy(&key).into_owned());
        }

        Ok(room_ids)
    }

    /// Remove a room's snapshot and metadata.
    pub fn delete_room(&self, room_id: &str) -> Result<(), StoreError> {
        let cf_snaps = self.cf(CF_SNAPSHOTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_snaps, room_id.as_bytes());
        batch.delete_cf(&cf_meta, room_id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

#[async_trait]
impl SnapshotStore for RocksSnapshotStore {
    async fn load(&self, room_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_snapshot(room_id)
    }

    async fn save(&self, room_id: &str, snapshot: &[u8]) -> Result<(), StoreError> {
        self.put_snapshot(room_id, snapshot).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_open() {
        let dir = tempdir().unwrap();
        let store = RocksSnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksSnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        let data = b"a whiteboard snapshot with enough repetition repetition repetition to compress".to_vec();
        let meta = store.put_snapshot("demo", &data).unwrap();
        assert_eq!(meta.snapshot_size, data.len() as u64);
        assert_eq!(meta.flush_count, 1);

        let loaded = store.get_snapshot("demo").unwrap();
        assert_eq!(loaded, Some(data));
    }

    #[test]
    fn test_missing_room_is_none() {
        let dir = tempdir().unwrap();
        let store = RocksSnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        assert_eq!(store.get_snapshot("nope").unwrap(), None);
        assert!(store.room_metadata("nope").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_bumps_flush_count() {
        let dir = tempdir().unwrap();
        let store = RocksSnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        store.put_snapshot("demo", b"first").unwrap();
        let meta = store.put_snapshot("demo", b"second").unwrap();
        assert_eq!(meta.flush_count, 2);
        assert_eq!(store.get_snapshot("demo").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn test_list_rooms() {
        let dir = tempdir().unwrap();
        let store = RocksSnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        for id in ["alpha", "beta", "gamma"] {
            store.put_snapshot(id, b"data").unwrap();
        }

        let mut rooms = store.list_rooms().unwrap();
        rooms.sort();
        assert_eq!(rooms, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_delete_room() {
        let dir = tempdir().unwrap();
        let store = RocksSnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        store.put_snapshot("demo", b"data").unwrap();
        store.delete_room("demo").unwrap();
        assert_eq!(store.get_snapshot("demo").unwrap(), None);
        assert!(store.room_metadata("demo").unwrap().is_none());
    }

    #[test]
    fn test_reopen_preserves_snapshots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let store = RocksSnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();
            store.put_snapshot("demo", b"survives restart").unwrap();
        }

        let store = RocksSnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();
        assert_eq!(
            store.get_snapshot("demo").unwrap(),
            Some(b"survives restart".to_vec())
        );
    }

    #[test]
    fn test_compression_applied() {
        let dir = tempdir().unwrap();
        let store = RocksSnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        let data = vec![7u8; 100_000];
        let meta = store.put_snapshot("big", &data).unwrap();
        assert!(meta.compressed_size < meta.snapshot_size / 10);
        assert_eq!(store.get_snapshot("big").unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_trait_surface() {
        let dir = tempdir().unwrap();
        let store = RocksSnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        assert_eq!(store.load("demo").await.unwrap(), None);
        store.save("demo", b"via trait").await.unwrap();
        assert_eq!(store.load("demo").await.unwrap(), Some(b"via trait".to_vec()));
    }
}
