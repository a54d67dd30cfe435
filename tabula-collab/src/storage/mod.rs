//! Snapshot persistence for rooms.
//!
//! The lifecycle layer sees snapshots as opaque byte blobs keyed by room id:
//! absence is a normal answer (a room that has never been flushed), any other
//! failure is an error the caller decides how to surface. Two backends:
//!
//! - [`RocksSnapshotStore`] — durable, RocksDB with LZ4-compressed blobs
//! - [`MemorySnapshotStore`] — process-local, for data-dir-less deployments
//!   and tests

pub mod memory;
pub mod rocks;

pub use memory::MemorySnapshotStore;
pub use rocks::{RocksSnapshotStore, RoomMetadata, StoreConfig};

use async_trait::async_trait;

/// Durable storage for room snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the last persisted snapshot for a room. `Ok(None)` means the room
    /// has never been persisted — a new room, not an error.
    async fn load(&self, room_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Persist a snapshot, replacing any previous one for the room.
    async fn save(&self, room_id: &str, snapshot: &[u8]) -> Result<(), StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Backend failure (database unreachable, I/O error)
    DatabaseError(String),
    /// Stored blob failed to decompress
    CompressionError(String),
    /// Metadata failed to encode
    SerializationError(String),
    /// Metadata failed to decode
    DeserializationError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
