//! In-memory snapshot store.
//!
//! The backend used when no data directory is configured: rooms survive
//! eviction and resurrection within one process, and nothing survives a
//! restart. Also the base for test doubles.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{SnapshotStore, StoreError};

/// Process-local snapshot store.
#[derive(Default)]
pub struct MemorySnapshotStore {
    rooms: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms with a stored snapshot.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    /// Whether a snapshot exists for the room.
    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, room_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.rooms.read().await.get(room_id).cloned())
    }

    async fn save(&self, room_id: &str, snapshot: &[u8]) -> Result<(), StoreError> {
        self.rooms
            .write()
            .await
            .insert(room_id.to_string(), snapshot.to_vec());
        Ok(())
    }
}
