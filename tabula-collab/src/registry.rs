//! Room registry: the single source of truth for which rooms are loaded.
//!
//! `get_or_create` is callable from every connection handler at once and
//! guarantees that for any room id, at most one session is ever resident and
//! at most one load/construct is in flight. Creation is serialized per room —
//! callers for unrelated rooms never wait on each other.
//!
//! Entries are only ever *removed* by the persistence scheduler, after it
//! observes the session closed. A connect handler never evicts; it can only
//! replace a closed entry with a freshly constructed session, which keeps an
//! in-flight attach from racing a teardown.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use tabula_engine::{DocumentEngine, DocumentSession, EngineError, SessionHooks};

use crate::storage::{SnapshotStore, StoreError};

/// One resident room.
struct RoomEntry {
    /// Sole owning reference; transports only ever hold clones handed out
    /// by `get_or_create`.
    session: Arc<dyn DocumentSession>,
    /// Set by the session's mutation hook, cleared by the scheduler.
    dirty: Arc<AtomicBool>,
}

/// Observable state of one resident room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub is_closed: bool,
    pub dirty: bool,
    pub session_count: usize,
}

/// Why a room could not be acquired.
///
/// Either way no entry was inserted, so a later attempt starts clean.
#[derive(Debug)]
pub enum AcquireError {
    /// The snapshot store failed (anything other than "not found")
    Load(StoreError),
    /// The engine could not build a session from the loaded snapshot
    Construct(EngineError),
}

impl std::fmt::Display for AcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load(e) => write!(f, "Failed to load room snapshot: {e}"),
            Self::Construct(e) => write!(f, "Failed to construct session: {e}"),
        }
    }
}

impl std::error::Error for AcquireError {}

/// The get-or-create map from room id to live session.
pub struct RoomRegistry {
    engine: Arc<dyn DocumentEngine>,
    store: Arc<dyn SnapshotStore>,
    rooms: RwLock<HashMap<String, RoomEntry>>,
    /// Per-room serialization tokens for create/resume. Entries are pruned
    /// once the last interested caller releases them.
    creation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RoomRegistry {
    pub fn new(engine: Arc<dyn DocumentEngine>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            engine,
            store,
            rooms: RwLock::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return the room's live session, loading or creating it if necessary.
    ///
    /// Concurrent calls for the same room collapse into one load/construct;
    /// every caller gets the same session. On failure the registry is left
    /// exactly as it was, so a retry is possible.
    pub async fn get_or_create(
        &self,
        room_id: &str,
    ) -> Result<Arc<dyn DocumentSession>, AcquireError> {
        // Fast path: resident and open, no I/O.
        if let Some(session) = self.lookup_open(room_id).await {
            log::debug!("Using existing room: {room_id}");
            return Ok(session);
        }

        let lock = self.creation_lock(room_id).await;
        let result = {
            let _token = lock.lock().await;
            // A racer that won the token first may have created it already.
            match self.lookup_open(room_id).await {
                Some(session) => Ok(session),
                None => self.load_and_construct(room_id).await,
            }
        };
        self.release_creation_lock(room_id, &lock).await;
        result
    }

    /// Summaries of every resident room, sorted by id.
    pub async fn list(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.read().await;
        let mut summaries: Vec<RoomSummary> = rooms
            .iter()
            .map(|(id, entry)| RoomSummary {
                id: id.clone(),
                is_closed: entry.session.is_closed(),
                dirty: entry.dirty.load(Ordering::SeqCst),
                session_count: entry.session.session_count(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Number of resident rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn lookup_open(&self, room_id: &str) -> Option<Arc<dyn DocumentSession>> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .filter(|entry| !entry.session.is_closed())
            .map(|entry| entry.session.clone())
    }

    /// The slow path, run while holding the room's creation token.
    async fn load_and_construct(
        &self,
        room_id: &str,
    ) -> Result<Arc<dyn DocumentSession>, AcquireError> {
        log::info!("Creating/loading room: {room_id}");

        let initial = self
            .store
            .load(room_id)
            .await
            .map_err(AcquireError::Load)?;
        match &initial {
            Some(snapshot) => log::debug!("Resuming room {room_id} from {} bytes", snapshot.len()),
            None => log::debug!("No snapshot for room {room_id}; starting empty"),
        }

        let dirty = Arc::new(AtomicBool::new(false));
        let flag = dirty.clone();
        let hooks = SessionHooks {
            // The session decides nothing on disconnect; the room closes once
            // the session observes zero attached participants.
            on_participant_removed: Box::new(|session, remaining| {
                if remaining == 0 {
                    session.close();
                }
            }),
            on_mutation: Box::new(move || flag.store(true, Ordering::SeqCst)),
        };

        let session = self
            .engine
            .create(room_id, initial.as_deref(), hooks)
            .map_err(AcquireError::Construct)?;

        // Mutations observed while constructing (snapshot application) are
        // already persisted state; the entry starts clean.
        dirty.store(false, Ordering::SeqCst);

        let mut rooms = self.rooms.write().await;
        rooms.insert(
            room_id.to_string(),
            RoomEntry {
                session: session.clone(),
                dirty,
            },
        );
        drop(rooms);

        log::info!("Room created/loaded: {room_id}");
        Ok(session)
    }

    async fn creation_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.creation_locks.lock().await;
        locks
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_creation_lock(&self, room_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.creation_locks.lock().await;
        // Two refs left means the table and us: nobody else is waiting, so
        // the entry can go. Any concurrent caller holds a third ref.
        if let Some(current) = locks.get(room_id) {
            if Arc::ptr_eq(current, lock) && Arc::strong_count(lock) == 2 {
                locks.remove(room_id);
            }
        }
    }

    /// Scheduler access: every resident room with its dirty flag.
    pub(crate) async fn sweep_entries(
        &self,
    ) -> Vec<(String, Arc<dyn DocumentSession>, Arc<AtomicBool>)> {
        let rooms = self.rooms.read().await;
        rooms
            .iter()
            .map(|(id, entry)| (id.clone(), entry.session.clone(), entry.dirty.clone()))
            .collect()
    }

    /// Scheduler access: drop the entry if its *current* session is closed.
    ///
    /// Re-checked under the write lock so a room resurrected between the
    /// sweep's snapshot and this call is never evicted.
    pub(crate) async fn evict_if_closed(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(room_id)
            .is_some_and(|entry| entry.session.is_closed())
        {
            rooms.remove(room_id);
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub(crate) async fn creation_lock_count(&self) -> usize {
        self.creation_locks.lock().await.len()
    }
}
