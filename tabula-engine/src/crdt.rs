//! CRDT-backed document engine.
//!
//! Each session owns an authoritative `yrs::Doc`. Inbound deltas are applied
//! to the doc and fanned out to every other participant; sync requests are
//! answered with a state diff against the client's state vector; presence
//! blobs are relayed without touching the document.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::protocol::{MessageKind, SyncMessage};
use crate::session::{
    DocumentEngine, DocumentSession, EngineError, ParticipantSocket, SessionHooks,
};

/// Close code sent when a second connection reuses a participant id.
const CLOSE_SUPERSEDED: u16 = 1000;
/// Close code sent to participants still attached when a session closes.
const CLOSE_ROOM_CLOSED: u16 = 1000;

/// Engine producing [`CrdtSession`] instances.
pub struct CrdtEngine;

impl CrdtEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CrdtEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentEngine for CrdtEngine {
    fn create(
        &self,
        room_id: &str,
        initial_snapshot: Option<&[u8]>,
        hooks: SessionHooks,
    ) -> Result<Arc<dyn DocumentSession>, EngineError> {
        let doc = Doc::new();

        if let Some(bytes) = initial_snapshot {
            let update =
                Update::decode_v1(bytes).map_err(|e| EngineError::CorruptSnapshot(e.to_string()))?;
            let mut txn = doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| EngineError::ConstructionFailed(e.to_string()))?;
        }

        log::debug!("Constructed session for room {room_id}");

        Ok(Arc::new(CrdtSession {
            room_id: room_id.to_string(),
            state: Mutex::new(SessionState {
                doc,
                participants: HashMap::new(),
                closed: false,
            }),
            hooks,
        }))
    }
}

struct SessionState {
    doc: Doc,
    participants: HashMap<String, Box<dyn ParticipantSocket>>,
    closed: bool,
}

impl SessionState {
    /// Send an encoded frame to every participant except `exclude`.
    fn fan_out(&self, frame: &SyncMessage, exclude: &str) {
        let encoded = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Failed to encode outbound frame: {e}");
                return;
            }
        };
        for (id, socket) in &self.participants {
            if id != exclude {
                socket.send(&encoded);
            }
        }
    }
}

/// A live collaborative document session.
pub struct CrdtSession {
    room_id: String,
    state: Mutex<SessionState>,
    hooks: SessionHooks,
}

impl CrdtSession {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DocumentSession for CrdtSession {
    fn handle_connect(&self, participant_id: &str, socket: Box<dyn ParticipantSocket>) {
        let mut state = self.lock();
        if state.closed {
            socket.close(CLOSE_ROOM_CLOSED, "room closed");
            return;
        }

        // Initial sync: the full document state as one response frame.
        let full_state = {
            let txn = state.doc.transact();
            txn.encode_state_as_update_v1(&StateVector::default())
        };
        match SyncMessage::sync_response(full_state).encode() {
            Ok(bytes) => socket.send(&bytes),
            Err(e) => log::error!("Failed to encode initial sync for {participant_id}: {e}"),
        }

        state.fan_out(&SyncMessage::participant_joined(participant_id), participant_id);

        if let Some(old) = state.participants.insert(participant_id.to_string(), socket) {
            old.close(CLOSE_SUPERSEDED, "superseded by a newer connection");
        }
        let count = state.participants.len();
        drop(state);

        log::info!(
            "Participant {participant_id} joined room {} ({count} attached)",
            self.room_id
        );
    }

    fn handle_message(&self, participant_id: &str, payload: &[u8]) {
        let msg = match SyncMessage::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!(
                    "Undecodable frame from {participant_id} in room {}: {e}",
                    self.room_id
                );
                return;
            }
        };

        match msg.kind {
            MessageKind::Delta => {
                let state = self.lock();
                if state.closed {
                    return;
                }
                let update = match Update::decode_v1(&msg.payload) {
                    Ok(update) => update,
                    Err(e) => {
                        log::warn!("Bad delta from {participant_id}: {e}");
                        return;
                    }
                };
                {
                    let mut txn = state.doc.transact_mut();
                    if let Err(e) = txn.apply_update(update) {
                        log::warn!("Delta from {participant_id} failed to apply: {e}");
                        return;
                    }
                }
                // Re-tag with the connection's participant id so a client
                // cannot speak for another.
                state.fan_out(&SyncMessage::delta(participant_id, msg.payload), participant_id);
                drop(state);
                (self.hooks.on_mutation)();
            }

            MessageKind::SyncRequest => {
                let state = self.lock();
                if state.closed {
                    return;
                }
                let remote_sv = match StateVector::decode_v1(&msg.payload) {
                    Ok(sv) => sv,
                    Err(e) => {
                        log::warn!("Bad state vector from {participant_id}: {e}");
                        return;
                    }
                };
                let diff = {
                    let txn = state.doc.transact();
                    txn.encode_diff_v1(&remote_sv)
                };
                if let Some(socket) = state.participants.get(participant_id) {
                    match SyncMessage::sync_response(diff).encode() {
                        Ok(bytes) => socket.send(&bytes),
                        Err(e) => log::error!("Failed to encode sync response: {e}"),
                    }
                }
            }

            MessageKind::Presence => {
                let state = self.lock();
                if state.closed {
                    return;
                }
                state.fan_out(
                    &SyncMessage::presence(participant_id, msg.payload),
                    participant_id,
                );
            }

            other => {
                log::debug!("Ignoring client frame of kind {other:?} from {participant_id}");
            }
        }
    }

    fn handle_disconnect(&self, participant_id: &str) {
        let mut state = self.lock();
        if state.participants.remove(participant_id).is_none() {
            return;
        }
        let remaining = state.participants.len();
        state.fan_out(&SyncMessage::participant_left(participant_id), participant_id);
        drop(state);

        log::info!(
            "Participant {participant_id} left room {} ({remaining} remaining)",
            self.room_id
        );
        (self.hooks.on_participant_removed)(self, remaining);
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn session_count(&self) -> usize {
        self.lock().participants.len()
    }

    fn snapshot(&self) -> Vec<u8> {
        let state = self.lock();
        let txn = state.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        for (_, socket) in state.participants.drain() {
            socket.close(CLOSE_ROOM_CLOSED, "room closed");
        }
        drop(state);

        log::info!("Session closed for room {}", self.room_id);
    }
}
