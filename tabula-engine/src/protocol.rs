//! Binary wire protocol between clients and a document session.
//!
//! Every WebSocket frame is one bincode-encoded [`SyncMessage`]:
//! ```text
//! ┌──────────┬────────────────┬──────────┐
//! │ kind     │ participant_id │ payload  │
//! │ 1 byte   │ variable       │ variable │
//! └──────────┴────────────────┴──────────┘
//! ```
//!
//! The payload interpretation depends on `kind`: a Delta carries a document
//! update, a SyncRequest carries the client's state vector, Presence carries
//! an opaque blob that is fanned out unchanged.

use serde::{Deserialize, Serialize};

/// Message kinds for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Client state vector; the session answers with a SyncResponse diff
    SyncRequest = 1,
    /// State diff from the session's authoritative document
    SyncResponse = 2,
    /// Incremental document update
    Delta = 3,
    /// Ephemeral presence blob (cursors, selections), never persisted
    Presence = 4,
    /// A participant joined the room
    ParticipantJoined = 5,
    /// A participant left the room
    ParticipantLeft = 6,
}

/// Top-level protocol message.
///
/// `participant_id` names the originating participant; frames originated by
/// the session itself (sync responses) carry an empty id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub kind: MessageKind,
    pub participant_id: String,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    /// Create a delta update message.
    pub fn delta(participant_id: impl Into<String>, update: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Delta,
            participant_id: participant_id.into(),
            payload: update,
        }
    }

    /// Create a sync request carrying the client's state vector.
    pub fn sync_request(participant_id: impl Into<String>, state_vector: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::SyncRequest,
            participant_id: participant_id.into(),
            payload: state_vector,
        }
    }

    /// Create a sync response carrying a state diff.
    pub fn sync_response(state_diff: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::SyncResponse,
            participant_id: String::new(),
            payload: state_diff,
        }
    }

    /// Create a presence update message.
    pub fn presence(participant_id: impl Into<String>, blob: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Presence,
            participant_id: participant_id.into(),
            payload: blob,
        }
    }

    /// Create a participant joined notification.
    pub fn participant_joined(participant_id: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::ParticipantJoined,
            participant_id: participant_id.into(),
            payload: Vec::new(),
        }
    }

    /// Create a participant left notification.
    pub fn participant_left(participant_id: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::ParticipantLeft,
            participant_id: participant_id.into(),
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
