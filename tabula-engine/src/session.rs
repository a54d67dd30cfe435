//! Session and engine traits driven by the room lifecycle layer.
//!
//! The lifecycle layer never looks inside a document: it instantiates a
//! session through [`DocumentEngine::create`], attaches participant sockets,
//! forwards opaque payloads, and reads back `session_count`/`is_closed`/
//! `snapshot`. Everything document-shaped lives behind these traits.

use std::sync::Arc;

/// Outbound half of one participant's connection, as seen by a session.
///
/// Both methods are fire-and-forget: `send` must be a no-op once the
/// underlying connection is gone, and `close` must swallow errors from an
/// already-broken transport. A session never learns about transport faults
/// through this interface.
pub trait ParticipantSocket: Send + Sync {
    fn send(&self, payload: &[u8]);
    fn close(&self, code: u16, reason: &str);
}

/// Callbacks a session invokes as it runs, wired in at construction time.
pub struct SessionHooks {
    /// Invoked after a participant has been removed, with the session itself
    /// and the number of participants remaining. Closing the session when the
    /// count reaches zero is the installer's decision, not the session's.
    pub on_participant_removed: Box<dyn Fn(&dyn DocumentSession, usize) + Send + Sync>,
    /// Invoked after any document mutation. Must be cheap and idempotent;
    /// sessions may call it once per applied update.
    pub on_mutation: Box<dyn Fn() + Send + Sync>,
}

impl SessionHooks {
    /// Hooks that do nothing. Useful for tests and standalone sessions.
    pub fn noop() -> Self {
        Self {
            on_participant_removed: Box::new(|_, _| {}),
            on_mutation: Box::new(|| {}),
        }
    }
}

/// A live, in-memory instance of one room's document.
///
/// Sessions are shared-read by many connection handlers at once; every
/// method takes `&self` and is safe to call concurrently.
pub trait DocumentSession: Send + Sync {
    /// Attach a participant and hand the session its outbound socket.
    fn handle_connect(&self, participant_id: &str, socket: Box<dyn ParticipantSocket>);

    /// Feed one inbound payload from the named participant.
    fn handle_message(&self, participant_id: &str, payload: &[u8]);

    /// The named participant's connection went away (close or error).
    fn handle_disconnect(&self, participant_id: &str);

    /// Whether the session has been closed. A closed session never reopens.
    fn is_closed(&self) -> bool;

    /// Number of currently attached participants.
    fn session_count(&self) -> usize;

    /// Encode the full current document state as an opaque snapshot.
    fn snapshot(&self) -> Vec<u8>;

    /// Close the session, detaching any remaining participants.
    fn close(&self);
}

/// Factory for document sessions.
pub trait DocumentEngine: Send + Sync {
    /// Construct a live session, optionally resuming from a persisted
    /// snapshot. A snapshot that cannot be decoded is an error, never a
    /// silently-empty document.
    fn create(
        &self,
        room_id: &str,
        initial_snapshot: Option<&[u8]>,
        hooks: SessionHooks,
    ) -> Result<Arc<dyn DocumentSession>, EngineError>;
}

/// Session construction errors.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// The persisted snapshot could not be decoded
    CorruptSnapshot(String),
    /// The session could not be initialized from a decoded snapshot
    ConstructionFailed(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptSnapshot(e) => write!(f, "Corrupt snapshot: {e}"),
            Self::ConstructionFailed(e) => write!(f, "Session construction failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
