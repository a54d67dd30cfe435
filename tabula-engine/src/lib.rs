//! # tabula-engine — document session machinery for Tabula
//!
//! The room lifecycle layer (`tabula-collab`) treats documents as opaque: it
//! creates sessions, attaches participants, forwards payloads, and asks for
//! snapshots. This crate supplies that surface:
//!
//! - [`session`] — the [`DocumentEngine`]/[`DocumentSession`] traits, the
//!   [`ParticipantSocket`] facade a transport hands to a session, and the
//!   [`SessionHooks`] wired in at construction time
//! - [`protocol`] — the binary wire protocol (bincode-encoded [`SyncMessage`])
//! - [`crdt`] — the concrete CRDT-backed engine built on `yrs`
//!
//! ```text
//! Transport ──attach──► DocumentSession ◄──create── DocumentEngine
//!     │                      │    │
//!     └──ParticipantSocket◄──┘    └──hooks──► registry (dirty / close)
//! ```

pub mod crdt;
pub mod protocol;
pub mod session;

pub use crdt::{CrdtEngine, CrdtSession};
pub use protocol::{MessageKind, ProtocolError, SyncMessage};
pub use session::{DocumentEngine, DocumentSession, EngineError, ParticipantSocket, SessionHooks};
