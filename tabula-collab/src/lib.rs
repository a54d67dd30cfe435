//! # tabula-collab — room lifecycle for collaborative documents
//!
//! Hosts many concurrent rooms, each backed by one live document session,
//! with best-effort periodic persistence.
//!
//! ## Architecture
//!
//! ```text
//! WebSocket ──► Transport Adapter ──► Room Registry ──► Document Engine
//!   client          (transport)        (registry)        (tabula-engine)
//!                                          │
//!                                          ▼
//!                              Persistence Scheduler ──► Snapshot Store
//!                                   (scheduler)         (storage: rocks/mem)
//! ```
//!
//! A connect names `(room, participant)`; the registry answers with the
//! room's single live session, loading it from the snapshot store or creating
//! it fresh under a per-room single-flight lock. Session mutations mark the
//! room dirty; the scheduler flushes dirty rooms on a fixed interval and
//! evicts rooms whose session has closed. Nothing else ever removes a room.
//!
//! ## Modules
//!
//! - [`registry`] — single-flight get-or-create map of live rooms
//! - [`scheduler`] — periodic flush-and-evict sweep
//! - [`transport`] — WebSocket server and per-participant socket facade
//! - [`storage`] — snapshot store trait with RocksDB and in-memory backends
//! - [`config`] — environment-driven server configuration

pub mod config;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod transport;

// Re-exports for convenience
pub use config::ServerConfig;
pub use registry::{AcquireError, RoomRegistry, RoomSummary};
pub use scheduler::{PersistenceScheduler, SchedulerHandle, SchedulerStats, DEFAULT_FLUSH_INTERVAL};
pub use storage::{
    MemorySnapshotStore, RocksSnapshotStore, RoomMetadata, SnapshotStore, StoreConfig, StoreError,
};
pub use transport::{CollabServer, ServerStats};
