//! tabula-server — standalone collaboration server.
//!
//! Configuration comes from the environment (see [`ServerConfig::from_env`]);
//! logging honors `RUST_LOG`.

use log::info;
use std::sync::Arc;

use tabula_collab::config::ServerConfig;
use tabula_collab::registry::RoomRegistry;
use tabula_collab::scheduler::PersistenceScheduler;
use tabula_collab::storage::{MemorySnapshotStore, RocksSnapshotStore, SnapshotStore, StoreConfig};
use tabula_collab::transport::CollabServer;
use tabula_engine::CrdtEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from_env();

    let store: Arc<dyn SnapshotStore> = match &config.data_dir {
        Some(dir) => {
            info!("Persisting room snapshots under {}", dir.display());
            Arc::new(RocksSnapshotStore::open(StoreConfig {
                path: dir.clone(),
                ..StoreConfig::default()
            })?)
        }
        None => {
            info!("No data directory configured; snapshots are in-memory only");
            Arc::new(MemorySnapshotStore::new())
        }
    };

    let registry = Arc::new(RoomRegistry::new(Arc::new(CrdtEngine::new()), store.clone()));
    let scheduler = Arc::new(PersistenceScheduler::new(
        registry.clone(),
        store,
        config.flush_interval,
    ));
    let scheduler_handle = scheduler.spawn();

    let server = CollabServer::new(registry);
    tokio::select! {
        result = server.run(&config.bind_addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    // Flush whatever is still dirty before exiting.
    scheduler_handle.stop().await;
    Ok(())
}
