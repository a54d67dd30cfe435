//! Persistence scheduler: the periodic sweep that flushes dirty rooms and
//! evicts closed ones.
//!
//! Each tick walks every resident room. The dirty flag is cleared *before*
//! the snapshot is taken and written: a mutation that lands while the write
//! is in flight re-sets the flag, so the next tick flushes again. The flush
//! may write one extra time; it never loses a mutation.
//!
//! Eviction happens here and only here, one sweep interval at most after a
//! session closed. A write failure leaves the flag set and is retried on
//! every following tick until it succeeds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::RoomRegistry;
use crate::storage::SnapshotStore;

/// Default sweep interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(2000);

/// Scheduler counters.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub flushed_snapshots: u64,
    pub flush_failures: u64,
    pub evicted_rooms: u64,
}

#[derive(Default)]
struct AtomicSchedulerStats {
    flushed: AtomicU64,
    failures: AtomicU64,
    evicted: AtomicU64,
}

/// The periodic flush-and-evict sweep.
pub struct PersistenceScheduler {
    registry: Arc<RoomRegistry>,
    store: Arc<dyn SnapshotStore>,
    interval: Duration,
    stats: AtomicSchedulerStats,
}

impl PersistenceScheduler {
    pub fn new(
        registry: Arc<RoomRegistry>,
        store: Arc<dyn SnapshotStore>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            interval,
            stats: AtomicSchedulerStats::default(),
        }
    }

    /// Run one full sweep: flush every dirty room, evict every closed one.
    ///
    /// Total by construction — one room's failure never reaches the next
    /// room's flush.
    pub async fn tick(&self) {
        for (room_id, session, dirty) in self.registry.sweep_entries().await {
            if dirty.swap(false, Ordering::SeqCst) {
                log::debug!("Saving snapshot for room: {room_id}");
                let snapshot = session.snapshot();
                match self.store.save(&room_id, &snapshot).await {
                    Ok(()) => {
                        self.stats.flushed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        log::error!("Failed to save snapshot for room {room_id}: {e}");
                        // Leave the room flagged so the next tick retries.
                        dirty.store(true, Ordering::SeqCst);
                        self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            if session.is_closed() && self.registry.evict_if_closed(&room_id).await {
                log::info!("Room {room_id} removed (closed)");
                self.stats.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            flushed_snapshots: self.stats.flushed.load(Ordering::Relaxed),
            flush_failures: self.stats.failures.load(Ordering::Relaxed),
            evicted_rooms: self.stats.evicted.load(Ordering::Relaxed),
        }
    }

    /// Start the sweep loop. Runs until [`SchedulerHandle::stop`] is called.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let shutdown = Arc::new(Notify::new());
        let notified = shutdown.clone();
        let scheduler = self;

        log::info!(
            "Persistence scheduler running every {}ms",
            scheduler.interval.as_millis()
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first interval tick fires immediately; skip it so the first
            // sweep happens one full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.tick().await,
                    _ = notified.notified() => break,
                }
            }

            // Best-effort final sweep so an orderly shutdown writes whatever
            // is still dirty.
            scheduler.tick().await;
            log::info!("Persistence scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for its final flush sweep to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RoomRegistry;
    use crate::storage::MemorySnapshotStore;
    use tabula_engine::CrdtEngine;

    fn setup() -> (Arc<RoomRegistry>, Arc<MemorySnapshotStore>, PersistenceScheduler) {
        let store = Arc::new(MemorySnapshotStore::new());
        let registry = Arc::new(RoomRegistry::new(
            Arc::new(CrdtEngine::new()),
            store.clone(),
        ));
        let scheduler =
            PersistenceScheduler::new(registry.clone(), store.clone(), DEFAULT_FLUSH_INTERVAL);
        (registry, store, scheduler)
    }

    #[tokio::test]
    async fn test_tick_flushes_dirty_rooms_once() {
        let (registry, store, scheduler) = setup();
        registry.get_or_create("demo").await.unwrap();

        let (_, _, dirty) = registry.sweep_entries().await.pop().unwrap();
        dirty.store(true, Ordering::SeqCst);

        scheduler.tick().await;
        assert!(store.contains("demo").await);
        assert!(!dirty.load(Ordering::SeqCst));
        assert_eq!(scheduler.stats().flushed_snapshots, 1);

        // Clean room: no second write.
        scheduler.tick().await;
        assert_eq!(scheduler.stats().flushed_snapshots, 1);
    }

    #[tokio::test]
    async fn test_tick_evicts_closed_rooms() {
        let (registry, _, scheduler) = setup();
        let session = registry.get_or_create("demo").await.unwrap();

        scheduler.tick().await;
        assert_eq!(registry.room_count().await, 1);

        session.close();
        scheduler.tick().await;
        assert_eq!(registry.room_count().await, 0);
        assert_eq!(scheduler.stats().evicted_rooms, 1);
    }

    #[tokio::test]
    async fn test_closed_dirty_room_flushed_before_eviction() {
        let (registry, store, scheduler) = setup();
        let session = registry.get_or_create("demo").await.unwrap();

        let (_, _, dirty) = registry.sweep_entries().await.pop().unwrap();
        dirty.store(true, Ordering::SeqCst);
        session.close();

        scheduler.tick().await;
        assert!(store.contains("demo").await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_spawned_loop_flushes_and_stops() {
        let store = Arc::new(MemorySnapshotStore::new());
        let registry = Arc::new(RoomRegistry::new(
            Arc::new(CrdtEngine::new()),
            store.clone(),
        ));
        let scheduler = Arc::new(PersistenceScheduler::new(
            registry.clone(),
            store.clone(),
            Duration::from_millis(20),
        ));

        registry.get_or_create("demo").await.unwrap();
        let (_, _, dirty) = registry.sweep_entries().await.pop().unwrap();
        dirty.store(true, Ordering::SeqCst);

        let handle = scheduler.clone().spawn();
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.stop().await;

        assert!(store.contains("demo").await);
        assert!(scheduler.stats().flushed_snapshots >= 1);
    }

    #[tokio::test]
    async fn test_stop_runs_final_flush() {
        let store = Arc::new(MemorySnapshotStore::new());
        let registry = Arc::new(RoomRegistry::new(
            Arc::new(CrdtEngine::new()),
            store.clone(),
        ));
        // Interval far beyond the test's lifetime: only stop() can flush.
        let scheduler = Arc::new(PersistenceScheduler::new(
            registry.clone(),
            store.clone(),
            Duration::from_secs(3600),
        ));

        registry.get_or_create("demo").await.unwrap();
        let (_, _, dirty) = registry.sweep_entries().await.pop().unwrap();
        dirty.store(true, Ordering::SeqCst);

        let handle = scheduler.clone().spawn();
        handle.stop().await;

        assert!(store.contains("demo").await);
    }
}
