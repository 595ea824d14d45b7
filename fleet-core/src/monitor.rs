//! The Monitor (spec.md §4.5): a periodic background loop grounded on
//! `master_coordinator.py`'s `_monitor_loop`/`_check_worker_health`, ported
//! from a 5-second `threading.Timer` to a `tokio::time::interval` task.

use std::sync::Arc;
use std::time::Duration;

use fleet_model::WorkerStatus;
use tracing::{info, warn};

use crate::error::Result;
use crate::events::{EventBus, FleetEvent};
use crate::registry::Registry;
use crate::store::Store;

/// How often the monitor wakes up to check for stale workers
/// (`master_coordinator.py` used the same 5s period).
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

pub struct Monitor {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    events: Arc<EventBus>,
}

impl Monitor {
    pub fn new(store: Arc<dyn Store>, registry: Arc<Registry>, events: Arc<EventBus>) -> Self {
        Self { store, registry, events }
    }

    /// Runs until `shutdown` resolves. Intended to be spawned as its own
    /// task and joined during graceful shutdown (spec.md §9).
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "monitor tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let newly_offline = self.registry.reap_stale();
        for worker in &newly_offline {
            warn!(worker_id = %worker.id, "worker timed out, marking offline");
            self.events.publish(FleetEvent::WorkerOffline { worker_id: worker.id.clone() });
            self.reap_orphaned_job(&worker.id).await?;
        }
        self.reap_unowned_jobs().await?;
        Ok(())
    }

    /// Pass 1, "Worker timeout" (spec.md §4.5): a worker that goes offline
    /// mid-job leaves its `FileRecord` stuck in `processing` forever unless
    /// something resets it. Fails the row the moment the timeout fires, so
    /// the worker's own recovery path (if it comes back) simply finds
    /// nothing to resume.
    async fn reap_orphaned_job(&self, worker_id: &str) -> Result<()> {
        for file in self.store.list_processing().await? {
            if file.assigned_worker_id.as_deref() == Some(worker_id) {
                self.store.mark_failed(file.id, "Worker disconnected").await?;
                if let Some(updated) = self.store.get(file.id).await? {
                    self.events.publish(FleetEvent::FileUpdated { file: updated });
                }
            }
        }
        Ok(())
    }

    /// Pass 2, "Orphan reap" (spec.md §4.5): independent of pass 1's
    /// newly-offline sweep, every `processing` row must have a live,
    /// non-offline worker behind it. Catches rows left `processing` by a
    /// worker that's simply absent from the Registry — e.g. a master
    /// restart repopulates an empty Registry while the durable Store still
    /// has `processing` rows from before the restart, so no worker ever
    /// transitions to "newly offline" to trigger [`Self::reap_orphaned_job`].
    async fn reap_unowned_jobs(&self) -> Result<()> {
        for file in self.store.list_processing().await? {
            let has_active_worker = file
                .assigned_worker_id
                .as_deref()
                .and_then(|id| self.registry.get(id))
                .map(|worker| worker.status != WorkerStatus::Offline)
                .unwrap_or(false);
            if !has_active_worker {
                self.store.mark_failed(file.id, "No active worker assigned").await?;
                if let Some(updated) = self.store.get(file.id).await? {
                    self.events.publish(FleetEvent::FileUpdated { file: updated });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use fleet_model::{DiscoveredFile, WorkerCapabilities, Status};

    fn caps() -> WorkerCapabilities {
        WorkerCapabilities { cpu_count: 4, memory_total: 16_000_000_000, has_gpu: false }
    }

    fn sample(path: &str) -> DiscoveredFile {
        DiscoveredFile {
            path: path.to_string(),
            directory: "/movies".to_string(),
            filename: path.rsplit('/').next().unwrap().to_string(),
            size_bytes: 1_000_000,
            codec: None,
            bitrate: None,
            resolution: None,
            bitdepth: None,
            hdr: None,
            hdr_dynamic: false,
            color_transfer: None,
            color_space: None,
            audio_codec: None,
            audio_channels: None,
            audio_bitrate: None,
            target_crf: None,
            target_opus_bitrate: None,
        }
    }

    #[tokio::test]
    async fn pass_one_fails_the_job_of_a_worker_that_times_out() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::connect_memory().await.unwrap());
        let registry = Arc::new(Registry::with_timeout(Duration::from_secs(0)));
        let events = Arc::new(EventBus::new());
        let monitor = Monitor::new(store.clone(), registry.clone(), events);

        let file = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        let worker = registry.register("box1", caps(), "1.0".to_string());
        store.pick_next_pending(&worker.id).await.unwrap();

        monitor.tick().await.unwrap();

        let record = store.get(file.id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Failed);
        assert_eq!(record.error_message.as_deref(), Some("Worker disconnected"));
    }

    #[tokio::test]
    async fn pass_two_reaps_a_processing_row_with_no_registry_entry() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::connect_memory().await.unwrap());
        let registry = Arc::new(Registry::new());
        let events = Arc::new(EventBus::new());
        let monitor = Monitor::new(store.clone(), registry, events);

        // Simulates a master restart: the durable Store still has a
        // `processing` row from before, but the fresh in-memory Registry
        // has never heard of its worker.
        let file = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        store.pick_next_pending("ghost-worker").await.unwrap();

        monitor.tick().await.unwrap();

        let record = store.get(file.id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Failed);
        assert_eq!(record.error_message.as_deref(), Some("No active worker assigned"));
    }

    #[tokio::test]
    async fn pass_two_leaves_a_row_owned_by_a_live_worker_alone() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::connect_memory().await.unwrap());
        let registry = Arc::new(Registry::new());
        let events = Arc::new(EventBus::new());
        let monitor = Monitor::new(store.clone(), registry.clone(), events);

        let file = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        let worker = registry.register("box1", caps(), "1.0".to_string());
        store.pick_next_pending(&worker.id).await.unwrap();

        monitor.tick().await.unwrap();

        let record = store.get(file.id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Processing);
    }
}
