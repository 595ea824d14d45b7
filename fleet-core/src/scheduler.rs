//! The Scheduler (spec.md §4.3): thin glue between the Store's atomic claim
//! and the Registry's bookkeeping. Holds no state of its own.

use std::sync::Arc;

use fleet_model::{FileRecord, JobAssignment, WorkerStatus};

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::store::Store;

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    /// Claims the best pending file for `worker_id`, if any, and mirrors the
    /// assignment into the Registry so `/api/status` reflects it immediately
    /// without waiting for the worker's next heartbeat.
    pub async fn assign(&self, worker_id: &str) -> Result<Option<JobAssignment>> {
        let worker = self
            .registry
            .get(worker_id)
            .ok_or_else(|| Error::UnknownWorker(worker_id.to_string()))?;
        if worker.status == WorkerStatus::Offline || worker.fade_out {
            return Ok(None);
        }
        let Some(file) = self.store.pick_next_pending(worker_id).await? else {
            return Ok(None);
        };
        self.registry
            .set_current_job(worker_id, Some(file.id), Some(file.filename.clone()))?;
        Ok(Some(to_assignment(&file)))
    }
}

fn to_assignment(file: &FileRecord) -> JobAssignment {
    JobAssignment {
        file_id: file.id,
        path: file.path.clone(),
        filename: file.filename.clone(),
        size_bytes: file.size_bytes,
        source_codec: file.codec.clone(),
        source_resolution: file.resolution.clone(),
        source_bitdepth: file.bitdepth,
        source_hdr: file.hdr.clone(),
        source_hdr_dynamic: file.hdr_dynamic,
        source_audio_codec: file.audio_codec.clone(),
        source_audio_channels: file.audio_channels,
        target_crf: file.target_crf,
        target_opus_bitrate: file.target_opus_bitrate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use fleet_model::{DiscoveredFile, WorkerCapabilities};

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

    async fn scheduler_with_one_pending_file() -> (Scheduler, Arc<Registry>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::connect_memory().await.unwrap());
        store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        let registry = Arc::new(Registry::new());
        (Scheduler::new(store, registry.clone()), registry)
    }

    #[tokio::test]
    async fn assign_rejects_an_unregistered_worker() {
        let (scheduler, _registry) = scheduler_with_one_pending_file().await;
        let result = scheduler.assign("ghost").await;
        assert!(matches!(result, Err(Error::UnknownWorker(_))));
    }

    #[tokio::test]
    async fn assign_skips_an_offline_worker_without_claiming_the_row() {
        let (scheduler, registry) = scheduler_with_one_pending_file().await;
        let worker = registry.register("box1", caps(), "1.0".to_string());
        registry.heartbeat(&worker.id, WorkerStatus::Offline, None, None, None, None).unwrap();

        let assignment = scheduler.assign(&worker.id).await.unwrap();
        assert!(assignment.is_none());
    }

    #[tokio::test]
    async fn assign_skips_a_fading_out_worker() {
        let (scheduler, registry) = scheduler_with_one_pending_file().await;
        let worker = registry.register("box1", caps(), "1.0".to_string());
        registry.set_fade_out(&worker.id, true).unwrap();

        let assignment = scheduler.assign(&worker.id).await.unwrap();
        assert!(assignment.is_none());
    }

    #[tokio::test]
    async fn assign_claims_the_file_for_a_healthy_registered_worker() {
        let (scheduler, registry) = scheduler_with_one_pending_file().await;
        let worker = registry.register("box1", caps(), "1.0".to_string());

        let assignment = scheduler.assign(&worker.id).await.unwrap().unwrap();
        assert_eq!(assignment.path, "/movies/a.mkv");
        assert_eq!(registry.get(&worker.id).unwrap().current_file_id, Some(assignment.file_id));
    }
}
