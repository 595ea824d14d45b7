//! The Registry: volatile in-memory worker bookkeeping (spec.md §4.2).
//! Guarded by a single [`parking_lot::Mutex`] rather than `dashmap`, per
//! spec.md §5's concurrency model — the fleet is small enough (tens, not
//! thousands, of workers) that one lock held for a handful of map
//! operations is never a contention source, and a single lock makes the
//! "read-then-write" sequences in `heartbeat` and `reap_stale` trivially
//! race-free instead of needing a second layer of coordination on top.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use fleet_model::{WorkerCapabilities, WorkerRecord, WorkerStatus};
use parking_lot::Mutex;
use rand::Rng;

use crate::error::{Error, Result};

/// Default worker timeout if the operator doesn't override it (spec.md
/// §4.5 "Worker timeout"; `master_coordinator.py` used the same 30s
/// threshold).
pub const WORKER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct Registry {
    workers: Mutex<HashMap<String, WorkerRecord>>,
    timeout: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self { workers: Mutex::new(HashMap::new()), timeout: WORKER_TIMEOUT }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the default 30s staleness threshold, e.g. from
    /// `Config::worker_timeout_seconds`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { workers: Mutex::new(HashMap::new()), timeout }
    }

    /// Derives a worker id from `hostname` plus a short random nonce, so a
    /// restarted worker on the same host never collides with a still-live
    /// registration from before the restart (spec.md §9, superseding the
    /// original's sequential `worker-N` counter).
    pub fn register(&self, hostname: &str, capabilities: WorkerCapabilities, version: String) -> WorkerRecord {
        let nonce: u32 = rand::rng().random();
        let id = format!("{hostname}-{nonce:08x}");
        let record = WorkerRecord::new(id.clone(), hostname.to_string(), capabilities, version);
        self.workers.lock().insert(id, record.clone());
        record
    }

    /// Applies a heartbeat's reported status and vitals, bumping
    /// `last_seen`. Returns the previous status so the caller can detect a
    /// worker coming back from `offline` (spec.md §4.4 "Reconnection
    /// recovery").
    pub fn heartbeat(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        cpu_percent: Option<f64>,
        memory_percent: Option<f64>,
        speed: Option<f64>,
        eta: Option<i64>,
    ) -> Result<WorkerStatus> {
        let mut workers = self.workers.lock();
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| Error::UnknownWorker(worker_id.to_string()))?;
        let previous = worker.status;
        worker.status = status;
        worker.last_seen = Utc::now();
        worker.cpu_percent = cpu_percent;
        worker.memory_percent = memory_percent;
        worker.current_speed_fps = speed;
        worker.current_eta_seconds = eta;
        Ok(previous)
    }

    pub fn set_current_job(&self, worker_id: &str, file_id: Option<i64>, filename: Option<String>) -> Result<()> {
        let mut workers = self.workers.lock();
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| Error::UnknownWorker(worker_id.to_string()))?;
        worker.current_file_id = file_id;
        worker.current_filename = filename;
        worker.current_progress = None;
        if file_id.is_none() {
            worker.current_speed_fps = None;
            worker.current_eta_seconds = None;
        }
        Ok(())
    }

    pub fn record_completion(&self, worker_id: &str, bytes_processed: i64) {
        let mut workers = self.workers.lock();
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.jobs_completed += 1;
            worker.total_bytes_processed = worker.total_bytes_processed.saturating_add(bytes_processed.max(0) as u64);
        }
    }

    pub fn record_failure(&self, worker_id: &str) {
        let mut workers = self.workers.lock();
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.jobs_failed += 1;
        }
    }

    pub fn set_fade_out(&self, worker_id: &str, fade_out: bool) -> Result<()> {
        let mut workers = self.workers.lock();
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| Error::UnknownWorker(worker_id.to_string()))?;
        worker.fade_out = fade_out;
        Ok(())
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.workers.lock().get(worker_id).cloned()
    }

    pub fn is_fading_out(&self, worker_id: &str) -> bool {
        self.workers.lock().get(worker_id).map(|w| w.fade_out).unwrap_or(false)
    }

    pub fn list(&self) -> Vec<WorkerRecord> {
        let mut workers: Vec<_> = self.workers.lock().values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    pub fn remove(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.workers.lock().remove(worker_id)
    }

    /// Sweeps every worker whose `last_seen` is older than [`WORKER_TIMEOUT`]
    /// to `offline`, returning the ones just flipped so the caller (the
    /// Monitor) can reap their in-flight job. Workers already `offline` are
    /// left alone so they are only reported once.
    pub fn reap_stale(&self) -> Vec<WorkerRecord> {
        let now = Utc::now();
        let mut workers = self.workers.lock();
        let mut newly_offline = Vec::new();
        for worker in workers.values_mut() {
            if worker.status != WorkerStatus::Offline {
                let idle_for = now.signed_duration_since(worker.last_seen);
                if idle_for.to_std().unwrap_or_default() > self.timeout {
                    worker.status = WorkerStatus::Offline;
                    newly_offline.push(worker.clone());
                }
            }
        }
        newly_offline
    }
}
