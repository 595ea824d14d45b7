use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker lifecycle phase (spec.md §3 "WorkerRecord (in-memory)" and §4.7
/// "Job lifecycle phases"). Reported by the worker itself in its heartbeat
/// `status` field and mirrored here for the Registry and the UI/event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Downloading,
    Processing,
    Uploading,
    Offline,
}

impl WorkerStatus {
    pub fn is_active(&self) -> bool {
        !matches!(self, WorkerStatus::Offline)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    pub cpu_count: u32,
    pub memory_total: u64,
    pub has_gpu: bool,
}

/// In-memory worker record, owned exclusively by the Registry (spec.md §3
/// "Ownership"). Never persisted — a master restart empties the fleet and
/// workers re-register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub hostname: String,
    pub capabilities: WorkerCapabilities,
    pub version: String,
    pub status: WorkerStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    pub current_file_id: Option<i64>,
    pub current_filename: Option<String>,
    pub current_progress: Option<f64>,
    pub current_speed_fps: Option<f64>,
    pub current_eta_seconds: Option<i64>,

    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,

    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub total_bytes_processed: u64,

    /// If true, the scheduler will not hand this worker new jobs but lets
    /// its current one finish (spec.md GLOSSARY "Fade-out").
    pub fade_out: bool,
}

impl WorkerRecord {
    pub fn new(id: String, hostname: String, capabilities: WorkerCapabilities, version: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            hostname,
            capabilities,
            version,
            status: WorkerStatus::Idle,
            registered_at: now,
            last_seen: now,
            current_file_id: None,
            current_filename: None,
            current_progress: None,
            current_speed_fps: None,
            current_eta_seconds: None,
            cpu_percent: None,
            memory_percent: None,
            jobs_completed: 0,
            jobs_failed: 0,
            total_bytes_processed: 0,
            fade_out: false,
        }
    }
}
