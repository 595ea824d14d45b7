use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worker::WorkerCapabilities;

/// `POST /api/worker/register` body (spec.md §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub hostname: String,
    pub capabilities: WorkerCapabilities,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: String,
}

/// The `current_job` block a worker attaches to a heartbeat so the master
/// can recover a job it had marked failed while the worker was unreachable
/// (spec.md §4.4 "Reconnection recovery (on heartbeat)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerJobSnapshot {
    pub file_id: i64,
    pub file_path: String,
    pub file_size: i64,
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    pub is_completed: bool,
}

/// `POST /api/worker/{wid}/heartbeat` body. Unknown fields are ignored by
/// `serde` for forward compatibility (spec.md §9 "Dynamic-typed progress
/// payloads").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub status: String,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub current_speed: Option<f64>,
    pub current_eta: Option<i64>,
    #[serde(default)]
    pub current_job: Option<WorkerJobSnapshot>,
}

/// What the scheduler hands back to a worker that successfully claimed a
/// job (spec.md §4.3). Includes the already-computed target settings so the
/// worker does not need to re-probe for CRF/Opus-bitrate, though it may
/// still re-probe locally for safety.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAssignment {
    pub file_id: i64,
    pub path: String,
    pub filename: String,
    pub size_bytes: i64,
    pub source_codec: Option<String>,
    pub source_resolution: Option<String>,
    pub source_bitdepth: Option<i64>,
    pub source_hdr: Option<String>,
    pub source_hdr_dynamic: bool,
    pub source_audio_codec: Option<String>,
    pub source_audio_channels: Option<i64>,
    pub target_crf: Option<i64>,
    pub target_opus_bitrate: Option<i64>,
}

/// `POST /api/worker/{wid}/job/{fid}/progress` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRequest {
    pub percent: f64,
    pub speed: Option<f64>,
    pub eta: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `POST /api/worker/{wid}/job/{fid}/complete` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub output_size: i64,
    pub original_size: i64,
}

/// `POST /api/worker/{wid}/job/{fid}/failed` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailRequest {
    pub error: String,
}

/// `POST /api/file/{fid}/result` response body, once the upload has been
/// accepted and the safe replacement performed (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub original_size: i64,
    pub new_size: i64,
    pub savings_percent: f64,
}
