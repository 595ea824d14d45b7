//! `/api/worker/*` — registration, heartbeat, job assignment, and job
//! result reporting (spec.md §6.1). Grounded on `worker_client.py`'s
//! request shapes and `master_coordinator.py`'s handling of them.

use axum::Json;
use axum::extract::{Path, State};
use chrono::{Duration as ChronoDuration, Utc};
use fleet_model::{
    CompleteRequest, FailRequest, HeartbeatRequest, JobAssignment, ProgressRequest, RegisterRequest,
    RegisterResponse, Status, WorkerJobSnapshot, WorkerStatus,
};
use tracing::{info, warn};

use fleet_core::Store;
use fleet_core::events::FleetEvent;

use crate::errors::AppError;
use crate::state::AppState;

/// A job claim older than this many days is only trusted back if the worker
/// has barely made progress on it (spec.md §4.4 "Reconnection recovery"
/// staleness bound) — otherwise a worker that's been silently chewing on a
/// stale claim for a month gets told to abandon it rather than resurrect
/// whatever the rest of the fleet did with that file in the meantime.
const STALE_CLAIM_AGE_DAYS: i64 = 30;
const STALE_CLAIM_PROGRESS_FLOOR: f64 = 10.0;

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let worker = state.registry.register(&body.hostname, body.capabilities, body.version);
    info!(worker_id = %worker.id, hostname = %body.hostname, "worker registered");
    state.events.publish(FleetEvent::WorkerUpdated { worker: worker.clone() });
    Ok(Json(RegisterResponse { worker_id: worker.id }))
}

fn parse_status(raw: &str) -> WorkerStatus {
    match raw {
        "downloading" => WorkerStatus::Downloading,
        "processing" => WorkerStatus::Processing,
        "uploading" => WorkerStatus::Uploading,
        "offline" => WorkerStatus::Offline,
        _ => WorkerStatus::Idle,
    }
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = parse_status(&body.status);
    let previous = state.registry.heartbeat(
        &worker_id,
        status,
        body.cpu_percent,
        body.memory_percent,
        body.current_speed,
        body.current_eta,
    )?;

    if previous == WorkerStatus::Offline {
        warn!(worker_id = %worker_id, "worker reconnected after being marked offline");
    }

    // Reconnection recovery (spec.md §4.4): a worker that went quiet long
    // enough for the monitor to fail its job, or that simply never got its
    // job-request response acknowledged, reports `current_job` on every
    // heartbeat while a job is in flight. Put the row back under this
    // worker's custody (or finalize it outright) rather than discarding work
    // already done.
    if let Some(job) = &body.current_job {
        recover_job(&state, &worker_id, job).await?;
    }

    if let Some(worker) = state.registry.get(&worker_id) {
        state.events.publish(FleetEvent::WorkerUpdated { worker });
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Implements spec.md §4.4's 4-step reconnection-recovery algorithm: the
/// worker in `heartbeat` above has already cleared step 1 (a known
/// `worker_id`, or this handler would never have been reached).
async fn recover_job(state: &AppState, worker_id: &str, job: &WorkerJobSnapshot) -> Result<(), AppError> {
    // Step 2: validate the claim before trusting it.
    let file = state
        .store
        .get(job.file_id)
        .await?
        .ok_or_else(|| AppError::bad_request("File not found"))?;

    if !matches!(file.status, Status::Processing | Status::Pending) {
        return Err(AppError::bad_request("Protocol violation: file is not processing or pending"));
    }
    if file.path != job.file_path {
        return Err(AppError::bad_request("File path mismatch"));
    }
    if file.size_bytes != job.file_size {
        return Err(AppError::bad_request("File size mismatch"));
    }
    let claim_age = Utc::now().signed_duration_since(job.started_at);
    if claim_age > ChronoDuration::days(STALE_CLAIM_AGE_DAYS) && job.progress < STALE_CLAIM_PROGRESS_FLOOR {
        return Err(AppError::bad_request("Stale job claim rejected"));
    }

    if job.is_completed {
        // Step 3: the worker finished before the master heard about it.
        // Mark it done now rather than waiting on a `/complete` call that
        // may never arrive; the subsequent File Upload call is idempotent
        // on an already-`completed` row.
        let recovered = state.store.recover_completed(job.file_id, worker_id).await?;
        if recovered {
            state.registry.set_current_job(worker_id, None, None)?;
            state.transfer.clear_in_progress(std::path::Path::new(&file.path)).await;
            if let Some(updated) = state.store.get(job.file_id).await? {
                state.events.publish(FleetEvent::FileUpdated { file: updated });
            }
        }
    } else {
        // Step 4: rebind the row to this worker at its reported progress.
        let rebound = state.store.rebind_processing(job.file_id, worker_id, job.progress).await?;
        if rebound {
            state
                .registry
                .set_current_job(worker_id, Some(job.file_id), Some(file.filename.clone()))?;
            if let Err(err) = state.transfer.mark_in_progress(std::path::Path::new(&file.path)).await {
                warn!(file_id = job.file_id, error = %err, "failed to drop in-progress marker on recovery");
            }
            if let Some(updated) = state.store.get(job.file_id).await? {
                state.events.publish(FleetEvent::FileUpdated { file: updated });
            }
        }
    }
    Ok(())
}

pub async fn request_job(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> Result<Json<Option<JobAssignment>>, AppError> {
    let assignment = state.scheduler.assign(&worker_id).await?;
    if let Some(job) = &assignment {
        info!(worker_id = %worker_id, file_id = job.file_id, "job assigned");
        if let Err(err) = state.transfer.mark_in_progress(std::path::Path::new(&job.path)).await {
            warn!(file_id = job.file_id, error = %err, "failed to drop in-progress marker");
        }
        if let Some(file) = state.store.get(job.file_id).await? {
            state.events.publish(FleetEvent::FileUpdated { file });
        }
    }
    Ok(Json(assignment))
}

pub async fn progress(
    State(state): State<AppState>,
    Path((_worker_id, file_id)): Path<(String, i64)>,
    Json(body): Json<ProgressRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.update_progress(file_id, body.percent, body.speed, body.eta).await?;
    if let Some(file) = state.store.get(file_id).await? {
        state.events.publish(FleetEvent::FileUpdated { file });
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn complete(
    State(state): State<AppState>,
    Path((worker_id, file_id)): Path<(String, i64)>,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let savings_bytes = body.original_size - body.output_size;
    let savings_percent = if body.original_size > 0 {
        (savings_bytes as f64 / body.original_size as f64) * 100.0
    } else {
        0.0
    };
    state.store.mark_completed(file_id, body.output_size, savings_bytes, savings_percent).await?;
    state.registry.record_completion(&worker_id, body.original_size);
    state.registry.set_current_job(&worker_id, None, None)?;

    if let Some(file) = state.store.get(file_id).await? {
        state.transfer.clear_in_progress(std::path::Path::new(&file.path)).await;
        state.events.publish(FleetEvent::FileUpdated { file });
    }
    if let Some(worker) = state.registry.get(&worker_id) {
        state.events.publish(FleetEvent::WorkerUpdated { worker });
    }
    let statistics = state.store.statistics().await?;
    state.events.publish(FleetEvent::StatisticsUpdated { statistics });
    info!(worker_id = %worker_id, file_id, "job completed");
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn failed(
    State(state): State<AppState>,
    Path((worker_id, file_id)): Path<(String, i64)>,
    Json(body): Json<FailRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.mark_failed(file_id, &body.error).await?;
    state.registry.record_failure(&worker_id);
    state.registry.set_current_job(&worker_id, None, None)?;

    if let Some(file) = state.store.get(file_id).await? {
        state.transfer.clear_in_progress(std::path::Path::new(&file.path)).await;
        state.events.publish(FleetEvent::FileUpdated { file });
    }
    warn!(worker_id = %worker_id, file_id, error = %body.error, "job failed");
    Ok(Json(serde_json::json!({ "ok": true })))
}
