//! `/api/file/*` — download for a worker to pull the source, upload of the
//! finished encode, and the operator actions (`manage_queue.py`,
//! `reset_failed.py`): cancel/retry/skip/delete/priority.

use std::path::PathBuf;

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use fleet_model::{Status, UploadResult};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::info;

use fleet_core::Store;
use fleet_core::events::FleetEvent;

use crate::errors::AppError;
use crate::state::AppState;

pub async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let file = state
        .store
        .get(file_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("file {file_id} not found")))?;

    let handle = tokio::fs::File::open(&file.path)
        .await
        .map_err(|err| AppError::internal(format!("opening {}: {err}", file.path)))?;
    let stream = ReaderStream::new(handle);
    let body = Body::from_stream(stream);

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.filename),
            ),
        ],
        body,
    ))
}

pub async fn upload_result(
    State(state): State<AppState>,
    Path(file_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<UploadResult>, AppError> {
    let file = state
        .store
        .get(file_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("file {file_id} not found")))?;

    // Step 5's accept/no-op/reject gate (spec.md §4.6): a result for an
    // already-`completed` file is a late or duplicate upload and a no-op,
    // not an error — a worker racing the heartbeat-recovery path may well
    // call this after the file has already been finalized. Anything other
    // than `processing`/`failed` is a protocol violation.
    if file.status == Status::Completed {
        info!(file_id, "upload for an already-completed file, ignoring");
        return Ok(Json(UploadResult {
            original_size: file.size_bytes,
            new_size: file.output_size_bytes.unwrap_or(file.size_bytes),
            savings_percent: file.savings_percent.unwrap_or(0.0),
        }));
    }
    if !matches!(file.status, Status::Processing | Status::Failed) {
        return Err(AppError::bad_request("file is not awaiting a result"));
    }

    let mut bytes = None;
    while let Some(field) = multipart.next_field().await.map_err(|err| AppError::bad_request(err.to_string()))? {
        if field.name() == Some("file") {
            bytes = Some(field.bytes().await.map_err(|err| AppError::bad_request(err.to_string()))?);
            break;
        }
    }
    let bytes = bytes.ok_or_else(|| AppError::bad_request("missing `file` field"))?;

    let original_size = file.size_bytes;
    let new_size = bytes.len() as i64;
    state.transfer.commit_replacement(&PathBuf::from(&file.path), &bytes).await?;

    let savings_bytes = original_size - new_size;
    let savings_percent = if original_size > 0 { (savings_bytes as f64 / original_size as f64) * 100.0 } else { 0.0 };

    // The bytes are already durably swapped onto disk at this point; persist
    // `completed` now so the worker's subsequent `/complete` call is purely
    // informational and a failure to deliver it never strands this row in
    // `processing` (spec.md §7 "Completion-report failure after successful
    // upload").
    state.store.mark_completed(file_id, new_size, savings_bytes, savings_percent).await?;
    state.transfer.clear_in_progress(std::path::Path::new(&file.path)).await;
    if let Some(updated) = state.store.get(file_id).await? {
        state.events.publish(FleetEvent::FileUpdated { file: updated });
    }
    let statistics = state.store.statistics().await?;
    state.events.publish(FleetEvent::StatisticsUpdated { statistics });

    info!(file_id, original_size, new_size, "result uploaded and swapped in");
    Ok(Json(UploadResult { original_size, new_size, savings_percent }))
}

pub async fn cancel(State(state): State<AppState>, Path(file_id): Path<i64>) -> Result<Json<serde_json::Value>, AppError> {
    reset_and_broadcast(&state, file_id).await
}

pub async fn retry(State(state): State<AppState>, Path(file_id): Path<i64>) -> Result<Json<serde_json::Value>, AppError> {
    reset_and_broadcast(&state, file_id).await
}

async fn reset_and_broadcast(state: &AppState, file_id: i64) -> Result<Json<serde_json::Value>, AppError> {
    state.store.reset(file_id).await?;
    if let Some(file) = state.store.get(file_id).await? {
        state.transfer.clear_in_progress(std::path::Path::new(&file.path)).await;
        state.events.publish(FleetEvent::FileUpdated { file });
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn skip(State(state): State<AppState>, Path(file_id): Path<i64>) -> Result<Json<serde_json::Value>, AppError> {
    state.store.skip(file_id).await?;
    if let Some(file) = state.store.get(file_id).await? {
        state.transfer.clear_in_progress(std::path::Path::new(&file.path)).await;
        state.events.publish(FleetEvent::FileUpdated { file });
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn delete(State(state): State<AppState>, Path(file_id): Path<i64>) -> Result<Json<serde_json::Value>, AppError> {
    state.store.delete(file_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct PriorityBody {
    pub priority: i64,
    #[serde(default)]
    pub preferred_worker_id: Option<String>,
}

pub async fn set_priority(
    State(state): State<AppState>,
    Path(file_id): Path<i64>,
    Json(body): Json<PriorityBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.set_priority(file_id, body.priority, body.preferred_worker_id).await?;
    if let Some(file) = state.store.get(file_id).await? {
        state.events.publish(FleetEvent::FileUpdated { file });
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn reset_all_failed(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.store.reset_all_failed().await?;
    Ok(Json(serde_json::json!({ "reset": count })))
}

pub async fn delete_all_completed(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.store.delete_all_completed().await?;
    Ok(Json(serde_json::json!({ "deleted": count })))
}
