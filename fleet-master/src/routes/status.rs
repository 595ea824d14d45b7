//! `/api/status`, `/api/files`, `/api/workers` — read-only fleet snapshots
//! for the UI and `fleetctl` (spec.md §6.1 "Read endpoints").

use axum::Json;
use axum::extract::{Query, State};
use fleet_model::{FileRecord, Statistics, Status, WorkerRecord};
use serde::{Deserialize, Serialize};

use fleet_core::Store;

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub statistics: Statistics,
    pub workers: Vec<WorkerRecord>,
    pub processing: Vec<FileRecord>,
}

pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let statistics = state.store.statistics().await?;
    let workers = state.registry.list();
    let processing = state.store.list_processing().await?;
    Ok(Json(StatusResponse { statistics, workers, processing }))
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    pub status: Option<String>,
}

pub async fn files(
    State(state): State<AppState>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let status = query.status.as_deref().and_then(|s| s.parse::<Status>().ok());
    let files = state.store.list(status).await?;
    Ok(Json(files))
}

pub async fn workers(State(state): State<AppState>) -> Json<Vec<WorkerRecord>> {
    Json(state.registry.list())
}

pub async fn statistics(State(state): State<AppState>) -> Result<Json<Statistics>, AppError> {
    Ok(Json(state.store.statistics().await?))
}
