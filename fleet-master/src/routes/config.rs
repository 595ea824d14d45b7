//! `/api/config/*` lookup tables and the manual library scan trigger
//! (spec.md §1 "external collaborator" contracts; `lib/quality.py`,
//! `lib/scanner.py`).

use axum::Json;
use axum::extract::State;
use fleet_core::Store;
use fleet_model::DiscoveredFile;
use tracing::info;

use crate::errors::AppError;
use crate::quality;
use crate::scanner;
use crate::state::AppState;

pub async fn quality_lookup() -> Json<serde_json::Value> {
    Json(quality::quality_lookup_json())
}

pub async fn audio_codec_lookup() -> Json<serde_json::Value> {
    Json(quality::audio_codec_lookup_json())
}

pub async fn trigger_scan(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let library = state.config.library.clone();
    let discovered: Vec<DiscoveredFile> =
        tokio::task::spawn_blocking(move || scanner::scan_library(&library))
            .await
            .map_err(|err| AppError::internal(err.to_string()))?;

    let mut upserted = 0usize;
    for file in discovered {
        state.store.upsert_file(file).await?;
        upserted += 1;
    }
    info!(upserted, "library scan complete");
    Ok(Json(serde_json::json!({ "scanned": upserted })))
}
