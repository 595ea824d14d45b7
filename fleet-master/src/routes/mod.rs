//! Route composition, grounded on `ferrex-server`'s `routes/mod.rs`:
//! one nested router per resource, merged under `create_app`.

pub mod config;
pub mod file;
pub mod status;
pub mod worker;

use axum::Router;
use axum::routing::{delete, get, post, put};

use crate::state::AppState;
use crate::websocket;

pub fn router() -> Router<AppState> {
    let worker_routes = Router::new()
        .route("/worker/register", post(worker::register))
        .route("/worker/{worker_id}/heartbeat", post(worker::heartbeat))
        .route("/worker/{worker_id}/job/request", post(worker::request_job))
        .route("/worker/{worker_id}/job/{file_id}/progress", post(worker::progress))
        .route("/worker/{worker_id}/job/{file_id}/complete", post(worker::complete))
        .route("/worker/{worker_id}/job/{file_id}/failed", post(worker::failed));

    let file_routes = Router::new()
        .route("/file/{file_id}/download", get(file::download))
        .route("/file/{file_id}/result", post(file::upload_result))
        .route("/file/{file_id}/cancel", post(file::cancel))
        .route("/file/{file_id}/retry", post(file::retry))
        .route("/file/{file_id}/skip", post(file::skip))
        .route("/file/{file_id}", delete(file::delete))
        .route("/file/{file_id}/priority", put(file::set_priority))
        .route("/files/reset-failed", post(file::reset_all_failed))
        .route("/files/completed", delete(file::delete_all_completed));

    let status_routes = Router::new()
        .route("/status", get(status::status))
        .route("/files", get(status::files))
        .route("/workers", get(status::workers))
        .route("/statistics", get(status::statistics));

    let config_routes = Router::new()
        .route("/config/quality_lookup.json", get(config::quality_lookup))
        .route("/config/audio_codec_lookup.json", get(config::audio_codec_lookup))
        .route("/scan", post(config::trigger_scan));

    Router::new()
        .nest("/api", worker_routes.merge(file_routes).merge(status_routes).merge(config_routes))
        .route("/ws", get(websocket::upgrade))
}
