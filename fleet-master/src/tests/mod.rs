//! Router-level tests against an in-memory sqlite store, grounded on
//! `ferrex-server`'s `src/tests/test_utils.rs` `oneshot`-against-`Router`
//! pattern (swapped from a postgres test database to `SqliteStore::connect_memory`).

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use fleet_core::{SqliteStore, Store};
use fleet_model::{DiscoveredFile, JobAssignment, RegisterRequest, RegisterResponse, WorkerCapabilities};
use tower::ServiceExt;

use crate::config::Config;
use crate::routes::router;
use crate::state::AppState;

async fn test_app() -> Router {
    let store = SqliteStore::connect_memory().await.expect("in-memory store");
    let state = AppState::new(store, Config::default());
    router().with_state(state)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn register_then_request_job_returns_none_on_empty_queue() {
    let app = test_app().await;

    let register_body = serde_json::to_value(RegisterRequest {
        hostname: "encoder-1".to_string(),
        capabilities: WorkerCapabilities { cpu_count: 8, memory_total: 32_000_000_000, has_gpu: false },
        version: "0.1.0".to_string(),
    })
    .unwrap();
    let response = app.clone().oneshot(json_request("POST", "/api/worker/register", register_body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let registered: RegisterResponse = body_json(response).await;
    assert!(registered.worker_id.starts_with("encoder-1-"));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/worker/{}/job/request", registered.worker_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let assignment: Option<JobAssignment> = body_json(response).await;
    assert!(assignment.is_none());
}

#[tokio::test]
async fn status_endpoint_reports_empty_fleet() {
    let app = test_app().await;
    let response = app.oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value: serde_json::Value = body_json(response).await;
    assert_eq!(value["statistics"]["total_files"], 0);
    assert!(value["workers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn heartbeat_for_unknown_worker_returns_not_found() {
    let app = test_app().await;
    let body = serde_json::json!({
        "status": "idle",
        "cpu_percent": null,
        "memory_percent": null,
        "current_speed": null,
        "current_eta": null,
        "current_job": null,
    });
    let response = app.oneshot(json_request("POST", "/api/worker/ghost-worker/heartbeat", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn heartbeat_recovery_rebinds_a_row_the_worker_is_still_processing() {
    let store = SqliteStore::connect_memory().await.unwrap();
    store
        .upsert_file(DiscoveredFile {
            path: "/library/recover.mkv".to_string(),
            directory: "/library".to_string(),
            filename: "recover.mkv".to_string(),
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
        })
        .await
        .unwrap();

    let app = router().with_state(AppState::new(store, Config::default()));

    let register_body = serde_json::to_value(RegisterRequest {
        hostname: "encoder-3".to_string(),
        capabilities: WorkerCapabilities { cpu_count: 4, memory_total: 16_000_000_000, has_gpu: false },
        version: "0.1.0".to_string(),
    })
    .unwrap();
    let response = app.clone().oneshot(json_request("POST", "/api/worker/register", register_body)).await.unwrap();
    let registered: RegisterResponse = body_json(response).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/worker/{}/job/request", registered.worker_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let assignment: Option<JobAssignment> = body_json(response).await;
    let job = assignment.expect("a pending file should be claimed");

    // The worker never heard back from its own job-request response, so it
    // rediscovers the in-flight job purely from its own state and reports it
    // on the next heartbeat (spec.md §4.4).
    let heartbeat_body = serde_json::json!({
        "status": "processing",
        "cpu_percent": 10.0,
        "memory_percent": 20.0,
        "current_speed": null,
        "current_eta": null,
        "current_job": {
            "file_id": job.file_id,
            "file_path": job.path,
            "file_size": job.size_bytes,
            "progress": 42.0,
            "started_at": chrono::Utc::now().to_rfc3339(),
            "is_completed": false,
        },
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", &format!("/api/worker/{}/heartbeat", registered.worker_id), heartbeat_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(Request::builder().uri("/api/files").body(Body::empty()).unwrap()).await.unwrap();
    let files: Vec<fleet_model::FileRecord> = body_json(response).await;
    assert_eq!(files[0].status, fleet_model::Status::Processing);
    assert_eq!(files[0].progress_percent, 42.0);
    assert_eq!(files[0].assigned_worker_id.as_deref(), Some(registered.worker_id.as_str()));
}

#[tokio::test]
async fn heartbeat_recovery_rejects_a_path_mismatch() {
    let store = SqliteStore::connect_memory().await.unwrap();
    let file = store
        .upsert_file(DiscoveredFile {
            path: "/library/mismatch.mkv".to_string(),
            directory: "/library".to_string(),
            filename: "mismatch.mkv".to_string(),
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
        })
        .await
        .unwrap();
    store.pick_next_pending("encoder-4").await.unwrap();

    let app = router().with_state(AppState::new(store, Config::default()));
    let register_body = serde_json::to_value(RegisterRequest {
        hostname: "encoder-4".to_string(),
        capabilities: WorkerCapabilities { cpu_count: 4, memory_total: 16_000_000_000, has_gpu: false },
        version: "0.1.0".to_string(),
    })
    .unwrap();
    let response = app.clone().oneshot(json_request("POST", "/api/worker/register", register_body)).await.unwrap();
    let registered: RegisterResponse = body_json(response).await;

    let heartbeat_body = serde_json::json!({
        "status": "processing",
        "cpu_percent": null,
        "memory_percent": null,
        "current_speed": null,
        "current_eta": null,
        "current_job": {
            "file_id": file.id,
            "file_path": "/library/wrong-path.mkv",
            "file_size": file.size_bytes,
            "progress": 10.0,
            "started_at": chrono::Utc::now().to_rfc3339(),
            "is_completed": false,
        },
    });
    let response = app
        .oneshot(json_request("POST", &format!("/api/worker/{}/heartbeat", registered.worker_id), heartbeat_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_for_an_already_completed_file_is_a_no_op() {
    let store = SqliteStore::connect_memory().await.unwrap();
    let file = store
        .upsert_file(DiscoveredFile {
            path: "/library/done.mkv".to_string(),
            directory: "/library".to_string(),
            filename: "done.mkv".to_string(),
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
        })
        .await
        .unwrap();
    store.mark_completed(file.id, 400_000, 600_000, 60.0).await.unwrap();

    let app = router().with_state(AppState::new(store, Config::default()));
    let body = "--boundary\r\nContent-Disposition: form-data; name=\"file\"; filename=\"x\"\r\n\r\nstuff\r\n--boundary--\r\n";
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/file/{}/result", file.id))
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=boundary")
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result: fleet_model::UploadResult = body_json(response).await;
    assert_eq!(result.new_size, 400_000);
}

#[tokio::test]
async fn discovered_file_is_queryable_after_upsert() {
    let store = SqliteStore::connect_memory().await.unwrap();
    store
        .upsert_file(DiscoveredFile {
            path: "/library/movie.mkv".to_string(),
            directory: "/library".to_string(),
            filename: "movie.mkv".to_string(),
            size_bytes: 4_000_000_000,
            codec: Some("h264".to_string()),
            bitrate: Some(8_000_000),
            resolution: Some("1920x1080".to_string()),
            bitdepth: Some(8),
            hdr: None,
            hdr_dynamic: false,
            color_transfer: None,
            color_space: None,
            audio_codec: Some("aac".to_string()),
            audio_channels: Some(2),
            audio_bitrate: Some(192_000),
            target_crf: None,
            target_opus_bitrate: None,
        })
        .await
        .unwrap();

    let app = router().with_state(AppState::new(store, Config::default()));

    let response = app.oneshot(Request::builder().uri("/api/files").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let files: Vec<fleet_model::FileRecord> = body_json(response).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].filename, "movie.mkv");
    assert_eq!(files[0].status, fleet_model::Status::Pending);
}

#[tokio::test]
async fn worker_job_lifecycle_assigns_progresses_and_completes() {
    let store = SqliteStore::connect_memory().await.unwrap();
    store
        .upsert_file(DiscoveredFile {
            path: "/library/show.mkv".to_string(),
            directory: "/library".to_string(),
            filename: "show.mkv".to_string(),
            size_bytes: 2_000_000_000,
            codec: Some("h264".to_string()),
            bitrate: Some(4_000_000),
            resolution: Some("1280x720".to_string()),
            bitdepth: Some(8),
            hdr: None,
            hdr_dynamic: false,
            color_transfer: None,
            color_space: None,
            audio_codec: Some("aac".to_string()),
            audio_channels: Some(2),
            audio_bitrate: Some(128_000),
            target_crf: None,
            target_opus_bitrate: None,
        })
        .await
        .unwrap();

    let app = router().with_state(AppState::new(store, Config::default()));

    let register_body = serde_json::to_value(RegisterRequest {
        hostname: "encoder-2".to_string(),
        capabilities: WorkerCapabilities { cpu_count: 4, memory_total: 16_000_000_000, has_gpu: false },
        version: "0.1.0".to_string(),
    })
    .unwrap();
    let response = app.clone().oneshot(json_request("POST", "/api/worker/register", register_body)).await.unwrap();
    let registered: RegisterResponse = body_json(response).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/worker/{}/job/request", registered.worker_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let assignment: Option<JobAssignment> = body_json(response).await;
    let job = assignment.expect("a pending file should be claimed");
    assert_eq!(job.filename, "show.mkv");

    let complete_body = serde_json::json!({ "output_size": 1_000_000_000_i64, "original_size": job.size_bytes });
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/worker/{}/job/{}/complete", registered.worker_id, job.file_id),
            complete_body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap()).await.unwrap();
    let value: serde_json::Value = body_json(response).await;
    assert_eq!(value["statistics"]["completed_files"], 1);
}
