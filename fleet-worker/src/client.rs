//! HTTP client for the master's job protocol, grounded on
//! `worker_client.py`'s `WorkerClient`: one small method per endpoint, all
//! going through a single `reqwest::Client` with a shared timeout.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_model::{
    CompleteRequest, FailRequest, HeartbeatRequest, JobAssignment, ProgressRequest, RegisterRequest,
    RegisterResponse, UploadResult,
};
use reqwest::{Client, StatusCode};
use thiserror::Error;

/// Distinguishes a 404 on a worker-scoped endpoint — which per spec.md §4.7
/// means the master has forgotten this worker, typically after a restart,
/// and it must re-register before continuing — from any other failure
/// response.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("master does not recognize this worker")]
    WorkerUnknown,
    #[error("master returned {0}")]
    Http(StatusCode),
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Downloads/uploads can legitimately run for a long time for large
/// sources; give them their own, much longer, timeout.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub struct MasterClient {
    http: Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build().context("building http client")?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        let response = self
            .http
            .post(self.url("/api/worker/register"))
            .json(request)
            .send()
            .await
            .context("registering with master")?;
        ensure_ok(&response)?;
        Ok(response.json().await.context("decoding register response")?)
    }

    pub async fn heartbeat(&self, worker_id: &str, body: &HeartbeatRequest) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/worker/{worker_id}/heartbeat")))
            .json(body)
            .send()
            .await
            .context("sending heartbeat")?;
        ensure_worker_ok(&response)?;
        Ok(())
    }

    pub async fn request_job(&self, worker_id: &str) -> Result<Option<JobAssignment>> {
        let response = self
            .http
            .post(self.url(&format!("/api/worker/{worker_id}/job/request")))
            .send()
            .await
            .context("requesting job")?;
        ensure_worker_ok(&response)?;
        Ok(response.json().await.context("decoding job assignment")?)
    }

    pub async fn report_progress(&self, worker_id: &str, file_id: i64, body: &ProgressRequest) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/worker/{worker_id}/job/{file_id}/progress")))
            .json(body)
            .send()
            .await
            .context("reporting progress")?;
        ensure_worker_ok(&response)?;
        Ok(())
    }

    pub async fn report_complete(&self, worker_id: &str, file_id: i64, body: &CompleteRequest) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/worker/{worker_id}/job/{file_id}/complete")))
            .json(body)
            .send()
            .await
            .context("reporting completion")?;
        ensure_worker_ok(&response)?;
        Ok(())
    }

    pub async fn report_failed(&self, worker_id: &str, file_id: i64, body: &FailRequest) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/worker/{worker_id}/job/{file_id}/failed")))
            .json(body)
            .send()
            .await
            .context("reporting failure")?;
        ensure_worker_ok(&response)?;
        Ok(())
    }

    pub async fn download_source(&self, file_id: i64, destination: &Path) -> Result<()> {
        let response = self
            .http
            .get(self.url(&format!("/api/file/{file_id}/download")))
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await
            .context("downloading source")?;
        ensure_ok(&response)?;
        let bytes = response.bytes().await.context("reading download body")?;
        tokio::fs::write(destination, &bytes).await.context("writing downloaded source to disk")?;
        Ok(())
    }

    pub async fn upload_result(&self, file_id: i64, encoded_path: &Path) -> Result<UploadResult> {
        let bytes = tokio::fs::read(encoded_path).await.context("reading encoded output")?;
        let filename = encoded_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.url(&format!("/api/file/{file_id}/result")))
            .timeout(TRANSFER_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .context("uploading result")?;
        ensure_ok(&response)?;
        Ok(response.json().await.context("decoding upload result")?)
    }
}

fn ensure_ok(response: &reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(ClientError::Http(response.status()).into())
    }
}

/// Like [`ensure_ok`], but a 404 on a worker-scoped endpoint (heartbeat,
/// job request, progress, complete, failed) specifically means the master
/// no longer knows this `worker_id` rather than e.g. an unknown file, so it
/// is classified separately to drive re-registration.
fn ensure_worker_ok(response: &reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else if response.status() == StatusCode::NOT_FOUND {
        Err(ClientError::WorkerUnknown.into())
    } else {
        Err(ClientError::Http(response.status()).into())
    }
}
