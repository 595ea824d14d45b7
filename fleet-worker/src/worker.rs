//! The worker's own control loop: register once, then heartbeat/request/
//! work/report forever. Grounded on `worker_client.py`'s main loop, with
//! the `downloading -> processing -> uploading -> idle` phases spec.md
//! §4.7 calls out made explicit via [`fleet_model::WorkerStatus`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use fleet_model::{
    CompleteRequest, FailRequest, HeartbeatRequest, JobAssignment, ProgressRequest, RegisterRequest,
    UploadResult, WorkerCapabilities, WorkerJobSnapshot,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tokio::fs;
use tracing::{error, info, warn};

use crate::client::{ClientError, MasterClient};
use crate::config::Args;
use crate::policies::{self, SkipReason};
use crate::transcode::{EncodeProgress, TranscodeRunner};

/// Bound on how many times a lost `/complete` report is retried before the
/// worker gives up on it (spec.md §4.7: "retries with backoff indefinitely
/// ... ~100 tries spaced ~30s"). By the time this is exhausted the upload
/// endpoint has already persisted `completed`, so giving up here only loses
/// the worker's own completion-count bookkeeping, not the file's data.
const COMPLETION_RETRY_ATTEMPTS: u32 = 100;
const COMPLETION_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Side-car written next to a stashed failed upload (spec.md §4.7), so a
/// later retry knows what it's retrying without having to reconstruct
/// anything beyond the file id from the filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FailedUploadMetadata {
    job_id: i64,
    original_path: String,
    failed_at: chrono::DateTime<Utc>,
    worker_id: String,
}

pub struct Worker {
    client: Arc<MasterClient>,
    args: Args,
    runner: Arc<dyn TranscodeRunner>,
    worker_id: Mutex<String>,
    /// Kept alive across heartbeats: sysinfo's CPU usage readings are a
    /// delta since the last refresh, so a fresh `System` on every call
    /// would always report zero (`muyuanjin-ffui`'s `system_metrics.rs`
    /// seeds once for the same reason).
    system: Mutex<System>,
    /// The in-flight job, if any, attached to every heartbeat so the master
    /// can recover it after a missed response (spec.md §4.4/§4.7). Its own
    /// `Arc` lets the background completion-retry task in [`Worker::run_job`]
    /// keep clearing it after `run_job` itself has returned.
    current_job: Arc<Mutex<Option<WorkerJobSnapshot>>>,
}

impl Worker {
    pub async fn bootstrap(args: Args, runner: Arc<dyn TranscodeRunner>) -> Result<Self> {
        let client = Arc::new(MasterClient::new(args.master_url.clone())?);
        fs::create_dir_all(&args.workdir).await.context("creating workdir")?;
        fs::create_dir_all(failed_uploads_dir(&args.workdir)).await.context("creating failed_uploads dir")?;

        let mut system = System::new_all();
        system.refresh_all();
        let capabilities = capabilities(&system);
        let response = client
            .register(&RegisterRequest {
                hostname: args.resolved_hostname(),
                capabilities,
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
            .await
            .context("registering with master")?;
        info!(worker_id = %response.worker_id, "registered");

        Ok(Self {
            client,
            args,
            runner,
            worker_id: Mutex::new(response.worker_id),
            system: Mutex::new(system),
            current_job: Arc::new(Mutex::new(None)),
        })
    }

    pub fn worker_id(&self) -> String {
        self.worker_id.lock().clone()
    }

    pub async fn run_forever(&self) -> Result<()> {
        let mut heartbeat_ticker = tokio::time::interval(self.args.heartbeat_interval());
        loop {
            heartbeat_ticker.tick().await;
            self.retry_failed_uploads().await;

            if let Err(err) = self.heartbeat("idle", None, None).await {
                warn!(error = %err, "heartbeat failed");
                self.handle_master_error(&err).await;
            }

            match self.client.request_job(&self.worker_id()).await {
                Ok(Some(job)) => {
                    if let Err(err) = self.run_job(job).await {
                        error!(error = %err, "job processing failed unexpectedly");
                        self.handle_master_error(&err).await;
                    }
                }
                Ok(None) => tokio::time::sleep(self.args.poll_interval()).await,
                Err(err) => {
                    warn!(error = %err, "job request failed");
                    self.handle_master_error(&err).await;
                    tokio::time::sleep(self.args.poll_interval()).await;
                }
            }
        }
    }

    async fn run_job(&self, job: JobAssignment) -> Result<()> {
        let worker_id = self.worker_id();

        if let Some(SkipReason::DynamicHdr) = policies::pre_flight_skip(&job) {
            warn!(file_id = job.file_id, "refusing job with dynamic HDR metadata");
            self.client
                .report_failed(&worker_id, job.file_id, &FailRequest { error: "dynamic HDR not supported".to_string() })
                .await?;
            return Ok(());
        }

        *self.current_job.lock() = Some(WorkerJobSnapshot {
            file_id: job.file_id,
            file_path: job.path.clone(),
            file_size: job.size_bytes,
            progress: 0.0,
            started_at: Utc::now(),
            is_completed: false,
        });

        let input_path = self.args.workdir.join(format!("{}.src", job.file_id));
        let output_path = self.args.workdir.join(format!("{}.out", job.file_id));

        if let Err(err) = self.heartbeat("downloading", None, None).await {
            self.handle_master_error(&err).await;
        }
        if let Err(err) = self.client.download_source(job.file_id, &input_path).await {
            self.fail_job(&worker_id, job.file_id, &format!("download failed: {err}")).await;
            return Ok(());
        }

        if let Err(err) = self.heartbeat("processing", None, None).await {
            self.handle_master_error(&err).await;
        }
        let progress_worker_id = worker_id.clone();
        let file_id = job.file_id;
        let progress_client = self.client.clone();
        let current_job = self.current_job.clone();
        let on_progress = move |sample: EncodeProgress| {
            let worker_id = progress_worker_id.clone();
            let client = progress_client.clone();
            if let Some(snapshot) = current_job.lock().as_mut() {
                snapshot.progress = sample.percent;
            }
            let body = ProgressRequest {
                percent: sample.percent,
                speed: sample.speed_fps,
                eta: sample.eta_seconds,
                status: Some("processing".to_string()),
            };
            tokio::spawn(async move {
                let _ = client.report_progress(&worker_id, file_id, &body).await;
            });
        };

        if let Err(err) = self.runner.run(&job, &input_path, &output_path, &on_progress).await {
            self.fail_job(&worker_id, job.file_id, &format!("encode failed: {err}")).await;
            cleanup(&input_path, &output_path).await;
            return Ok(());
        }

        let encoded_size = fs::metadata(&output_path).await.map(|meta| meta.len() as i64).unwrap_or(0);
        if !policies::is_worth_keeping(job.size_bytes, encoded_size, self.args.min_savings_percent) {
            info!(file_id = job.file_id, "encode did not save enough space, skipping upload");
            *self.current_job.lock() = None;
            if let Err(err) = self
                .client
                .report_failed(
                    &worker_id,
                    job.file_id,
                    &FailRequest { error: "encode did not meet minimum savings threshold".to_string() },
                )
                .await
            {
                warn!(file_id = job.file_id, error = %err, "reporting skip to master failed");
                self.handle_master_error(&err).await;
            }
            cleanup(&input_path, &output_path).await;
            return Ok(());
        }

        if let Err(err) = self.heartbeat("uploading", None, None).await {
            self.handle_master_error(&err).await;
        }
        match self.client.upload_result(job.file_id, &output_path).await {
            Ok(UploadResult { original_size, new_size, .. }) => {
                if let Some(snapshot) = self.current_job.lock().as_mut() {
                    snapshot.progress = 100.0;
                    snapshot.is_completed = true;
                }
                let body = CompleteRequest { output_size: new_size, original_size };
                match self.client.report_complete(&worker_id, job.file_id, &body).await {
                    Ok(()) => *self.current_job.lock() = None,
                    Err(err) => {
                        warn!(file_id = job.file_id, error = %err, "completion report failed, retrying in background");
                        self.handle_master_error(&err).await;
                        spawn_completion_retry(
                            self.client.clone(),
                            self.current_job.clone(),
                            worker_id.clone(),
                            job.file_id,
                            body,
                        );
                    }
                }
                info!(file_id = job.file_id, new_size, "job complete");
            }
            Err(err) => {
                warn!(file_id = job.file_id, error = %err, "upload failed, stashing for retry");
                self.stash_failed_upload(&job, &output_path).await;
            }
        }

        cleanup(&input_path, &output_path).await;
        Ok(())
    }

    async fn fail_job(&self, worker_id: &str, file_id: i64, error: &str) {
        error!(file_id, error, "job failed");
        *self.current_job.lock() = None;
        if let Err(err) = self.client.report_failed(worker_id, file_id, &FailRequest { error: error.to_string() }).await {
            warn!(file_id, error = %err, "reporting failure to master also failed");
            self.handle_master_error(&err).await;
        }
    }

    async fn heartbeat(&self, status: &str, speed: Option<f64>, eta: Option<i64>) -> Result<()> {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();
        let cores = system.cpus();
        let cpu_percent = if cores.is_empty() {
            None
        } else {
            Some(cores.iter().map(|cpu| cpu.cpu_usage() as f64).sum::<f64>() / cores.len() as f64)
        };
        let used = system.used_memory() as f64;
        let total = system.total_memory().max(1) as f64;
        drop(system);
        let memory_percent = Some((used / total) * 100.0);
        let current_job = self.current_job.lock().clone();

        self.client
            .heartbeat(
                &self.worker_id(),
                &HeartbeatRequest {
                    status: status.to_string(),
                    cpu_percent,
                    memory_percent,
                    current_speed: speed,
                    current_eta: eta,
                    current_job,
                },
            )
            .await
    }

    /// Re-registers with the master, e.g. after it forgot this worker
    /// across a restart (spec.md §4.7 "On any subsequent 404 from the
    /// master, re-register before continuing"). Swaps in the new worker id
    /// in place so in-flight calls using the old one simply finish failing.
    async fn re_register(&self) -> Result<()> {
        let capabilities = {
            let mut system = self.system.lock();
            system.refresh_all();
            capabilities(&system)
        };
        let response = self
            .client
            .register(&RegisterRequest {
                hostname: self.args.resolved_hostname(),
                capabilities,
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
            .await
            .context("re-registering with master")?;
        info!(worker_id = %response.worker_id, "re-registered after master forgot us");
        *self.worker_id.lock() = response.worker_id;
        Ok(())
    }

    async fn handle_master_error(&self, err: &anyhow::Error) {
        let is_worker_unknown =
            err.downcast_ref::<ClientError>().is_some_and(|err| matches!(err, ClientError::WorkerUnknown));
        if is_worker_unknown {
            warn!("master does not recognize this worker, re-registering");
            if let Err(err) = self.re_register().await {
                error!(error = %err, "re-registration failed");
            }
        }
    }

    /// Uploads that failed (master unreachable, network blip) are kept on
    /// disk under `failed_uploads/` and retried on every heartbeat tick
    /// rather than discarding finished work (spec.md §6.3 "Filesystem
    /// layout"), alongside a JSON side-car recording the fields needed to
    /// report the retry (spec.md §4.7).
    async fn stash_failed_upload(&self, job: &JobAssignment, encoded_path: &PathBuf) {
        let dir = failed_uploads_dir(&self.args.workdir);
        let destination = dir.join(format!("{}.out", job.file_id));
        if let Err(err) = fs::copy(encoded_path, &destination).await {
            error!(file_id = job.file_id, error = %err, "failed to stash unsent upload");
            return;
        }

        let metadata = FailedUploadMetadata {
            job_id: job.file_id,
            original_path: job.path.clone(),
            failed_at: Utc::now(),
            worker_id: self.worker_id(),
        };
        match serde_json::to_vec_pretty(&metadata) {
            Ok(bytes) => {
                if let Err(err) = fs::write(dir.join(format!("{}.json", job.file_id)), bytes).await {
                    error!(file_id = job.file_id, error = %err, "failed to write failed-upload side-car");
                }
            }
            Err(err) => error!(file_id = job.file_id, error = %err, "failed to encode failed-upload side-car"),
        }
    }

    async fn retry_failed_uploads(&self) {
        let dir = failed_uploads_dir(&self.args.workdir);
        let Ok(mut entries) = fs::read_dir(&dir).await else { return };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("out") {
                continue;
            }
            let Some(file_id) = file_id_from_stash_path(&path) else { continue };
            let sidecar_path = path.with_extension("json");
            if let Ok(bytes) = fs::read(&sidecar_path).await {
                if let Ok(metadata) = serde_json::from_slice::<FailedUploadMetadata>(&bytes) {
                    info!(
                        file_id,
                        original_path = %metadata.original_path,
                        failed_at = %metadata.failed_at,
                        worker_id = %metadata.worker_id,
                        "retrying stashed upload"
                    );
                }
            }

            match self.client.upload_result(file_id, &path).await {
                Ok(UploadResult { original_size, new_size, .. }) => {
                    let body = CompleteRequest { output_size: new_size, original_size };
                    if let Err(err) = self.client.report_complete(&self.worker_id(), file_id, &body).await {
                        warn!(file_id, error = %err, "reporting completion for stashed upload failed");
                        self.handle_master_error(&err).await;
                    } else if self.current_job.lock().as_ref().map(|job| job.file_id) == Some(file_id) {
                        *self.current_job.lock() = None;
                    }
                    fs::remove_file(&path).await.ok();
                    fs::remove_file(&sidecar_path).await.ok();
                    info!(file_id, "retried stashed upload successfully");
                }
                Err(err) => {
                    warn!(file_id, error = %err, "stashed upload still failing");
                    self.handle_master_error(&err).await;
                }
            }
        }
    }
}

/// Keeps retrying a `/complete` report that failed right after a successful
/// upload, instead of losing it outright (spec.md §4.7). The upload itself
/// already persisted the file as `completed`, so this only recovers the
/// worker's own bookkeeping (`Registry.record_completion`) if it eventually
/// lands; giving up after [`COMPLETION_RETRY_ATTEMPTS`] leaves the next
/// heartbeat's reconnection recovery as the final backstop.
fn spawn_completion_retry(
    client: Arc<MasterClient>,
    current_job: Arc<Mutex<Option<WorkerJobSnapshot>>>,
    worker_id: String,
    file_id: i64,
    body: CompleteRequest,
) {
    tokio::spawn(async move {
        for attempt in 1..=COMPLETION_RETRY_ATTEMPTS {
            tokio::time::sleep(COMPLETION_RETRY_DELAY).await;
            match client.report_complete(&worker_id, file_id, &body).await {
                Ok(()) => {
                    if current_job.lock().as_ref().map(|job| job.file_id) == Some(file_id) {
                        *current_job.lock() = None;
                    }
                    info!(file_id, attempt, "completion report retry succeeded");
                    return;
                }
                Err(err) => warn!(file_id, attempt, error = %err, "completion report retry failed"),
            }
        }
        error!(file_id, "giving up reporting completion after retries; heartbeat recovery will finalize it");
    });
}

fn failed_uploads_dir(workdir: &std::path::Path) -> PathBuf {
    workdir.join("failed_uploads")
}

fn file_id_from_stash_path(path: &std::path::Path) -> Option<i64> {
    path.file_stem()?.to_str()?.parse().ok()
}

async fn cleanup(input: &std::path::Path, output: &std::path::Path) {
    fs::remove_file(input).await.ok();
    fs::remove_file(output).await.ok();
}

fn capabilities(system: &System) -> WorkerCapabilities {
    WorkerCapabilities {
        cpu_count: system.cpus().len() as u32,
        memory_total: system.total_memory(),
        has_gpu: false,
    }
}
