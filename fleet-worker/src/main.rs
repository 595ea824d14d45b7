mod client;
mod config;
mod policies;
mod transcode;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::Args;
use crate::transcode::FfmpegRunner;
use crate::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let runner = Arc::new(FfmpegRunner { ffmpeg_path: args.ffmpeg_path.clone() });
    let worker = Worker::bootstrap(args, runner).await.context("bootstrapping worker")?;

    tracing::info!(worker_id = %worker.worker_id(), "starting job loop");
    worker.run_forever().await
}
