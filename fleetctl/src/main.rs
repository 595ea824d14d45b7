//! Operator CLI for a running fleet-master, grounded on `manage_queue.py`
//! and `reset_failed.py`: a thin wrapper over the status/file endpoints for
//! people who'd rather type a command than open a browser.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fleet_model::{FileRecord, Statistics, WorkerRecord};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "fleetctl", about = "Operator CLI for the fleet-master queue")]
struct Cli {
    /// Base URL of the fleet-master instance.
    #[arg(long, env = "FLEETCTL_MASTER_URL", default_value = "http://127.0.0.1:8080")]
    master_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show aggregate queue statistics.
    Stats,
    /// List files, optionally filtered by status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// List registered workers.
    Workers,
    /// Reset every failed file back to pending.
    ResetFailed,
    /// Reset a single file back to pending.
    Retry { file_id: i64 },
    /// Mark a file completed without processing it.
    Skip { file_id: i64 },
    /// Remove a file from the queue entirely.
    Delete { file_id: i64 },
    /// Change a file's priority (higher runs first) and optionally pin it
    /// to a specific worker.
    Priority {
        file_id: i64,
        priority: i64,
        #[arg(long)]
        preferred_worker: Option<String>,
    },
    /// Trigger a library scan on the master.
    Scan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.master_url.trim_end_matches('/').to_string();

    match cli.command {
        Command::Stats => {
            let stats: Statistics = get(&client, &base, "/api/statistics").await?;
            print_stats(&stats);
        }
        Command::List { status } => {
            let path = match &status {
                Some(status) => format!("/api/files?status={status}"),
                None => "/api/files".to_string(),
            };
            let files: Vec<FileRecord> = get(&client, &base, &path).await?;
            for file in files {
                println!(
                    "{:>6}  {:<10}  {:>6.1}%  {}",
                    file.id, file.status, file.progress_percent, file.path
                );
            }
        }
        Command::Workers => {
            let workers: Vec<WorkerRecord> = get(&client, &base, "/api/workers").await?;
            for worker in workers {
                println!("{:<24} {:?}  completed={} failed={}", worker.id, worker.status, worker.jobs_completed, worker.jobs_failed);
            }
        }
        Command::ResetFailed => {
            let body: Value = post(&client, &base, "/api/files/reset-failed").await?;
            println!("{body}");
        }
        Command::Retry { file_id } => {
            post_unit(&client, &base, &format!("/api/file/{file_id}/retry")).await?;
            println!("file {file_id} reset to pending");
        }
        Command::Skip { file_id } => {
            post_unit(&client, &base, &format!("/api/file/{file_id}/skip")).await?;
            println!("file {file_id} marked completed");
        }
        Command::Delete { file_id } => {
            delete(&client, &base, &format!("/api/file/{file_id}")).await?;
            println!("file {file_id} deleted");
        }
        Command::Priority { file_id, priority, preferred_worker } => {
            let body = serde_json::json!({ "priority": priority, "preferred_worker_id": preferred_worker });
            put(&client, &base, &format!("/api/file/{file_id}/priority"), &body).await?;
            println!("file {file_id} priority set to {priority}");
        }
        Command::Scan => {
            let body: Value = post(&client, &base, "/api/scan").await?;
            println!("{body}");
        }
    }

    Ok(())
}

fn print_stats(stats: &Statistics) {
    println!("total:      {}", stats.total_files);
    println!("pending:    {}", stats.pending_files);
    println!("processing: {}", stats.processing_files);
    println!("completed:  {}", stats.completed_files);
    println!("failed:     {}", stats.failed_files);
    println!("savings:    {:.1}%", stats.total_savings_percent);
}

async fn get<T: serde::de::DeserializeOwned>(client: &reqwest::Client, base: &str, path: &str) -> Result<T> {
    let response = client.get(format!("{base}{path}")).send().await.context("sending request")?;
    ensure_ok(&response)?;
    response.json().await.context("decoding response")
}

async fn post<T: serde::de::DeserializeOwned>(client: &reqwest::Client, base: &str, path: &str) -> Result<T> {
    let response = client.post(format!("{base}{path}")).send().await.context("sending request")?;
    ensure_ok(&response)?;
    response.json().await.context("decoding response")
}

async fn post_unit(client: &reqwest::Client, base: &str, path: &str) -> Result<()> {
    let response = client.post(format!("{base}{path}")).send().await.context("sending request")?;
    ensure_ok(&response)
}

async fn put(client: &reqwest::Client, base: &str, path: &str, body: &Value) -> Result<()> {
    let response = client.put(format!("{base}{path}")).json(body).send().await.context("sending request")?;
    ensure_ok(&response)
}

async fn delete(client: &reqwest::Client, base: &str, path: &str) -> Result<()> {
    let response = client.delete(format!("{base}{path}")).send().await.context("sending request")?;
    ensure_ok(&response)
}

fn ensure_ok(response: &reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        bail!("master returned {}", response.status())
    }
}
