use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "fleet-worker", about = "Worker node for a distributed AV1 transcoding fleet")]
pub struct Args {
    /// Base URL of the fleet-master instance, e.g. http://master:8080.
    #[arg(long, env = "FLEET_WORKER_MASTER_URL")]
    pub master_url: String,

    /// Overrides the hostname reported at registration.
    #[arg(long, env = "FLEET_WORKER_HOSTNAME")]
    pub hostname: Option<String>,

    /// Scratch directory for downloaded sources and finished encodes.
    #[arg(long, env = "FLEET_WORKER_WORKDIR", default_value = "./fleet-worker-tmp")]
    pub workdir: PathBuf,

    /// Time between heartbeats, e.g. "10s".
    #[arg(long, env = "FLEET_WORKER_HEARTBEAT_INTERVAL", default_value = "10s")]
    pub heartbeat_interval: humantime::Duration,

    /// Time to wait before asking for another job after the queue is empty.
    #[arg(long, env = "FLEET_WORKER_POLL_INTERVAL", default_value = "15s")]
    pub poll_interval: humantime::Duration,

    /// Path to the ffmpeg binary.
    #[arg(long, env = "FLEET_WORKER_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg_path: String,

    /// Minimum percent size reduction worth keeping an encode for
    /// (spec.md §4.7 "not worth it" skip policy).
    #[arg(long, env = "FLEET_WORKER_MIN_SAVINGS_PERCENT", default_value_t = 5.0)]
    pub min_savings_percent: f64,
}

impl Args {
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval.into()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.into()
    }

    pub fn resolved_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(hostname_fallback)
    }
}

fn hostname_fallback() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-worker".to_string())
}
