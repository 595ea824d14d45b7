//! Configuration loading (spec.md §6.4), grounded on
//! `ferrex-server`'s `Config::from_env` pattern: typed fields populated
//! from environment variables with `clap`-level CLI overrides, plus an
//! optional TOML file for the handful of settings too structured for a
//! single env var (grounded on `lib/config.py`'s JSON config file).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "fleet-master", about = "Coordinator for a distributed AV1 transcoding fleet")]
pub struct Args {
    /// Address to bind the HTTP API to.
    #[arg(long, env = "FLEET_MASTER_BIND")]
    pub bind: Option<SocketAddr>,

    /// Path to the sqlite database file.
    #[arg(long, env = "FLEET_MASTER_DB")]
    pub database: Option<PathBuf>,

    /// Optional TOML config file, layered under env vars and CLI flags.
    #[arg(long, env = "FLEET_MASTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory watched/served for source and output media.
    #[arg(long, env = "FLEET_MASTER_LIBRARY")]
    pub library: Option<PathBuf>,
}

/// Fully resolved configuration. Precedence, lowest to highest: built-in
/// default, TOML file, environment variable, CLI flag.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: SocketAddr,
    pub database: PathBuf,
    pub library: PathBuf,
    pub db_max_connections: u32,
    /// Whether `Transfer` copies the original file's mode bits onto the
    /// replacement (spec.md §6.4 `preserve_mode`).
    pub preserve_mode: bool,
    /// Seconds of silence before a worker is considered offline.
    pub worker_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".parse().expect("static address parses"),
            database: PathBuf::from("fleet.db"),
            library: PathBuf::from("."),
            db_max_connections: 8,
            preserve_mode: true,
            worker_timeout_seconds: 30,
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Config::default(),
        };

        if let Some(bind) = args.bind {
            config.bind = bind;
        }
        if let Some(database) = &args.database {
            config.database = database.clone();
        }
        if let Some(library) = &args.library {
            config.library = library.clone();
        }

        Ok(config)
    }
}
