//! Shared data model for the fleet transcoding controller.
//!
//! Types in this crate cross the master/worker wire boundary (as JSON, via
//! `serde`) and the master's own database boundary (as sqlite rows, via
//! `sqlx`). Keeping them in one crate means the worker, the master, and the
//! `fleetctl` operator CLI always agree on the shape of a file or a worker.

pub mod file;
pub mod job;
pub mod worker;

pub use file::{BitDepth, DiscoveredFile, FileRecord, Hdr, Resolution, Statistics, Status};
pub use job::{CompleteRequest, FailRequest, HeartbeatRequest, JobAssignment, ProgressRequest, RegisterRequest, RegisterResponse, UploadResult, WorkerJobSnapshot};
pub use worker::{WorkerCapabilities, WorkerRecord, WorkerStatus};
