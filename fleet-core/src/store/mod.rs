//! The Store: durable queue + statistics (spec.md §4.1). Single source of
//! truth for `FileRecord`s; nothing outside this module ever writes the
//! `files` table. Statistics are derived from it at read time rather than
//! kept in a separate accumulator, so they never drift from a reset/delete.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use fleet_model::{DiscoveredFile, FileRecord, Statistics, Status};

use crate::error::Result;

/// Contract offered by the Store (spec.md §4.1). Implemented by
/// [`SqliteStore`]; kept as a trait so the Scheduler, Monitor, and HTTP
/// handlers depend on behavior, not on sqlite specifically.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new row or refresh the metadata-only fields of an existing
    /// one (keyed on the unique `path`). Never changes `status`.
    async fn upsert_file(&self, info: DiscoveredFile) -> Result<FileRecord>;

    /// Atomically select the best pending candidate for `worker_id` and
    /// flip it to `processing` in the same step (spec.md's "pick_next_pending
    /// algorithm"). Returns `None` if no candidate exists.
    async fn pick_next_pending(&self, worker_id: &str) -> Result<Option<FileRecord>>;

    /// Update progress fields. Returns `false` (no-op) if the row is not
    /// currently `processing` — late updates after completion are silently
    /// ignored (spec.md §4.4 "Progress").
    async fn update_progress(
        &self,
        id: i64,
        percent: f64,
        speed: Option<f64>,
        eta: Option<i64>,
    ) -> Result<bool>;

    /// Transition a row to `completed`. Idempotent: calling this again on an
    /// already-completed row is a no-op that returns `Ok(())`.
    async fn mark_completed(
        &self,
        id: i64,
        output_size_bytes: i64,
        savings_bytes: i64,
        savings_percent: f64,
    ) -> Result<()>;

    /// Transition a row to `failed`, incrementing `retry_count`.
    async fn mark_failed(&self, id: i64, error: &str) -> Result<()>;

    /// Reconnection recovery, `is_completed=true` branch (spec.md §4.4):
    /// the worker finished the job but the master never heard about it, so
    /// mark the row completed from the heartbeat's own reported progress
    /// rather than waiting for a `/complete` call that may never arrive.
    /// Only applies to rows still `processing` or `pending`; a no-op
    /// otherwise (returns `false`).
    async fn recover_completed(&self, id: i64, worker_id: &str) -> Result<bool>;

    /// Reconnection recovery, in-progress branch (spec.md §4.4): rebinds a
    /// still-`processing`/`pending` row to `worker_id` at the reported
    /// `progress`, so a worker that merely missed a heartbeat or two resumes
    /// ownership of its job instead of a later poll finding nothing to do.
    /// Returns `false` if the row wasn't eligible (e.g. the monitor already
    /// failed it for timing out, which requires an explicit operator retry).
    async fn rebind_processing(&self, id: i64, worker_id: &str, progress: f64) -> Result<bool>;

    /// Reset a row back to `pending`, clearing progress/result/error fields.
    async fn reset(&self, id: i64) -> Result<()>;

    /// Reset every `failed` row back to `pending`. Returns the count reset.
    async fn reset_all_failed(&self) -> Result<u64>;

    /// Mark a row `completed` without processing it (an operator decision,
    /// not a worker result).
    async fn skip(&self, id: i64) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Delete every `completed` row. Returns the count deleted.
    async fn delete_all_completed(&self) -> Result<u64>;

    async fn set_priority(&self, id: i64, priority: i64, preferred_worker: Option<String>) -> Result<()>;

    async fn get(&self, id: i64) -> Result<Option<FileRecord>>;

    async fn list(&self, status: Option<Status>) -> Result<Vec<FileRecord>>;

    async fn statistics(&self) -> Result<Statistics>;

    async fn list_processing(&self) -> Result<Vec<FileRecord>>;
}
