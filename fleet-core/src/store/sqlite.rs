use chrono::Utc;
use fleet_model::{DiscoveredFile, FileRecord, Statistics, Status};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{Error, Result};
use super::{schema, Store};

/// Queue and statistics store backed by a single sqlite file (spec.md §9
/// REDESIGN FLAGS: the original used a bespoke Python/sqlite3 layer behind a
/// single `threading.Lock`; here the equivalent serialization comes from
/// sqlite's own writer lock plus a bounded connection pool).
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path` and brings its
    /// schema up to date. `max_connections` beyond 1 is safe for readers;
    /// sqlite itself serializes writers.
    pub async fn connect(path: &str, max_connections: u32) -> Result<Self> {
        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(false)
            .busy_timeout(std::time::Duration::from_secs(5));
        if path != ":memory:" {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        schema::init(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub async fn connect_memory() -> Result<Self> {
        Self::connect(":memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn upsert_file(&self, info: DiscoveredFile) -> Result<FileRecord> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO files (
                path, directory, filename, size_bytes, status,
                codec, bitrate, resolution, bitdepth, hdr, hdr_dynamic,
                color_transfer, color_space, audio_codec, audio_channels, audio_bitrate,
                target_crf, target_opus_bitrate, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, 'pending',
                ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?18
            )
            ON CONFLICT(path) DO UPDATE SET
                directory = excluded.directory,
                filename = excluded.filename,
                size_bytes = excluded.size_bytes,
                codec = excluded.codec,
                bitrate = excluded.bitrate,
                resolution = excluded.resolution,
                bitdepth = excluded.bitdepth,
                hdr = excluded.hdr,
                hdr_dynamic = excluded.hdr_dynamic,
                color_transfer = excluded.color_transfer,
                color_space = excluded.color_space,
                audio_codec = excluded.audio_codec,
                audio_channels = excluded.audio_channels,
                audio_bitrate = excluded.audio_bitrate,
                target_crf = excluded.target_crf,
                target_opus_bitrate = excluded.target_opus_bitrate,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&info.path)
        .bind(&info.directory)
        .bind(&info.filename)
        .bind(info.size_bytes)
        .bind(&info.codec)
        .bind(info.bitrate)
        .bind(&info.resolution)
        .bind(info.bitdepth)
        .bind(&info.hdr)
        .bind(info.hdr_dynamic)
        .bind(&info.color_transfer)
        .bind(&info.color_space)
        .bind(&info.audio_codec)
        .bind(info.audio_channels)
        .bind(info.audio_bitrate)
        .bind(info.target_crf)
        .bind(info.target_opus_bitrate)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let record = sqlx::query_as::<_, FileRecord>("SELECT * FROM files WHERE path = ?1")
            .bind(&info.path)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    async fn pick_next_pending(&self, worker_id: &str) -> Result<Option<FileRecord>> {
        let now = Utc::now();
        // A single statement: the subquery's SELECT and the outer UPDATE run
        // inside sqlite's one write transaction, so two workers racing this
        // call can never both claim the same row (spec.md §8 invariant 3).
        let record = sqlx::query_as::<_, FileRecord>(
            r#"
            UPDATE files
            SET status = 'processing',
                assigned_worker_id = ?1,
                started_at = ?2,
                updated_at = ?2,
                progress_percent = 0,
                error_message = NULL
            WHERE id = (
                SELECT id FROM files
                WHERE status = 'pending'
                  AND (preferred_worker_id IS NULL OR preferred_worker_id = ?1)
                ORDER BY
                    CASE WHEN preferred_worker_id = ?1 THEN 0 ELSE 1 END,
                    priority DESC,
                    created_at ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn update_progress(
        &self,
        id: i64,
        percent: f64,
        speed: Option<f64>,
        eta: Option<i64>,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE files
            SET progress_percent = ?1,
                processing_speed_fps = COALESCE(?2, processing_speed_fps),
                time_remaining_seconds = ?3,
                updated_at = ?4
            WHERE id = ?5 AND status = 'processing'
            "#,
        )
        .bind(percent)
        .bind(speed)
        .bind(eta)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(
        &self,
        id: i64,
        output_size_bytes: i64,
        savings_bytes: i64,
        savings_percent: f64,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE files
            SET status = 'completed',
                progress_percent = 100,
                completed_at = ?1,
                updated_at = ?1,
                output_size_bytes = ?2,
                savings_bytes = ?3,
                savings_percent = ?4,
                error_message = NULL
            WHERE id = ?5 AND status != 'completed'
            "#,
        )
        .bind(now)
        .bind(output_size_bytes)
        .bind(savings_bytes)
        .bind(savings_percent)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE files
            SET status = 'failed',
                error_message = ?1,
                retry_count = retry_count + 1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recover_completed(&self, id: i64, worker_id: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE files
            SET status = 'completed',
                progress_percent = 100,
                assigned_worker_id = ?1,
                completed_at = ?2,
                updated_at = ?2,
                error_message = NULL
            WHERE id = ?3 AND status IN ('processing', 'pending')
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn rebind_processing(&self, id: i64, worker_id: &str, progress: f64) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE files
            SET status = 'processing',
                assigned_worker_id = ?1,
                progress_percent = ?2,
                updated_at = ?3
            WHERE id = ?4 AND status IN ('processing', 'pending')
            "#,
        )
        .bind(worker_id)
        .bind(progress)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset(&self, id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE files
            SET status = 'pending',
                progress_percent = 0,
                assigned_worker_id = NULL,
                started_at = NULL,
                completed_at = NULL,
                processing_speed_fps = NULL,
                time_remaining_seconds = NULL,
                output_size_bytes = NULL,
                savings_bytes = NULL,
                savings_percent = NULL,
                error_message = NULL,
                updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_all_failed(&self) -> Result<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE files
            SET status = 'pending',
                progress_percent = 0,
                assigned_worker_id = NULL,
                error_message = NULL,
                updated_at = ?1
            WHERE status = 'failed'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn skip(&self, id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE files
            SET status = 'completed',
                progress_percent = 100,
                completed_at = ?1,
                updated_at = ?1,
                error_message = NULL
            WHERE id = ?2
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE id = ?1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_all_completed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM files WHERE status = 'completed'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_priority(&self, id: i64, priority: i64, preferred_worker: Option<String>) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE files SET priority = ?1, preferred_worker_id = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(priority)
        .bind(preferred_worker)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>("SELECT * FROM files WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list(&self, status: Option<Status>) -> Result<Vec<FileRecord>> {
        let records = match status {
            Some(status) => {
                sqlx::query_as::<_, FileRecord>(
                    "SELECT * FROM files WHERE status = ?1 ORDER BY priority DESC, created_at ASC",
                )
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, FileRecord>("SELECT * FROM files ORDER BY priority DESC, created_at ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(records)
    }

    async fn statistics(&self) -> Result<Statistics> {
        // Aggregates are derived straight from `files` rather than kept in a
        // running counter, so an operator resetting or deleting completed
        // rows (routes/file.rs `cancel`/`delete_all_completed`) can never
        // leave these numbers stale (spec.md §4.1 "statistics are derived as
        // aggregates").
        let counts = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(status = 'pending'), 0) AS pending,
                COALESCE(SUM(status = 'processing'), 0) AS processing,
                COALESCE(SUM(status = 'completed'), 0) AS completed,
                COALESCE(SUM(status = 'failed'), 0) AS failed,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN size_bytes ELSE 0 END), 0) AS total_original_size,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN output_size_bytes ELSE 0 END), 0) AS total_transcoded_size,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN savings_bytes ELSE 0 END), 0) AS total_savings_bytes
            FROM files
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total_original_size: i64 = counts.get("total_original_size");
        let total_transcoded_size: i64 = counts.get("total_transcoded_size");
        let total_savings_bytes: i64 = counts.get("total_savings_bytes");

        let total_savings_percent = if total_original_size > 0 {
            (total_savings_bytes as f64 / total_original_size as f64) * 100.0
        } else {
            0.0
        };

        // Remaining pending/processing bytes, projected at the fleet's
        // average savings ratio so far (lib/database.py's `get_statistics`
        // "estimated_final_size" field).
        let remaining_bytes: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM files WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(&self.pool)
        .await?;
        let ratio = if total_original_size > 0 {
            total_transcoded_size as f64 / total_original_size as f64
        } else {
            1.0
        };
        let estimated_remaining = (remaining_bytes as f64 * ratio) as i64;
        let estimated_final_size = total_transcoded_size + estimated_remaining;
        let estimated_total_savings = total_savings_bytes + (remaining_bytes - estimated_remaining);

        Ok(Statistics {
            total_files: counts.get("total"),
            pending_files: counts.get("pending"),
            processing_files: counts.get("processing"),
            completed_files: counts.get("completed"),
            failed_files: counts.get("failed"),
            total_original_size,
            total_transcoded_size,
            total_savings_bytes,
            total_savings_percent,
            estimated_total_savings,
            estimated_final_size,
        })
    }

    async fn list_processing(&self) -> Result<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>("SELECT * FROM files WHERE status = 'processing'")
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_model::DiscoveredFile;

    fn sample(path: &str) -> DiscoveredFile {
        DiscoveredFile {
            path: path.to_string(),
            directory: "/movies".to_string(),
            filename: path.rsplit('/').next().unwrap().to_string(),
            size_bytes: 1_000_000,
            codec: Some("h264".to_string()),
            bitrate: Some(8_000_000),
            resolution: Some("1080p".to_string()),
            bitdepth: Some(8),
            hdr: Some("SDR".to_string()),
            hdr_dynamic: false,
            color_transfer: None,
            color_space: None,
            audio_codec: Some("aac".to_string()),
            audio_channels: Some(2),
            audio_bitrate: Some(192_000),
            target_crf: Some(28),
            target_opus_bitrate: Some(128),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_path() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let first = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        let second = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pick_next_pending_claims_exactly_one_row_per_call() {
        let store = SqliteStore::connect_memory().await.unwrap();
        store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        store.upsert_file(sample("/movies/b.mkv")).await.unwrap();

        let first = store.pick_next_pending("worker-1").await.unwrap().unwrap();
        let second = store.pick_next_pending("worker-2").await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert!(store.pick_next_pending("worker-3").await.unwrap().is_none());
        assert_eq!(first.status, Status::Processing);
        assert_eq!(first.assigned_worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn higher_priority_claimed_first() {
        let store = SqliteStore::connect_memory().await.unwrap();
        store.upsert_file(sample("/movies/low.mkv")).await.unwrap();
        let high = store.upsert_file(sample("/movies/high.mkv")).await.unwrap();
        store.set_priority(high.id, 10, None).await.unwrap();

        let claimed = store.pick_next_pending("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
    }

    #[tokio::test]
    async fn preferred_match_outranks_higher_priority() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let pinned = store.upsert_file(sample("/movies/pinned.mkv")).await.unwrap();
        let unpinned = store.upsert_file(sample("/movies/unpinned.mkv")).await.unwrap();
        store.set_priority(pinned.id, 0, Some("worker-1".to_string())).await.unwrap();
        store.set_priority(unpinned.id, 10, None).await.unwrap();

        let claimed = store.pick_next_pending("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, pinned.id);
    }

    #[tokio::test]
    async fn preferred_worker_is_exclusive() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let file = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        store.set_priority(file.id, 0, Some("gpu-box".to_string())).await.unwrap();

        assert!(store.pick_next_pending("other-worker").await.unwrap().is_none());
        let claimed = store.pick_next_pending("gpu-box").await.unwrap().unwrap();
        assert_eq!(claimed.id, file.id);
    }

    #[tokio::test]
    async fn mark_completed_is_idempotent() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let file = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        store.pick_next_pending("worker-1").await.unwrap();
        store.mark_completed(file.id, 400_000, 600_000, 60.0).await.unwrap();
        store.mark_completed(file.id, 999, 999, 99.0).await.unwrap();

        let record = store.get(file.id).await.unwrap().unwrap();
        assert_eq!(record.output_size_bytes, Some(400_000));
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_transcoded_size, 400_000);
    }

    #[tokio::test]
    async fn late_progress_after_completion_is_ignored() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let file = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        store.pick_next_pending("worker-1").await.unwrap();
        store.mark_completed(file.id, 400_000, 600_000, 60.0).await.unwrap();

        let applied = store.update_progress(file.id, 42.0, None, None).await.unwrap();
        assert!(!applied);
        let record = store.get(file.id).await.unwrap().unwrap();
        assert_eq!(record.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn statistics_drop_stale_totals_after_reset() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let file = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        store.pick_next_pending("worker-1").await.unwrap();
        store.mark_completed(file.id, 400_000, 600_000, 60.0).await.unwrap();
        assert_eq!(store.statistics().await.unwrap().total_transcoded_size, 400_000);

        store.reset(file.id).await.unwrap();
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.completed_files, 0);
        assert_eq!(stats.total_transcoded_size, 0);
        assert_eq!(stats.total_original_size, 0);
        assert_eq!(stats.total_savings_bytes, 0);
    }

    #[tokio::test]
    async fn statistics_drop_stale_totals_after_delete() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let keep = store.upsert_file(sample("/movies/keep.mkv")).await.unwrap();
        let gone = store.upsert_file(sample("/movies/gone.mkv")).await.unwrap();
        store.pick_next_pending("worker-1").await.unwrap();
        store.pick_next_pending("worker-2").await.unwrap();
        store.mark_completed(keep.id, 400_000, 600_000, 60.0).await.unwrap();
        store.mark_completed(gone.id, 100_000, 900_000, 90.0).await.unwrap();

        store.delete_all_completed().await.unwrap();
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.completed_files, 0);
        assert_eq!(stats.total_transcoded_size, 0);
    }

    #[tokio::test]
    async fn recover_completed_finalizes_a_row_the_worker_already_finished() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let file = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        // Still `processing` from the master's point of view: the worker
        // finished the encode and is reporting it via heartbeat because its
        // own `/complete` call never landed, not because anything timed out.
        store.pick_next_pending("worker-1").await.unwrap();

        let recovered = store.recover_completed(file.id, "worker-1").await.unwrap();
        assert!(recovered);
        let record = store.get(file.id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Completed);
        assert_eq!(record.assigned_worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn recover_completed_is_a_no_op_once_already_completed() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let file = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        store.pick_next_pending("worker-1").await.unwrap();
        store.mark_completed(file.id, 400_000, 600_000, 60.0).await.unwrap();

        let recovered = store.recover_completed(file.id, "worker-1").await.unwrap();
        assert!(!recovered);
    }

    #[tokio::test]
    async fn rebind_processing_restores_ownership_after_a_missed_heartbeat() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let file = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        // Still `processing`: the worker simply missed a heartbeat or two and
        // is now reporting its in-flight progress again.
        store.pick_next_pending("worker-1").await.unwrap();

        let rebound = store.rebind_processing(file.id, "worker-1", 42.0).await.unwrap();
        assert!(rebound);
        let record = store.get(file.id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Processing);
        assert_eq!(record.progress_percent, 42.0);
        assert_eq!(record.assigned_worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn reset_all_failed_returns_rows_to_pending() {
        let store = SqliteStore::connect_memory().await.unwrap();
        let a = store.upsert_file(sample("/movies/a.mkv")).await.unwrap();
        store.pick_next_pending("worker-1").await.unwrap();
        store.mark_failed(a.id, "boom").await.unwrap();

        let reset = store.reset_all_failed().await.unwrap();
        assert_eq!(reset, 1);
        let record = store.get(a.id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Pending);
        assert_eq!(record.error_message, None);
    }
}
