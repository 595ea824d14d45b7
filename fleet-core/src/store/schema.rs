//! Schema creation and forward-compatible migration, grounded directly on
//! `lib/database.py`'s `_migrate_database`: create the tables if absent,
//! then inspect `PRAGMA table_info` and `ALTER TABLE ADD COLUMN` in any
//! column that a newer binary expects but an older database lacks. Columns
//! are never dropped or renamed, so rolling a master back to an older
//! binary against a newer database still works.

use sqlx::SqlitePool;
use sqlx::Row;

use crate::error::Result;

const CREATE_FILES: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    path                    TEXT NOT NULL UNIQUE,
    directory               TEXT NOT NULL,
    filename                TEXT NOT NULL,
    size_bytes              INTEGER NOT NULL,
    status                  TEXT NOT NULL DEFAULT 'pending',
    codec                   TEXT,
    bitrate                 INTEGER,
    resolution              TEXT,
    bitdepth                INTEGER,
    hdr                     TEXT,
    hdr_dynamic             INTEGER NOT NULL DEFAULT 0,
    color_transfer          TEXT,
    color_space             TEXT,
    audio_codec             TEXT,
    audio_channels          INTEGER,
    audio_bitrate           INTEGER,
    target_crf              INTEGER,
    target_opus_bitrate     INTEGER,
    progress_percent        REAL NOT NULL DEFAULT 0,
    assigned_worker_id      TEXT,
    started_at              TEXT,
    completed_at            TEXT,
    processing_speed_fps    REAL,
    time_remaining_seconds  INTEGER,
    output_size_bytes       INTEGER,
    savings_bytes           INTEGER,
    savings_percent         REAL,
    error_message           TEXT,
    retry_count             INTEGER NOT NULL DEFAULT 0,
    priority                INTEGER NOT NULL DEFAULT 0,
    preferred_worker_id     TEXT,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
)
"#;

const CREATE_FILES_STATUS_IDX: &str = "CREATE INDEX IF NOT EXISTS idx_files_status ON files(status)";
const CREATE_FILES_PATH_IDX: &str = "CREATE INDEX IF NOT EXISTS idx_files_path ON files(path)";

/// Columns a newer binary may expect that an older `files` table lacks,
/// paired with the `ALTER TABLE` fragment to add them. New fields belong
/// here, appended at the end — never edit `CREATE_FILES` alone once a
/// database has shipped with a prior shape.
const EXPECTED_COLUMNS: &[(&str, &str)] = &[
    ("priority", "ALTER TABLE files ADD COLUMN priority INTEGER NOT NULL DEFAULT 0"),
    (
        "preferred_worker_id",
        "ALTER TABLE files ADD COLUMN preferred_worker_id TEXT",
    ),
    (
        "hdr_dynamic",
        "ALTER TABLE files ADD COLUMN hdr_dynamic INTEGER NOT NULL DEFAULT 0",
    ),
];

pub async fn init(pool: &SqlitePool) -> Result<()> {
    sqlx::query(CREATE_FILES).execute(pool).await?;
    sqlx::query(CREATE_FILES_STATUS_IDX).execute(pool).await?;
    sqlx::query(CREATE_FILES_PATH_IDX).execute(pool).await?;
    migrate(pool).await?;
    Ok(())
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    let rows = sqlx::query("PRAGMA table_info(files)").fetch_all(pool).await?;
    let existing: Vec<String> = rows.iter().map(|r| r.get::<String, _>("name")).collect();

    for (column, alter) in EXPECTED_COLUMNS {
        if !existing.iter().any(|c| c == column) {
            sqlx::query(alter).execute(pool).await?;
        }
    }
    Ok(())
}
