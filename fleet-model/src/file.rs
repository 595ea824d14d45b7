use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Decode;
use sqlx::Sqlite;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};

/// The state machine a `FileRecord` moves through. See spec.md §3 and the
/// transition graph in §8 invariant 6: `pending -> processing -> {completed,
/// failed}`; `{failed, completed} -> pending` only via explicit reset/retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "processing" => Ok(Status::Processing),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            other => Err(format!("unknown file status: {other}")),
        }
    }
}

// sqlite has no native enum column; we store `Status` as TEXT and encode/decode
// through `Display`/`FromStr` by hand rather than pull in a derive macro for it.
impl sqlx::Type<Sqlite> for Status {
    fn type_info() -> SqliteTypeInfo {
        <&str as sqlx::Type<Sqlite>>::type_info()
    }
}

impl<'q> sqlx::Encode<'q, Sqlite> for Status {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> Result<IsNull, BoxDynError> {
        buf.push(SqliteArgumentValue::Text(self.to_string().into()));
        Ok(IsNull::No)
    }
}

impl<'r> Decode<'r, Sqlite> for Status {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Sqlite>>::decode(value)?;
        Status::from_str(raw).map_err(Into::into)
    }
}

/// Source resolution bucket used for quality/CRF lookup (spec.md §3, §4 via
/// `lib/quality.py`). Unknown/unparsable values degrade to `None` rather than
/// failing deserialization, since probing is an out-of-scope external
/// collaborator and forward compatibility matters more than exhaustiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "1080p")]
    R1080p,
    #[serde(rename = "1440p")]
    R1440p,
    #[serde(rename = "4k")]
    R4k,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resolution::R720p => "720p",
            Resolution::R1080p => "1080p",
            Resolution::R1440p => "1440p",
            Resolution::R4k => "4k",
        };
        f.write_str(s)
    }
}

impl FromStr for Resolution {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "720p" => Ok(Resolution::R720p),
            "1080p" => Ok(Resolution::R1080p),
            "1440p" => Ok(Resolution::R1440p),
            "4k" => Ok(Resolution::R4k),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    Eight = 8,
    Ten = 10,
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// HDR classification, including the "dynamic metadata" kinds that the worker
/// refuses to transcode (spec.md §4.7 "Dynamic HDR skip", GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hdr {
    Sdr,
    Hdr10,
    #[serde(rename = "HDR10+")]
    Hdr10Plus,
    #[serde(rename = "Dolby Vision")]
    DolbyVision,
}

impl Hdr {
    /// HDR10+ and Dolby Vision carry frame-accurate dynamic metadata the
    /// encoder cannot preserve; spec.md §4.7 requires the worker to refuse
    /// these outright rather than transcode them.
    pub fn is_dynamic_kind(&self) -> bool {
        matches!(self, Hdr::Hdr10Plus | Hdr::DolbyVision)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Hdr::Sdr => "SDR",
            Hdr::Hdr10 => "HDR10",
            Hdr::Hdr10Plus => "HDR10+",
            Hdr::DolbyVision => "Dolby Vision",
        }
    }
}

impl fmt::Display for Hdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The persisted queue row. Every field and invariant here mirrors spec.md
/// §3 "FileRecord (persisted)" exactly. Field order and names match the
/// `files` table column-for-column so it can be decoded straight off a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub directory: String,
    pub filename: String,
    pub size_bytes: i64,
    pub status: Status,

    // Source metadata, filled by probe at scan or process time.
    pub codec: Option<String>,
    pub bitrate: Option<i64>,
    pub resolution: Option<String>,
    pub bitdepth: Option<i64>,
    pub hdr: Option<String>,
    pub hdr_dynamic: bool,
    pub color_transfer: Option<String>,
    pub color_space: Option<String>,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<i64>,
    pub audio_bitrate: Option<i64>,

    // Target settings.
    pub target_crf: Option<i64>,
    pub target_opus_bitrate: Option<i64>,

    // Progress.
    pub progress_percent: f64,
    pub assigned_worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_speed_fps: Option<f64>,
    pub time_remaining_seconds: Option<i64>,

    // Results.
    pub output_size_bytes: Option<i64>,
    pub savings_bytes: Option<i64>,
    pub savings_percent: Option<f64>,

    // Error.
    pub error_message: Option<String>,
    pub retry_count: i64,

    // Priority.
    pub priority: i64,
    pub preferred_worker_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata a scanner (or a worker's local re-probe) supplies for a newly
/// discovered or re-discovered path. `upsert_file` only ever touches these
/// fields — never `status` (spec.md §4.1 `upsert_file` contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredFile {
    pub path: String,
    pub directory: String,
    pub filename: String,
    pub size_bytes: i64,
    pub codec: Option<String>,
    pub bitrate: Option<i64>,
    pub resolution: Option<String>,
    pub bitdepth: Option<i64>,
    pub hdr: Option<String>,
    pub hdr_dynamic: bool,
    pub color_transfer: Option<String>,
    pub color_space: Option<String>,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<i64>,
    pub audio_bitrate: Option<i64>,
    pub target_crf: Option<i64>,
    pub target_opus_bitrate: Option<i64>,
}

/// Aggregate queue statistics, derived the way spec.md §4.1 "Statistics"
/// describes: counts per status, size sums, average savings, and the
/// estimated final library size.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_files: i64,
    pub pending_files: i64,
    pub processing_files: i64,
    pub completed_files: i64,
    pub failed_files: i64,

    pub total_original_size: i64,
    pub total_transcoded_size: i64,
    pub total_savings_bytes: i64,
    pub total_savings_percent: f64,

    pub estimated_total_savings: i64,
    pub estimated_final_size: i64,
}
