//! Pipeline audit log repository
//!
//! One row per processed file. This is the authoritative record of where a
//! file went and why, separate from the tracing output.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{datetime_to_str, decode_err, str_to_datetime, str_to_uuid, uuid_to_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineAction {
    MovedToLibrary,
    MovedToIssues,
    QualityUpgrade,
    AutoImport,
    Skipped,
    Error,
}

impl PipelineAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineAction::MovedToLibrary => "moved_to_library",
            PipelineAction::MovedToIssues => "moved_to_issues",
            PipelineAction::QualityUpgrade => "quality_upgrade",
            PipelineAction::AutoImport => "auto_import",
            PipelineAction::Skipped => "skipped",
            PipelineAction::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "moved_to_library" => Some(PipelineAction::MovedToLibrary),
            "moved_to_issues" => Some(PipelineAction::MovedToIssues),
            "quality_upgrade" => Some(PipelineAction::QualityUpgrade),
            "auto_import" => Some(PipelineAction::AutoImport),
            "skipped" => Some(PipelineAction::Skipped),
            "error" => Some(PipelineAction::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogResult {
    Success,
    Skipped,
    Failed,
}

impl LogResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogResult::Success => "success",
            LogResult::Skipped => "skipped",
            LogResult::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(LogResult::Success),
            "skipped" => Some(LogResult::Skipped),
            "failed" => Some(LogResult::Failed),
            _ => None,
        }
    }
}

/// A pipeline log record in the database
#[derive(Debug, Clone)]
pub struct PipelineLogRecord {
    pub id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub action_type: PipelineAction,
    pub result: LogResult,
    pub file_path: Option<String>,
    /// e.g. "show:<uuid>/S01E02" or "movie:<uuid>"
    pub media_ref: Option<String>,
    pub details: String,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for PipelineLogRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let ts_str: String = row.try_get("timestamp")?;
        let action_str: String = row.try_get("action_type")?;
        let result_str: String = row.try_get("result")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(decode_err)?,
            timestamp: str_to_datetime(&ts_str).map_err(decode_err)?,
            action_type: PipelineAction::parse(&action_str).ok_or_else(|| {
                decode_err(anyhow::anyhow!("Unknown action_type '{}'", action_str))
            })?,
            result: LogResult::parse(&result_str)
                .ok_or_else(|| decode_err(anyhow::anyhow!("Unknown result '{}'", result_str)))?,
            file_path: row.try_get("file_path")?,
            media_ref: row.try_get("media_ref")?,
            details: row.try_get("details")?,
        })
    }
}

/// Input for a new log entry
#[derive(Debug, Clone)]
pub struct CreatePipelineLog {
    pub action_type: PipelineAction,
    pub result: LogResult,
    pub file_path: Option<String>,
    pub media_ref: Option<String>,
    pub details: String,
}

const LOG_COLUMNS: &str = "id, timestamp, action_type, result, file_path, media_ref, details";

pub struct PipelineLogRepository {
    pool: SqlitePool,
}

impl PipelineLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new log entry
    pub async fn create(&self, log: CreatePipelineLog) -> Result<PipelineLogRecord> {
        let record = PipelineLogRecord {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            action_type: log.action_type,
            result: log.result,
            file_path: log.file_path,
            media_ref: log.media_ref,
            details: log.details,
        };

        sqlx::query(
            r#"
            INSERT INTO pipeline_logs (id, timestamp, action_type, result, file_path, media_ref, details)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(uuid_to_str(record.id))
        .bind(datetime_to_str(record.timestamp))
        .bind(record.action_type.as_str())
        .bind(record.result.as_str())
        .bind(&record.file_path)
        .bind(&record.media_ref)
        .bind(&record.details)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    /// Most recent entries first
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<PipelineLogRecord>> {
        let records = sqlx::query_as::<_, PipelineLogRecord>(&format!(
            "SELECT {LOG_COLUMNS} FROM pipeline_logs ORDER BY timestamp DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Entries written for one source path, oldest first
    pub async fn list_for_file(&self, file_path: &str) -> Result<Vec<PipelineLogRecord>> {
        let records = sqlx::query_as::<_, PipelineLogRecord>(&format!(
            "SELECT {LOG_COLUMNS} FROM pipeline_logs WHERE file_path = ?1 ORDER BY timestamp"
        ))
        .bind(file_path)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Drop entries older than the cutoff
    pub async fn delete_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pipeline_logs WHERE timestamp < ?1")
            .bind(datetime_to_str(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
